use crate::db;
use crate::fees::Month;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

pub const DEFAULT_BASELINE_MONTH: &str = "2000-01";
pub const DEFAULT_PENDING_MONTHS_MAX: i64 = 60;

#[derive(Clone, Copy)]
enum SetupSection {
    Fees,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "fees" => Some(Self::Fees),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Fees => "setup.fees",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Fees => json!({
            "baselineMonth": DEFAULT_BASELINE_MONTH,
            "pendingMonthsMax": DEFAULT_PENDING_MONTHS_MAX,
            "generateForKirtan": false
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_month(v: &Value, key: &str) -> Result<Month, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    Month::parse(key, s).map_err(|e| e.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Fees => match k.as_str() {
                "baselineMonth" => {
                    obj.insert(k.clone(), Value::String(parse_month(v, k)?.key()));
                }
                "pendingMonthsMax" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 240)?));
                }
                "generateForKirtan" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown fees field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values must not block setup.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                warn!(key = section.key(), error = %msg, "ignoring invalid saved setup");
            }
        }
    }
    Ok(current)
}

/// Typed view of the `fees` setup section used by the fee handlers.
#[derive(Debug, Clone, Copy)]
pub struct FeeSettings {
    pub baseline_month: Month,
    pub pending_months_max: u32,
    pub generate_for_kirtan: bool,
}

pub fn fee_settings(conn: &Connection) -> Result<FeeSettings, HandlerErr> {
    let section = load_section(conn, SetupSection::Fees)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let baseline_month = section
        .get("baselineMonth")
        .and_then(|v| v.as_str())
        .and_then(Month::from_sql)
        .or_else(|| Month::from_sql(DEFAULT_BASELINE_MONTH))
        .ok_or_else(|| HandlerErr::new("internal", "invalid baseline month"))?;
    let pending_months_max = section
        .get("pendingMonthsMax")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_PENDING_MONTHS_MAX)
        .clamp(1, 240) as u32;
    let generate_for_kirtan = section
        .get("generateForKirtan")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    Ok(FeeSettings {
        baseline_month,
        pending_months_max,
        generate_for_kirtan,
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let fees = match load_section(conn, SetupSection::Fees) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "fees": fees }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(key = section.key(), "setup updated");
    ok(&req.id, json!({ "ok": true, "section": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
