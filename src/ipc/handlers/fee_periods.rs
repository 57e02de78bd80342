use crate::fees::lifecycle::{self, PeriodInput};
use crate::fees::{backfill, store, Month, Scope, ScopeType};
use crate::ipc::handlers::setup::fee_settings;
use crate::ipc::helpers::{
    as_of, get_optional_month, get_required_i64, get_required_month, get_required_str, to_value,
    with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_scope(params: &Value) -> Result<Scope, HandlerErr> {
    let raw = get_required_str(params, "scopeType")?;
    let scope_type = ScopeType::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params("scopeType must be class or section"))?;
    let scope_id = get_required_str(params, "scopeId")?;
    Ok(Scope::new(scope_type, scope_id))
}

fn parse_period_input(params: &Value) -> Result<PeriodInput, HandlerErr> {
    Ok(PeriodInput {
        amount: get_required_i64(params, "amount")?,
        effective_from: get_required_month(params, "effectiveFrom")?,
        effective_to: get_optional_month(params, "effectiveTo")?,
    })
}

fn fee_periods_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scope = parse_scope(params)?;
    let as_of = as_of(params)?;
    if !store::scope_exists(conn, &scope)? {
        return Err(HandlerErr::new("not_found", format!("{} not found", scope.scope_type.as_str())));
    }
    let periods = store::list_periods(conn, &scope)?;
    let active = store::active_period_at(conn, &scope, as_of)?;
    Ok(json!({
        "scope": to_value(&scope)?,
        "asOf": as_of.key(),
        "periods": to_value(&periods)?,
        "activePeriodId": active.map(|p| p.id)
    }))
}

fn fee_periods_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scope = parse_scope(params)?;
    let input = parse_period_input(params)?;
    let outcome = lifecycle::create_period(conn, &scope, input, as_of(params)?)?;
    to_value(&outcome)
}

fn fee_periods_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let period_id = get_required_str(params, "periodId")?;
    let input = parse_period_input(params)?;
    let outcome = lifecycle::update_period(conn, &period_id, input, as_of(params)?)?;
    to_value(&outcome)
}

fn fee_periods_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let period_id = get_required_str(params, "periodId")?;
    let deleted = lifecycle::delete_period(conn, &period_id, as_of(params)?)?;
    Ok(json!({ "ok": true, "deleted": to_value(&deleted)? }))
}

fn fee_periods_audit(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let faulty = lifecycle::audit(conn)?;
    Ok(json!({
        "clean": faulty.is_empty(),
        "scopes": to_value(&faulty)?
    }))
}

fn fee_periods_repair(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scope = parse_scope(params)?;
    let outcome = lifecycle::repair_open_periods(conn, &scope, as_of(params)?)?;
    to_value(&outcome)
}

fn fee_periods_backfill(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let baseline: Month = match get_optional_month(params, "baselineMonth")? {
        Some(m) => m,
        None => fee_settings(conn)?.baseline_month,
    };
    let summary = backfill::backfill_baseline_periods(conn, baseline)?;
    to_value(&summary)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "feePeriods.list" => fee_periods_list,
        "feePeriods.create" => fee_periods_create,
        "feePeriods.update" => fee_periods_update,
        "feePeriods.delete" => fee_periods_delete,
        "feePeriods.audit" => fee_periods_audit,
        "feePeriods.repair" => fee_periods_repair,
        "feePeriods.backfill" => fee_periods_backfill,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
