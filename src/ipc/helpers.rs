use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;

use crate::fees::{FeeError, Month};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<FeeError> for HandlerErr {
    fn from(e: FeeError) -> Self {
        Self {
            code: e.code(),
            details: e.details(),
            message: e.to_string(),
        }
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

pub fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Runs a handler body that needs an open workspace and wraps its result.
pub fn with_db(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
) -> Value {
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    match f(conn, &req.params) {
        Ok(result) => crate::ipc::error::ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn to_value<T: Serialize>(v: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(v).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok(if s.is_empty() { None } else { Some(s.to_string()) })
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    v.as_i64()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key)))
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_required_month(params: &Value, key: &str) -> Result<Month, HandlerErr> {
    let raw = get_required_str(params, key)?;
    Ok(Month::parse(key, &raw)?)
}

pub fn get_optional_month(params: &Value, key: &str) -> Result<Option<Month>, HandlerErr> {
    match get_optional_str(params, key)? {
        Some(raw) => Ok(Some(Month::parse(key, &raw)?)),
        None => Ok(None),
    }
}

/// `params.asOf`, or the local wall-clock month when absent.
pub fn as_of(params: &Value) -> Result<Month, HandlerErr> {
    Ok(get_optional_month(params, "asOf")?
        .unwrap_or_else(|| Month::from_date(chrono::Local::now().date_naive())))
}
