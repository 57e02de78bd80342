use crate::fees::ledger;
use crate::ipc::helpers::{get_optional_str, get_required_i64, get_required_str, to_value, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;

fn payments_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let fee_id = get_required_str(params, "feeId")?;
    let amount_paid = get_required_i64(params, "amountPaid")?;
    let paid_at = match get_optional_str(params, "paidAt")? {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("paidAt must be YYYY-MM-DD"))?,
        None => chrono::Local::now().date_naive(),
    };
    let payment = ledger::record_payment(
        conn,
        &fee_id,
        amount_paid,
        &paid_at.format("%Y-%m-%d").to_string(),
    )?;
    info!(fee_id = %fee_id, payment_id = %payment.id, amount_paid, "payment recorded");
    Ok(json!({ "payment": to_value(&payment)? }))
}

fn payments_uncollect(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let still_collected = ledger::uncollect_payment(conn, &payment_id)?;
    info!(payment_id = %payment_id, still_collected, "payment un-collected");
    Ok(json!({ "ok": true, "stillCollected": still_collected }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "payments.record" => payments_record,
        "payments.uncollect" => payments_uncollect,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
