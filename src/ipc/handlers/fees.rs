use crate::fees::enrollment::get_enrollment;
use crate::fees::report::{fee_report, CollectionStatus, FeeReportFilter};
use crate::fees::{generator, ledger, onboarding, resolver};
use crate::ipc::handlers::setup::fee_settings;
use crate::ipc::helpers::{
    as_of, get_optional_month, get_optional_str, get_required_i64, get_required_str, to_value,
    with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn fees_resolve(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let month = match get_optional_month(params, "month")? {
        Some(m) => m,
        None => as_of(params)?,
    };
    let enrollment = get_enrollment(conn, &enrollment_id)?;
    let resolution = resolver::resolve_for_month(conn, &enrollment, month)?;
    Ok(json!({
        "enrollmentId": enrollment_id,
        "month": month.key(),
        "resolution": to_value(&resolution)?
    }))
}

fn fees_generate_monthly(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let month = match get_optional_month(params, "month")? {
        Some(m) => m,
        None => as_of(params)?,
    };
    let include_kirtan = match params.get("includeKirtan") {
        None | Some(Value::Null) => fee_settings(conn)?.generate_for_kirtan,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params("includeKirtan must be boolean"))?,
    };
    let summary = generator::generate_monthly_fees(conn, month, include_kirtan)?;
    to_value(&summary)
}

fn fees_set_pending_months(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let count = get_required_i64(params, "pendingMonths")?;
    let max = fee_settings(conn)?.pending_months_max;
    let count = u32::try_from(count).map_err(|_| HandlerErr {
        code: "bad_params",
        message: format!("pendingMonths must be between 0 and {}", max),
        details: Some(json!({ "field": "pendingMonths" })),
    })?;
    let outcome = onboarding::set_pending_months(conn, &enrollment_id, count, max, as_of(params)?)?;
    to_value(&outcome)
}

fn fees_create_custom(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let amount = get_required_i64(params, "amount")?;
    let description = get_required_str(params, "description")?;
    if description.len() > 200 {
        return Err(HandlerErr::bad_params("description length must be <= 200"));
    }
    get_enrollment(conn, &enrollment_id)?;
    let fee_id = ledger::insert_custom_fee(conn, &enrollment_id, amount, &description)?;
    Ok(json!({ "feeId": fee_id }))
}

fn fees_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    get_enrollment(conn, &enrollment_id)?;
    let fees = ledger::list_fees(conn, &enrollment_id)?;
    Ok(json!({ "fees": to_value(&fees)? }))
}

fn parse_report_filter(params: &Value) -> Result<FeeReportFilter, HandlerErr> {
    let status = match get_optional_str(params, "status")? {
        Some(raw) => CollectionStatus::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("status must be one of: all, paid, unpaid"))?,
        None => CollectionStatus::All,
    };
    Ok(FeeReportFilter {
        class_id: get_optional_str(params, "classId")?,
        section_id: get_optional_str(params, "sectionId")?,
        month_from: get_optional_month(params, "monthFrom")?,
        month_to: get_optional_month(params, "monthTo")?,
        fee_type: get_optional_str(params, "feeType")?,
        status,
    })
}

fn fees_report(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let filter = parse_report_filter(params)?;
    let report = fee_report(conn, &filter)?;
    to_value(&report)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "fees.resolve" => fees_resolve,
        "fees.generateMonthly" => fees_generate_monthly,
        "fees.setPendingMonths" => fees_set_pending_months,
        "fees.createCustom" => fees_create_custom,
        "fees.list" => fees_list,
        "fees.report" => fees_report,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
