use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;

use super::error::{FeeError, FeeResult};
use super::ledger::{fee_from_row, FeeRow};
use super::month::Month;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionStatus {
    #[default]
    All,
    Paid,
    Unpaid,
}

impl CollectionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "paid" => Some(Self::Paid),
            "unpaid" => Some(Self::Unpaid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeeReportFilter {
    pub class_id: Option<String>,
    pub section_id: Option<String>,
    pub month_from: Option<Month>,
    pub month_to: Option<Month>,
    pub fee_type: Option<String>,
    pub status: CollectionStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeReportRow {
    #[serde(flatten)]
    pub fee: FeeRow,
    pub student_name: String,
    pub class_name: String,
    pub section_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeReportTotals {
    pub billed: i64,
    pub collected: i64,
    pub outstanding: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeReport {
    pub rows: Vec<FeeReportRow>,
    pub totals: FeeReportTotals,
}

const PAID_SUM: &str = "COALESCE((SELECT SUM(p.amount_paid) FROM payments p
                                  WHERE p.fee_id = f.id AND p.deleted_at IS NULL), 0)";

// Values are always bound, never spliced into the SQL.
fn build_where(filter: &FeeReportFilter) -> FeeResult<(String, Vec<Value>)> {
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();

    if let Some(class_id) = &filter.class_id {
        clauses.push("e.class_id = ?".to_string());
        binds.push(Value::Text(class_id.clone()));
    }
    if let Some(section_id) = &filter.section_id {
        clauses.push("e.section_id = ?".to_string());
        binds.push(Value::Text(section_id.clone()));
    }
    if let (Some(from), Some(to)) = (filter.month_from, filter.month_to) {
        if to < from {
            return Err(FeeError::validation("monthTo", "monthTo must not be before monthFrom"));
        }
    }
    if let Some(from) = filter.month_from {
        clauses.push("f.month >= ?".to_string());
        binds.push(Value::Text(from.key()));
    }
    if let Some(to) = filter.month_to {
        clauses.push("f.month <= ?".to_string());
        binds.push(Value::Text(to.key()));
    }
    if let Some(fee_type) = &filter.fee_type {
        if fee_type != "monthly" && fee_type != "custom" {
            return Err(FeeError::validation("feeType", "feeType must be monthly or custom"));
        }
        clauses.push("f.fee_type = ?".to_string());
        binds.push(Value::Text(fee_type.clone()));
    }
    match filter.status {
        CollectionStatus::All => {}
        CollectionStatus::Paid => clauses.push(format!("{PAID_SUM} > 0")),
        CollectionStatus::Unpaid => clauses.push(format!("{PAID_SUM} = 0")),
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    Ok((sql, binds))
}

fn sum_totals(rows: &[FeeReportRow]) -> FeeResult<FeeReportTotals> {
    let overflow = || FeeError::validation("amount", "report totals exceed the supported range");
    let mut totals = FeeReportTotals::default();
    for row in rows {
        let outstanding = row
            .fee
            .amount
            .checked_sub(row.fee.paid_amount)
            .ok_or_else(overflow)?
            .max(0);
        totals.billed = totals.billed.checked_add(row.fee.amount).ok_or_else(overflow)?;
        totals.collected = totals
            .collected
            .checked_add(row.fee.paid_amount)
            .ok_or_else(overflow)?;
        totals.outstanding = totals.outstanding.checked_add(outstanding).ok_or_else(overflow)?;
    }
    Ok(totals)
}

pub fn fee_report(conn: &Connection, filter: &FeeReportFilter) -> FeeResult<FeeReport> {
    let (where_sql, binds) = build_where(filter)?;
    let sql = format!(
        "SELECT f.id, f.enrollment_id, f.fee_type, f.source, f.month, f.amount, f.is_locked,
                f.batch_id, f.description, {PAID_SUM} AS paid_amount,
                st.last_name || ', ' || st.first_name, c.name, s.name
         FROM fees f
         JOIN enrollments e ON e.id = f.enrollment_id
         JOIN students st ON st.id = e.student_id
         JOIN classes c ON c.id = e.class_id
         JOIN sections s ON s.id = e.section_id
         {where_sql}
         ORDER BY c.name, s.name, st.last_name, st.first_name, f.month"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(FeeReportRow {
                fee: fee_from_row(r)?,
                student_name: r.get(10)?,
                class_name: r.get(11)?,
                section_name: r.get(12)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let totals = sum_totals(&rows)?;
    Ok(FeeReport { rows, totals })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::ledger::record_payment;
    use crate::fees::testing::{add_monthly_fee, m, seed_enrollment, test_conn};

    #[test]
    fn oversized_stored_amounts_fail_instead_of_wrapping() {
        let conn = test_conn();
        let e = seed_enrollment(&conn, "paid", "gurmukhi", 0, 0);
        add_monthly_fee(&conn, &e.id, "2024-01", i64::MAX / 2 + 1);
        add_monthly_fee(&conn, &e.id, "2024-02", i64::MAX / 2 + 1);

        let err = fee_report(&conn, &FeeReportFilter::default()).unwrap_err();
        assert_eq!(err.code(), "bad_params");

        let one_month = fee_report(
            &conn,
            &FeeReportFilter {
                month_to: Some(m("2024-01")),
                ..FeeReportFilter::default()
            },
        )
        .expect("single row fits");
        assert_eq!(one_month.totals.billed, i64::MAX / 2 + 1);
    }

    #[test]
    fn filters_by_section_month_and_status() {
        let conn = test_conn();
        let a = seed_enrollment(&conn, "paid", "gurmukhi", 0, 0);
        let b = seed_enrollment(&conn, "paid", "gurmukhi", 0, 0);
        let a_feb = add_monthly_fee(&conn, &a.id, "2024-02", 500);
        add_monthly_fee(&conn, &a.id, "2024-03", 500);
        add_monthly_fee(&conn, &a.id, "2024-07", 500);
        add_monthly_fee(&conn, &b.id, "2024-02", 300);
        record_payment(&conn, &a_feb, 200, "2024-02-10").expect("partial payment");

        let all_a = fee_report(
            &conn,
            &FeeReportFilter {
                section_id: Some(a.section_id.clone()),
                month_from: Some(m("2024-01")),
                month_to: Some(m("2024-06")),
                ..FeeReportFilter::default()
            },
        )
        .expect("report");
        assert_eq!(all_a.rows.len(), 2);
        assert_eq!(all_a.totals.billed, 1000);
        assert_eq!(all_a.totals.collected, 200);
        assert_eq!(all_a.totals.outstanding, 800);

        let unpaid = fee_report(
            &conn,
            &FeeReportFilter {
                status: CollectionStatus::Unpaid,
                ..FeeReportFilter::default()
            },
        )
        .expect("report");
        assert_eq!(unpaid.rows.len(), 3);
        assert!(unpaid.rows.iter().all(|r| !r.fee.collected));

        let paid = fee_report(
            &conn,
            &FeeReportFilter {
                status: CollectionStatus::Paid,
                ..FeeReportFilter::default()
            },
        )
        .expect("report");
        assert_eq!(paid.rows.len(), 1);
        assert_eq!(paid.rows[0].fee.id, a_feb);
        assert_eq!(paid.rows[0].student_name, "Singh, Test");
    }

    #[test]
    fn rejects_inverted_month_range_and_unknown_fee_type() {
        let conn = test_conn();
        let err = fee_report(
            &conn,
            &FeeReportFilter {
                month_from: Some(m("2024-06")),
                month_to: Some(m("2024-01")),
                ..FeeReportFilter::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), "bad_params");

        let err = fee_report(
            &conn,
            &FeeReportFilter {
                fee_type: Some("annual".to_string()),
                ..FeeReportFilter::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), "bad_params");
    }
}
