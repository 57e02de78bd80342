use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::enrollment::{enrollment_from_row, ENROLLMENT_SELECT};
use super::error::FeeResult;
use super::ledger;
use super::month::Month;
use super::resolver::resolve_amount;
use crate::db::now_timestamp;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    pub batch_id: String,
    pub month: Month,
    pub created: usize,
    pub skipped_existing: usize,
    pub skipped_zero: usize,
}

pub fn generate_monthly_fees(
    conn: &Connection,
    month: Month,
    include_kirtan: bool,
) -> FeeResult<GenerationSummary> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let batch_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO fee_batches(id, month, kind, created_count, skipped_count, created_at)
         VALUES(?, ?, 'monthly', 0, 0, ?)",
        (&batch_id, month.key(), now_timestamp()),
    )?;

    let enrollments = {
        let mut stmt = tx.prepare(&format!(
            "{ENROLLMENT_SELECT}
             WHERE e.student_type = 'paid' AND (?1 OR c.class_type <> 'kirtan')
             ORDER BY e.created_at, e.id"
        ))?;
        let rows = stmt
            .query_map([include_kirtan], enrollment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut summary = GenerationSummary {
        batch_id: batch_id.clone(),
        month,
        created: 0,
        skipped_existing: 0,
        skipped_zero: 0,
    };
    for enrollment in &enrollments {
        if ledger::monthly_fee_exists(&tx, &enrollment.id, month)? {
            summary.skipped_existing += 1;
            continue;
        }
        let amount = resolve_amount(&tx, enrollment, month)?;
        if amount <= 0 {
            summary.skipped_zero += 1;
            continue;
        }
        ledger::insert_monthly_fee(&tx, &enrollment.id, month, amount, Some(&batch_id))?;
        summary.created += 1;
    }

    tx.execute(
        "UPDATE fee_batches SET created_count = ?, skipped_count = ? WHERE id = ?",
        (
            summary.created as i64,
            (summary.skipped_existing + summary.skipped_zero) as i64,
            &batch_id,
        ),
    )?;
    tx.commit()?;

    info!(
        month = %month,
        batch_id = %summary.batch_id,
        created = summary.created,
        skipped_existing = summary.skipped_existing,
        skipped_zero = summary.skipped_zero,
        "monthly fee generation finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::period::Scope;
    use crate::fees::testing::{add_period, enroll, m, seed_enrollment, test_conn};

    fn monthly_rows(conn: &Connection, month: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM fees WHERE fee_type = 'monthly' AND month = ?",
            [month],
            |r| r.get(0),
        )
        .expect("count")
    }

    #[test]
    fn generation_is_idempotent() {
        let conn = test_conn();
        let e = seed_enrollment(&conn, "paid", "gurmukhi", 0, 0);
        enroll(&conn, &e.class_id, &e.section_id, "paid");
        add_period(&conn, Scope::class(e.class_id.clone()), 500, "2024-01", None);

        let first = generate_monthly_fees(&conn, m("2024-05"), false).expect("first run");
        assert_eq!(first.created, 2);
        let second = generate_monthly_fees(&conn, m("2024-05"), false).expect("second run");
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped_existing, 2);
        assert_eq!(monthly_rows(&conn, "2024-05"), 2);

        let batches: i64 = conn
            .query_row("SELECT COUNT(*) FROM fee_batches", [], |r| r.get(0))
            .expect("batches");
        assert_eq!(batches, 2);
    }

    #[test]
    fn skips_free_kirtan_and_zero_rated_enrollments() {
        let conn = test_conn();
        let paid = seed_enrollment(&conn, "paid", "gurmukhi", 300, 0);
        enroll(&conn, &paid.class_id, &paid.section_id, "free");
        seed_enrollment(&conn, "paid", "kirtan", 200, 0);
        seed_enrollment(&conn, "paid", "gurmukhi", 0, 0);

        let summary = generate_monthly_fees(&conn, m("2024-05"), false).expect("run");
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped_zero, 1);
        let amount: i64 = conn
            .query_row("SELECT amount FROM fees WHERE enrollment_id = ?", [&paid.id], |r| r.get(0))
            .expect("fee");
        assert_eq!(amount, 300);

        let with_kirtan = generate_monthly_fees(&conn, m("2024-05"), true).expect("run");
        assert_eq!(with_kirtan.created, 1);
        assert_eq!(monthly_rows(&conn, "2024-05"), 2);
    }

    #[test]
    fn snapshot_is_not_rederived_after_rate_change() {
        let conn = test_conn();
        let e = seed_enrollment(&conn, "paid", "gurmukhi", 0, 0);
        add_period(&conn, Scope::section(e.section_id.clone()), 500, "2024-01", None);
        generate_monthly_fees(&conn, m("2024-05"), false).expect("run");

        conn.execute("UPDATE rate_periods SET amount = 900", []).expect("raw change");
        let amount: i64 = conn
            .query_row("SELECT amount FROM fees WHERE enrollment_id = ?", [&e.id], |r| r.get(0))
            .expect("fee");
        assert_eq!(amount, 500);
    }
}
