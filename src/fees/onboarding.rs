use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use super::enrollment::get_enrollment;
use super::error::{FeeError, FeeResult};
use super::ledger;
use super::month::Month;
use super::resolver::resolve_amount;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMonthsOutcome {
    pub enrollment_id: String,
    pub months: Vec<Month>,
    pub amount: i64,
    pub created: usize,
    pub deleted: usize,
}

pub fn set_pending_months(
    conn: &Connection,
    enrollment_id: &str,
    count: u32,
    max_count: u32,
    as_of: Month,
) -> FeeResult<PendingMonthsOutcome> {
    if count > max_count {
        return Err(FeeError::validation(
            "pendingMonths",
            format!("pendingMonths must be between 0 and {}", max_count),
        ));
    }
    let tx = conn.unchecked_transaction()?;
    let enrollment = get_enrollment(&tx, enrollment_id)?;
    if ledger::enrollment_has_collected(&tx, enrollment_id)? {
        warn!(enrollment_id, "pending months change refused: enrollment has collected fees");
        return Err(FeeError::Locked(
            "Pending months cannot be changed because fees have already been collected for this student"
                .to_string(),
        ));
    }

    let months = as_of.trailing(count);
    let amount = resolve_amount(&tx, &enrollment, as_of)?;

    let mut created = 0;
    if amount > 0 {
        for month in &months {
            if !ledger::monthly_fee_exists(&tx, enrollment_id, *month)? {
                ledger::insert_monthly_fee(&tx, enrollment_id, *month, amount, None)?;
                created += 1;
            }
        }
    }

    // Fees with any payment row, even un-collected, are kept.
    let keep: HashSet<String> = months.iter().map(|m| m.key()).collect();
    let existing: Vec<(String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT f.id, f.month
             FROM fees f
             WHERE f.enrollment_id = ? AND f.fee_type = 'monthly'
               AND NOT EXISTS (SELECT 1 FROM payments p WHERE p.fee_id = f.id)",
        )?;
        let rows = stmt
            .query_map([enrollment_id], |r| {
                Ok((r.get(0)?, r.get::<_, Option<String>>(1)?.unwrap_or_default()))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let mut deleted = 0;
    for (fee_id, month) in existing {
        if keep.contains(&month) {
            continue;
        }
        tx.execute("DELETE FROM fees WHERE id = ?", [&fee_id])?;
        deleted += 1;
    }
    tx.commit()?;

    info!(enrollment_id, count, amount, created, deleted, "pending months applied");
    Ok(PendingMonthsOutcome {
        enrollment_id: enrollment_id.to_string(),
        months,
        amount,
        created,
        deleted,
    })
}
