use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::error::FeeResult;
use super::month::Month;
use super::period::{RatePeriod, Scope, ScopeType};
use super::store;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillSummary {
    pub baseline: Month,
    pub class_periods: usize,
    pub section_periods: usize,
}

fn legacy_rows(conn: &Connection, scope_type: ScopeType) -> FeeResult<Vec<(String, i64)>> {
    let sql = match scope_type {
        ScopeType::Class => {
            "SELECT c.id, c.default_monthly_fee FROM classes c
             WHERE c.default_monthly_fee > 0
               AND NOT EXISTS (SELECT 1 FROM rate_periods rp
                               WHERE rp.scope_type = 'class' AND rp.scope_id = c.id)
             ORDER BY c.id"
        }
        ScopeType::Section => {
            "SELECT s.id, s.monthly_fee FROM sections s
             WHERE s.monthly_fee > 0
               AND NOT EXISTS (SELECT 1 FROM rate_periods rp
                               WHERE rp.scope_type = 'section' AND rp.scope_id = s.id)
             ORDER BY s.id"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// Scopes that already have any period are skipped.
pub fn backfill_baseline_periods(conn: &Connection, baseline: Month) -> FeeResult<BackfillSummary> {
    let tx = conn.unchecked_transaction()?;
    let mut summary = BackfillSummary {
        baseline,
        class_periods: 0,
        section_periods: 0,
    };
    for scope_type in [ScopeType::Class, ScopeType::Section] {
        for (scope_id, amount) in legacy_rows(&tx, scope_type)? {
            let period = RatePeriod {
                id: Uuid::new_v4().to_string(),
                scope_type,
                scope_id,
                amount,
                effective_from: baseline,
                effective_to: None,
            };
            store::insert_period(&tx, &period)?;
            match scope_type {
                ScopeType::Class => summary.class_periods += 1,
                ScopeType::Section => summary.section_periods += 1,
            }
            debug!(scope = %Scope::new(scope_type, period.scope_id.clone()), amount, "baseline period seeded");
        }
    }
    tx.commit()?;
    info!(
        baseline = %baseline,
        class_periods = summary.class_periods,
        section_periods = summary.section_periods,
        "baseline fee periods backfilled"
    );
    Ok(summary)
}
