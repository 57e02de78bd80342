use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{FeeError, FeeResult, LOCKED_MESSAGE};
use super::ledger;
use super::legacy_sync;
use super::month::{Month, MonthRange};
use super::period::{inspect, RatePeriod, Scope, ScopeType, Timeline, TimelineFaults};
use super::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodInput {
    pub amount: i64,
    pub effective_from: Month,
    pub effective_to: Option<Month>,
}

impl PeriodInput {
    fn validate(&self) -> FeeResult<MonthRange> {
        ledger::check_amount("amount", self.amount)?;
        MonthRange::new(self.effective_from, self.effective_to)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutcome {
    pub period: RatePeriod,
    pub auto_closed: Option<RatePeriod>,
    pub legacy_amount: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub period: RatePeriod,
    pub repriced_fees: usize,
    pub legacy_amount: i64,
}

fn ensure_scope(conn: &Connection, scope: &Scope) -> FeeResult<()> {
    if store::scope_exists(conn, scope)? {
        return Ok(());
    }
    Err(FeeError::NotFound(match scope.scope_type {
        ScopeType::Class => "class",
        ScopeType::Section => "section",
    }))
}

fn locked(scope: &Scope, range: &MonthRange, action: &str) -> FeeError {
    warn!(scope = %scope, range = %range, action, "fee period change refused: collected fees in range");
    FeeError::Locked(LOCKED_MESSAGE.to_string())
}

fn plan_auto_close(
    conn: &Connection,
    timeline: &Timeline,
    new_from: Month,
) -> FeeResult<Option<RatePeriod>> {
    let Some(open) = timeline
        .open_period()
        .filter(|p| p.effective_from < new_from)
    else {
        return Ok(None);
    };
    let tail = MonthRange {
        from: new_from,
        to: None,
    };
    if ledger::collected_in_scope(conn, timeline.scope(), &tail)? {
        warn!(scope = %timeline.scope(), from = %new_from, "auto-close refused: collected fees after new start");
        return Err(FeeError::Locked(format!(
            "The current open period cannot be closed because collected fees exist from {} onwards",
            new_from
        )));
    }
    let mut closed = open.clone();
    closed.effective_to = Some(new_from.prev());
    Ok(Some(closed))
}

pub fn create_period(
    conn: &Connection,
    scope: &Scope,
    input: PeriodInput,
    as_of: Month,
) -> FeeResult<CreateOutcome> {
    let range = input.validate()?;
    ensure_scope(conn, scope)?;

    let tx = conn.unchecked_transaction()?;
    let mut timeline = store::load_timeline(&tx, scope)?;

    let auto_closed = if range.from > as_of {
        plan_auto_close(&tx, &timeline, range.from)?
    } else {
        None
    };
    if let Some(closed) = &auto_closed {
        timeline.admit(closed.clone())?;
    }

    let period = RatePeriod {
        id: Uuid::new_v4().to_string(),
        scope_type: scope.scope_type,
        scope_id: scope.scope_id.clone(),
        amount: input.amount,
        effective_from: range.from,
        effective_to: range.to,
    };
    timeline.admit(period.clone())?;

    if let Some(closed) = &auto_closed {
        store::update_period_row(&tx, closed)?;
        info!(scope = %scope, period_id = %closed.id, closed_to = ?closed.effective_to, "open fee period auto-closed");
    }
    store::insert_period(&tx, &period)?;
    let legacy_amount = legacy_sync::sync(&tx, scope, as_of)?;
    tx.commit()?;

    info!(scope = %scope, period_id = %period.id, range = %range, amount = period.amount, "fee period created");
    Ok(CreateOutcome {
        period,
        auto_closed,
        legacy_amount,
    })
}

pub fn update_period(
    conn: &Connection,
    period_id: &str,
    input: PeriodInput,
    as_of: Month,
) -> FeeResult<UpdateOutcome> {
    let range = input.validate()?;

    let tx = conn.unchecked_transaction()?;
    let existing = store::get_period(&tx, period_id)?;
    let scope = existing.scope();
    let mut timeline = store::load_timeline(&tx, &scope)?;

    if ledger::collected_in_scope(&tx, &scope, &existing.range())? {
        return Err(locked(&scope, &existing.range(), "update"));
    }
    // Moving the bounds onto collected months would re-attribute them too.
    if ledger::collected_in_scope(&tx, &scope, &range)? {
        return Err(locked(&scope, &range, "update"));
    }

    let updated = RatePeriod {
        amount: input.amount,
        effective_from: range.from,
        effective_to: range.to,
        ..existing
    };
    timeline.admit(updated.clone())?;

    store::update_period_row(&tx, &updated)?;
    let legacy_amount = legacy_sync::sync(&tx, &scope, as_of)?;
    let repriced_fees = ledger::reprice_unpaid(&tx, &scope, &range, updated.amount)?;
    tx.commit()?;

    info!(scope = %scope, period_id = %updated.id, range = %range, amount = updated.amount, repriced_fees, "fee period updated");
    Ok(UpdateOutcome {
        period: updated,
        repriced_fees,
        legacy_amount,
    })
}

// Fees billed under the period keep their amounts.
pub fn delete_period(conn: &Connection, period_id: &str, as_of: Month) -> FeeResult<RatePeriod> {
    let tx = conn.unchecked_transaction()?;
    let existing = store::get_period(&tx, period_id)?;
    let scope = existing.scope();
    if ledger::collected_in_scope(&tx, &scope, &existing.range())? {
        return Err(locked(&scope, &existing.range(), "delete"));
    }
    store::delete_period_row(&tx, period_id)?;
    legacy_sync::sync(&tx, &scope, as_of)?;
    tx.commit()?;

    info!(scope = %scope, period_id, "fee period deleted");
    Ok(existing)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeAudit {
    pub scope: Scope,
    pub faults: TimelineFaults,
}

pub fn audit(conn: &Connection) -> FeeResult<Vec<ScopeAudit>> {
    let mut out = Vec::new();
    for scope in store::scopes_with_periods(conn)? {
        let faults = inspect(&store::list_periods(conn, &scope)?);
        if !faults.is_clean() {
            out.push(ScopeAudit { scope, faults });
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairOutcome {
    pub closed: Vec<RatePeriod>,
    pub remaining: TimelineFaults,
}

/// Closes every open period but the latest at the month before the next one
/// starts. Overlaps among closed periods are only reported.
pub fn repair_open_periods(conn: &Connection, scope: &Scope, as_of: Month) -> FeeResult<RepairOutcome> {
    ensure_scope(conn, scope)?;
    let tx = conn.unchecked_transaction()?;
    let mut periods = store::list_periods(&tx, scope)?;

    let open_starts: Vec<Month> = periods
        .iter()
        .filter(|p| p.is_open())
        .map(|p| p.effective_from)
        .collect();
    let mut closed = Vec::new();
    for p in periods.iter_mut().filter(|p| p.is_open()) {
        let next_open = open_starts.iter().copied().find(|m| *m > p.effective_from);
        if let Some(next) = next_open {
            p.effective_to = Some(next.prev());
            store::update_period_row(&tx, p)?;
            closed.push(p.clone());
        }
    }
    if !closed.is_empty() {
        legacy_sync::sync(&tx, scope, as_of)?;
    }
    let remaining = inspect(&periods);
    tx.commit()?;

    info!(scope = %scope, closed = closed.len(), clean = remaining.is_clean(), "fee timeline repair finished");
    Ok(RepairOutcome { closed, remaining })
}
