use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use super::error::{FeeError, FeeResult};
use super::month::{Month, MonthRange};
use super::period::{Scope, ScopeType};
use crate::db::now_timestamp;

pub const MAX_AMOUNT: i64 = 1_000_000_000;

pub fn check_amount(field: &str, amount: i64) -> FeeResult<()> {
    if !(0..=MAX_AMOUNT).contains(&amount) {
        return Err(FeeError::validation(
            field,
            format!("{} must be between 0 and {}", field, MAX_AMOUNT),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRow {
    pub id: String,
    pub enrollment_id: String,
    pub fee_type: String,
    pub source: String,
    pub month: Option<String>,
    pub amount: i64,
    pub is_locked: bool,
    pub batch_id: Option<String>,
    pub description: Option<String>,
    pub paid_amount: i64,
    pub collected: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub fee_id: String,
    pub amount_paid: i64,
    pub paid_at: String,
}

fn enrollment_column(scope_type: ScopeType) -> &'static str {
    match scope_type {
        ScopeType::Class => "class_id",
        ScopeType::Section => "section_id",
    }
}

pub fn monthly_fee_exists(conn: &Connection, enrollment_id: &str, month: Month) -> FeeResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM fees WHERE enrollment_id = ? AND fee_type = 'monthly' AND month = ? LIMIT 1",
            (enrollment_id, month.key()),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

pub fn insert_monthly_fee(
    conn: &Connection,
    enrollment_id: &str,
    month: Month,
    amount: i64,
    batch_id: Option<&str>,
) -> FeeResult<String> {
    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO fees(id, enrollment_id, fee_type, source, month, amount, is_locked, batch_id, created_at, updated_at)
         VALUES(?, ?, 'monthly', 'monthly', ?, ?, 0, ?, ?, ?)",
        (&id, enrollment_id, month.key(), amount, batch_id, &now, &now),
    )?;
    Ok(id)
}

pub fn insert_custom_fee(
    conn: &Connection,
    enrollment_id: &str,
    amount: i64,
    description: &str,
) -> FeeResult<String> {
    check_amount("amount", amount)?;
    if amount == 0 {
        return Err(FeeError::validation("amount", "amount must be greater than zero"));
    }
    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO fees(id, enrollment_id, fee_type, source, month, amount, is_locked, description, created_at, updated_at)
         VALUES(?, ?, 'custom', 'custom', NULL, ?, 0, ?, ?, ?)",
        (&id, enrollment_id, amount, description, &now, &now),
    )?;
    Ok(id)
}

pub fn collected_in_scope(conn: &Connection, scope: &Scope, range: &MonthRange) -> FeeResult<bool> {
    let sql = format!(
        "SELECT EXISTS(
           SELECT 1
           FROM payments p
           JOIN fees f ON f.id = p.fee_id
           JOIN enrollments e ON e.id = f.enrollment_id
           WHERE p.deleted_at IS NULL
             AND f.fee_type = 'monthly'
             AND e.{} = ?1
             AND f.month >= ?2
             AND (?3 IS NULL OR f.month <= ?3)
         )",
        enrollment_column(scope.scope_type)
    );
    let found: i64 = conn.query_row(
        &sql,
        (&scope.scope_id, range.from.key(), range.to.map(Month::key)),
        |r| r.get(0),
    )?;
    Ok(found != 0)
}

pub fn enrollment_has_collected(conn: &Connection, enrollment_id: &str) -> FeeResult<bool> {
    let found: i64 = conn.query_row(
        "SELECT EXISTS(
           SELECT 1 FROM payments p
           JOIN fees f ON f.id = p.fee_id
           WHERE f.enrollment_id = ? AND p.deleted_at IS NULL
         )",
        [enrollment_id],
        |r| r.get(0),
    )?;
    Ok(found != 0)
}

// Class scope skips months where the section has its own positive period.
pub fn reprice_unpaid(conn: &Connection, scope: &Scope, range: &MonthRange, amount: i64) -> FeeResult<usize> {
    let section_override = match scope.scope_type {
        ScopeType::Section => "",
        ScopeType::Class => {
            "AND NOT EXISTS (
               SELECT 1
               FROM enrollments e2
               JOIN rate_periods rp ON rp.scope_type = 'section' AND rp.scope_id = e2.section_id
               WHERE e2.id = fees.enrollment_id
                 AND rp.amount > 0
                 AND rp.effective_from <= fees.month || '-01'
                 AND (rp.effective_to IS NULL OR rp.effective_to >= fees.month || '-01')
             )"
        }
    };
    let sql = format!(
        "UPDATE fees
         SET amount = ?1, updated_at = ?2
         WHERE fee_type = 'monthly'
           AND month >= ?3
           AND (?4 IS NULL OR month <= ?4)
           AND enrollment_id IN (
             SELECT id FROM enrollments WHERE {} = ?5 AND student_type = 'paid'
           )
           AND NOT EXISTS (
             SELECT 1 FROM payments p WHERE p.fee_id = fees.id AND p.deleted_at IS NULL
           )
           {}",
        enrollment_column(scope.scope_type),
        section_override
    );
    let changed = conn.execute(
        &sql,
        (
            amount.max(0),
            now_timestamp(),
            range.from.key(),
            range.to.map(Month::key),
            &scope.scope_id,
        ),
    )?;
    Ok(changed)
}

pub fn record_payment(conn: &Connection, fee_id: &str, amount_paid: i64, paid_at: &str) -> FeeResult<Payment> {
    check_amount("amountPaid", amount_paid)?;
    if amount_paid == 0 {
        return Err(FeeError::validation(
            "amountPaid",
            "amount paid must be greater than zero",
        ));
    }
    let tx = conn.unchecked_transaction()?;
    let fee_exists = tx
        .query_row("SELECT 1 FROM fees WHERE id = ?", [fee_id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some();
    if !fee_exists {
        return Err(FeeError::NotFound("fee"));
    }
    let payment = Payment {
        id: Uuid::new_v4().to_string(),
        fee_id: fee_id.to_string(),
        amount_paid,
        paid_at: paid_at.to_string(),
    };
    tx.execute(
        "INSERT INTO payments(id, fee_id, amount_paid, paid_at) VALUES(?, ?, ?, ?)",
        (&payment.id, &payment.fee_id, payment.amount_paid, &payment.paid_at),
    )?;
    tx.execute(
        "UPDATE fees SET is_locked = 1, updated_at = ? WHERE id = ?",
        (now_timestamp(), fee_id),
    )?;
    tx.commit()?;
    Ok(payment)
}

/// Returns whether the fee is still collected.
pub fn uncollect_payment(conn: &Connection, payment_id: &str) -> FeeResult<bool> {
    let tx = conn.unchecked_transaction()?;
    let row: Option<(String, Option<String>)> = tx
        .query_row(
            "SELECT fee_id, deleted_at FROM payments WHERE id = ?",
            [payment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((fee_id, deleted_at)) = row else {
        return Err(FeeError::NotFound("payment"));
    };
    if deleted_at.is_some() {
        return Err(FeeError::validation("paymentId", "payment is already un-collected"));
    }
    let now = now_timestamp();
    tx.execute(
        "UPDATE payments SET deleted_at = ? WHERE id = ?",
        (&now, payment_id),
    )?;
    let still_collected: i64 = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM payments WHERE fee_id = ? AND deleted_at IS NULL)",
        [&fee_id],
        |r| r.get(0),
    )?;
    if still_collected == 0 {
        tx.execute(
            "UPDATE fees SET is_locked = 0, updated_at = ? WHERE id = ?",
            (&now, &fee_id),
        )?;
    }
    tx.commit()?;
    Ok(still_collected != 0)
}

pub fn list_fees(conn: &Connection, enrollment_id: &str) -> FeeResult<Vec<FeeRow>> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.enrollment_id, f.fee_type, f.source, f.month, f.amount, f.is_locked,
                f.batch_id, f.description,
                COALESCE((SELECT SUM(p.amount_paid) FROM payments p
                          WHERE p.fee_id = f.id AND p.deleted_at IS NULL), 0) AS paid_amount
         FROM fees f
         WHERE f.enrollment_id = ?
         ORDER BY f.fee_type DESC, f.month, f.created_at",
    )?;
    let rows = stmt
        .query_map([enrollment_id], fee_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fee_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<FeeRow> {
    let paid_amount: i64 = r.get(9)?;
    Ok(FeeRow {
        id: r.get(0)?,
        enrollment_id: r.get(1)?,
        fee_type: r.get(2)?,
        source: r.get(3)?,
        month: r.get(4)?,
        amount: r.get(5)?,
        is_locked: r.get::<_, i64>(6)? != 0,
        batch_id: r.get(7)?,
        description: r.get(8)?,
        paid_amount,
        collected: paid_amount > 0,
    })
}
