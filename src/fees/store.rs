use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};

use super::error::{FeeError, FeeResult};
use super::month::Month;
use super::period::{RatePeriod, Scope, ScopeType, Timeline};

const PERIOD_COLUMNS: &str = "id, scope_type, scope_id, amount, effective_from, effective_to";

fn month_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Month>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(s) => Month::from_sql(&s).map(Some).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                Type::Text,
                format!("invalid month value: {}", s).into(),
            )
        }),
    }
}

fn period_from_row(row: &Row<'_>) -> rusqlite::Result<RatePeriod> {
    let scope_raw: String = row.get(1)?;
    let scope_type = ScopeType::parse(&scope_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            format!("invalid scope_type: {}", scope_raw).into(),
        )
    })?;
    let effective_from = month_column(row, 4)?.ok_or(rusqlite::Error::InvalidColumnType(
        4,
        "effective_from".to_string(),
        Type::Null,
    ))?;
    Ok(RatePeriod {
        id: row.get(0)?,
        scope_type,
        scope_id: row.get(2)?,
        amount: row.get(3)?,
        effective_from,
        effective_to: month_column(row, 5)?,
    })
}

pub fn scope_exists(conn: &Connection, scope: &Scope) -> FeeResult<bool> {
    let sql = match scope.scope_type {
        ScopeType::Class => "SELECT 1 FROM classes WHERE id = ?",
        ScopeType::Section => "SELECT 1 FROM sections WHERE id = ?",
    };
    Ok(conn
        .query_row(sql, [&scope.scope_id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

pub fn list_periods(conn: &Connection, scope: &Scope) -> FeeResult<Vec<RatePeriod>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PERIOD_COLUMNS}
         FROM rate_periods
         WHERE scope_type = ? AND scope_id = ?
         ORDER BY effective_from"
    ))?;
    let rows = stmt
        .query_map((scope.scope_type.as_str(), &scope.scope_id), period_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_timeline(conn: &Connection, scope: &Scope) -> FeeResult<Timeline> {
    Timeline::try_new(scope.clone(), list_periods(conn, scope)?)
}

pub fn get_period(conn: &Connection, period_id: &str) -> FeeResult<RatePeriod> {
    conn.query_row(
        &format!("SELECT {PERIOD_COLUMNS} FROM rate_periods WHERE id = ?"),
        [period_id],
        period_from_row,
    )
    .optional()?
    .ok_or(FeeError::NotFound("fee period"))
}

// Raw rows: still answers on a timeline that needs repair.
pub fn active_period_at(
    conn: &Connection,
    scope: &Scope,
    month: Month,
) -> FeeResult<Option<RatePeriod>> {
    let day = month.first_day();
    Ok(conn
        .query_row(
            &format!(
                "SELECT {PERIOD_COLUMNS}
                 FROM rate_periods
                 WHERE scope_type = ? AND scope_id = ?
                   AND effective_from <= ?
                   AND (effective_to IS NULL OR effective_to >= ?)
                 ORDER BY effective_from DESC
                 LIMIT 1"
            ),
            (scope.scope_type.as_str(), &scope.scope_id, &day, &day),
            period_from_row,
        )
        .optional()?)
}

pub fn insert_period(conn: &Connection, period: &RatePeriod) -> FeeResult<()> {
    let now = crate::db::now_timestamp();
    conn.execute(
        "INSERT INTO rate_periods(id, scope_type, scope_id, amount, effective_from, effective_to, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &period.id,
            period.scope_type.as_str(),
            &period.scope_id,
            period.amount,
            period.effective_from.first_day(),
            period.effective_to.map(Month::first_day),
            &now,
            &now,
        ),
    )?;
    Ok(())
}

pub fn update_period_row(conn: &Connection, period: &RatePeriod) -> FeeResult<()> {
    conn.execute(
        "UPDATE rate_periods
         SET amount = ?, effective_from = ?, effective_to = ?, updated_at = ?
         WHERE id = ?",
        (
            period.amount,
            period.effective_from.first_day(),
            period.effective_to.map(Month::first_day),
            crate::db::now_timestamp(),
            &period.id,
        ),
    )?;
    Ok(())
}

pub fn delete_period_row(conn: &Connection, period_id: &str) -> FeeResult<()> {
    conn.execute("DELETE FROM rate_periods WHERE id = ?", [period_id])?;
    Ok(())
}

pub fn scopes_with_periods(conn: &Connection) -> FeeResult<Vec<Scope>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT scope_type, scope_id FROM rate_periods ORDER BY scope_type, scope_id",
    )?;
    let raw = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(raw
        .into_iter()
        .filter_map(|(t, id)| ScopeType::parse(&t).map(|st| Scope::new(st, id)))
        .collect())
}
