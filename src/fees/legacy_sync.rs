use rusqlite::Connection;
use tracing::debug;

use super::error::FeeResult;
use super::month::Month;
use super::period::{Scope, ScopeType};
use super::store;

pub fn sync(conn: &Connection, scope: &Scope, as_of: Month) -> FeeResult<i64> {
    let amount = store::active_period_at(conn, scope, as_of)?
        .map(|p| p.amount)
        .unwrap_or(0);
    let sql = match scope.scope_type {
        ScopeType::Class => "UPDATE classes SET default_monthly_fee = ? WHERE id = ?",
        ScopeType::Section => "UPDATE sections SET monthly_fee = ? WHERE id = ?",
    };
    conn.execute(sql, (amount, &scope.scope_id))?;
    debug!(scope = %scope, as_of = %as_of, amount, "legacy fee column synced");
    Ok(amount)
}
