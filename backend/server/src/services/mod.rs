//! Request-scoped services. Each takes the tenant of the caller and returns
//! `Result<_, AppError>`; persistence goes through [`Database::call`].
//!
//! [`Database::call`]: crate::database::Database::call

pub mod attendance;
pub mod audit;
pub mod drivers;
pub mod geofence;
pub mod mfa;
pub mod payments;
pub mod routes;
pub mod security;
pub mod students;
pub mod trips;
pub mod vehicles;

use fleet::models::Id;
use rusqlite::{Connection, params};

use crate::{error::AppError, utils::TenantId};

/// Flag a live row as deleted. Fails with `NotFound` if there was none.
pub(crate) fn soft_delete(
    conn: &Connection,
    table: &'static str,
    entity: &'static str,
    tenant: &TenantId,
    id: Id,
) -> Result<(), AppError> {
    let changed = conn.execute(
        &format!("UPDATE {table} SET is_deleted = 1 WHERE tenant_id = ?1 AND id = ?2 AND is_deleted = 0"),
        params![tenant.as_str(), id],
    )?;

    if changed == 0 {
        return Err(AppError::NotFound(entity));
    }

    Ok(())
}

/// Whether a live row with `id` exists for the tenant.
pub(crate) fn exists(
    conn: &Connection,
    table: &'static str,
    tenant: &TenantId,
    id: Id,
) -> Result<bool, AppError> {
    let found = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE tenant_id = ?1 AND id = ?2 AND is_deleted = 0)"),
        params![tenant.as_str(), id],
        |r| r.get(0),
    )?;

    Ok(found)
}

pub(crate) fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<i64, AppError> {
    Ok(conn.query_row(sql, params, |r| r.get(0))?)
}
