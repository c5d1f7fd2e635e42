//! Audit trail. Entries are written on the caller's connection so they land
//! in the same transaction as the change they describe.
use chrono::Utc;
use fleet::models::{AuditEntry, Id};
use rusqlite::{Connection, params};

use crate::{
    database::Database,
    error::AppError,
    utils::{Page, PageRequest, TenantId},
};

pub fn record(
    conn: &Connection,
    tenant: &TenantId,
    entity: &str,
    entity_id: Id,
    action: &str,
    details: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO audit_log (tenant_id, entity, entity_id, action, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![tenant.as_str(), entity, entity_id, action, details, Utc::now()],
    )?;

    Ok(())
}

pub async fn list_audit(
    db: &Database,
    tenant: TenantId,
    page: PageRequest,
) -> Result<Page<AuditEntry>, AppError> {
    db.call(move |conn| {
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE tenant_id = ?1",
            [tenant.as_str()],
            |r| r.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT id, entity, entity_id, action, details, created_at
             FROM audit_log WHERE tenant_id = ?1
             ORDER BY id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let items = stmt
            .query_map(params![tenant.as_str(), page.limit(), page.offset()], |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    entity: row.get(1)?,
                    entity_id: row.get(2)?,
                    action: row.get(3)?,
                    details: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, page, total))
    })
    .await
}
