use chrono::Utc;
use fleet::models::{Driver, Id};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;
use tracing::info;

use super::{audit, count, soft_delete};
use crate::{
    database::{Database, is_unique_violation},
    error::AppError,
    utils::{Page, PageRequest, TenantId, require_non_empty},
};

const DRIVER_COLUMNS: &str = "id, name, license_number, phone, created_at";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDriver {
    pub name: String,
    pub license_number: String,
    pub phone: Option<String>,
}

fn driver_from_row(row: &Row<'_>) -> rusqlite::Result<Driver> {
    Ok(Driver {
        id: row.get(0)?,
        name: row.get(1)?,
        license_number: row.get(2)?,
        phone: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn load_driver(conn: &Connection, tenant: &TenantId, id: Id) -> Result<Driver, AppError> {
    conn.query_row(
        &format!("SELECT {DRIVER_COLUMNS} FROM drivers WHERE tenant_id = ?1 AND id = ?2 AND is_deleted = 0"),
        params![tenant.as_str(), id],
        driver_from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound("Driver"))
}

pub async fn create_driver(db: &Database, tenant: TenantId, input: NewDriver) -> Result<Driver, AppError> {
    let name = require_non_empty("Name", &input.name)?;
    let license = require_non_empty("License number", &input.license_number)?.to_uppercase();

    let driver = db
        .call(move |conn| {
            let tx = conn.transaction()?;

            let inserted = tx.execute(
                "INSERT INTO drivers (tenant_id, name, license_number, phone, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![tenant.as_str(), name, license, input.phone, Utc::now()],
            );
            match inserted {
                Err(e) if is_unique_violation(&e) => {
                    return Err(AppError::Duplicate(format!(
                        "Driver with license {license} already exists"
                    )));
                }
                other => other?,
            };

            let id = tx.last_insert_rowid();
            audit::record(&tx, &tenant, "Driver", id, "Created", Some(license.as_str()))?;
            let driver = load_driver(&tx, &tenant, id)?;

            tx.commit()?;
            Ok(driver)
        })
        .await?;

    info!("Created driver {}", driver.id);
    Ok(driver)
}

pub async fn get_driver(db: &Database, tenant: TenantId, id: Id) -> Result<Driver, AppError> {
    db.call(move |conn| load_driver(conn, &tenant, id)).await
}

pub async fn list_drivers(db: &Database, tenant: TenantId, page: PageRequest) -> Result<Page<Driver>, AppError> {
    db.call(move |conn| {
        let total = count(
            conn,
            "SELECT COUNT(*) FROM drivers WHERE tenant_id = ?1 AND is_deleted = 0",
            [tenant.as_str()],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {DRIVER_COLUMNS} FROM drivers WHERE tenant_id = ?1 AND is_deleted = 0
             ORDER BY name, id LIMIT ?2 OFFSET ?3"
        ))?;
        let items = stmt
            .query_map(params![tenant.as_str(), page.limit(), page.offset()], driver_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, page, total))
    })
    .await
}

pub async fn delete_driver(db: &Database, tenant: TenantId, id: Id) -> Result<(), AppError> {
    db.call(move |conn| {
        let tx = conn.transaction()?;

        soft_delete(&tx, "drivers", "Driver", &tenant, id)?;
        audit::record(&tx, &tenant, "Driver", id, "Deleted", None)?;

        tx.commit()?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_driver(license: &str) -> NewDriver {
        NewDriver {
            name: "Sam Driver".into(),
            license_number: license.into(),
            phone: Some("+15555550123".into()),
        }
    }

    #[tokio::test]
    async fn test_duplicate_license_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());

        create_driver(&db, tenant.clone(), new_driver("in-123")).await.unwrap();
        let err = create_driver(&db, tenant.clone(), new_driver("IN-123"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));

        // another tenant may reuse it
        create_driver(&db, TenantId("south".into()), new_driver("IN-123"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_then_list() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());

        let driver = create_driver(&db, tenant.clone(), new_driver("A1")).await.unwrap();
        create_driver(&db, tenant.clone(), new_driver("A2")).await.unwrap();
        delete_driver(&db, tenant.clone(), driver.id).await.unwrap();

        let page = list_drivers(&db, tenant, PageRequest::default()).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.items[0].license_number, "A2");
    }
}
