use chrono::Utc;
use fleet::models::{Id, Vehicle};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;
use tracing::info;

use super::{audit, count, soft_delete};
use crate::{
    database::{Database, is_unique_violation},
    error::AppError,
    utils::{Page, PageRequest, TenantId, require_non_empty},
};

const VEHICLE_COLUMNS: &str = "id, registration, model, capacity, created_at";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVehicle {
    pub registration: String,
    pub model: Option<String>,
    pub capacity: u32,
}

fn vehicle_from_row(row: &Row<'_>) -> rusqlite::Result<Vehicle> {
    Ok(Vehicle {
        id: row.get(0)?,
        registration: row.get(1)?,
        model: row.get(2)?,
        capacity: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn load_vehicle(conn: &Connection, tenant: &TenantId, id: Id) -> Result<Vehicle, AppError> {
    conn.query_row(
        &format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE tenant_id = ?1 AND id = ?2 AND is_deleted = 0"),
        params![tenant.as_str(), id],
        vehicle_from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound("Vehicle"))
}

pub async fn create_vehicle(db: &Database, tenant: TenantId, input: NewVehicle) -> Result<Vehicle, AppError> {
    let registration = require_non_empty("Registration", &input.registration)?.to_uppercase();
    if input.capacity == 0 {
        return Err(AppError::Validation("Capacity must be positive".to_string()));
    }

    let vehicle = db
        .call(move |conn| {
            let tx = conn.transaction()?;

            let inserted = tx.execute(
                "INSERT INTO vehicles (tenant_id, registration, model, capacity, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![tenant.as_str(), registration, input.model, input.capacity, Utc::now()],
            );
            match inserted {
                Err(e) if is_unique_violation(&e) => {
                    return Err(AppError::Duplicate(format!(
                        "Vehicle {registration} already exists"
                    )));
                }
                other => other?,
            };

            let id = tx.last_insert_rowid();
            audit::record(&tx, &tenant, "Vehicle", id, "Created", Some(registration.as_str()))?;
            let vehicle = load_vehicle(&tx, &tenant, id)?;

            tx.commit()?;
            Ok(vehicle)
        })
        .await?;

    info!("Created vehicle {} ({})", vehicle.id, vehicle.registration);
    Ok(vehicle)
}

pub async fn get_vehicle(db: &Database, tenant: TenantId, id: Id) -> Result<Vehicle, AppError> {
    db.call(move |conn| load_vehicle(conn, &tenant, id)).await
}

pub async fn list_vehicles(db: &Database, tenant: TenantId, page: PageRequest) -> Result<Page<Vehicle>, AppError> {
    db.call(move |conn| {
        let total = count(
            conn,
            "SELECT COUNT(*) FROM vehicles WHERE tenant_id = ?1 AND is_deleted = 0",
            [tenant.as_str()],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE tenant_id = ?1 AND is_deleted = 0
             ORDER BY registration LIMIT ?2 OFFSET ?3"
        ))?;
        let items = stmt
            .query_map(params![tenant.as_str(), page.limit(), page.offset()], vehicle_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, page, total))
    })
    .await
}

pub async fn delete_vehicle(db: &Database, tenant: TenantId, id: Id) -> Result<(), AppError> {
    db.call(move |conn| {
        let tx = conn.transaction()?;

        soft_delete(&tx, "vehicles", "Vehicle", &tenant, id)?;
        audit::record(&tx, &tenant, "Vehicle", id, "Deleted", None)?;

        tx.commit()?;
        Ok(())
    })
    .await
}
