use chrono::{NaiveDate, Utc};
use fleet::{
    Position,
    models::{Id, Trip, TripStatus},
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;
use tracing::info;

use super::{audit, count, exists};
use crate::{
    database::{Database, parse_column},
    error::AppError,
    hub::{Notification, NotificationHub},
    utils::{Page, PageRequest, TenantId},
};

const TRIP_COLUMNS: &str = "id, route_id, vehicle_id, driver_id, scheduled_date, status,
     last_latitude, last_longitude, created_at";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrip {
    pub route_id: Id,
    pub vehicle_id: Id,
    pub driver_id: Id,
    pub scheduled_date: NaiveDate,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripFilter {
    pub date: Option<NaiveDate>,
    pub status: Option<TripStatus>,
}

fn trip_from_row(row: &Row<'_>) -> rusqlite::Result<Trip> {
    Ok(Trip {
        id: row.get(0)?,
        route_id: row.get(1)?,
        vehicle_id: row.get(2)?,
        driver_id: row.get(3)?,
        scheduled_date: row.get(4)?,
        status: parse_column(row, 5)?,
        last_latitude: row.get(6)?,
        last_longitude: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub(crate) fn load_trip(conn: &Connection, tenant: &TenantId, id: Id) -> Result<Trip, AppError> {
    conn.query_row(
        &format!("SELECT {TRIP_COLUMNS} FROM trips WHERE tenant_id = ?1 AND id = ?2 AND is_deleted = 0"),
        params![tenant.as_str(), id],
        trip_from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound("Trip"))
}

pub(crate) fn record_position(
    conn: &Connection,
    tenant: &TenantId,
    id: Id,
    position: Position,
) -> Result<(), AppError> {
    conn.execute(
        "UPDATE trips SET last_latitude = ?1, last_longitude = ?2 WHERE tenant_id = ?3 AND id = ?4",
        params![position.latitude, position.longitude, tenant.as_str(), id],
    )?;

    Ok(())
}

pub async fn create_trip(db: &Database, tenant: TenantId, input: NewTrip) -> Result<Trip, AppError> {
    let trip = db
        .call(move |conn| {
            let tx = conn.transaction()?;

            for (table, entity, id) in [
                ("routes", "Route", input.route_id),
                ("vehicles", "Vehicle", input.vehicle_id),
                ("drivers", "Driver", input.driver_id),
            ] {
                if !exists(&tx, table, &tenant, id)? {
                    return Err(AppError::NotFound(entity));
                }
            }

            tx.execute(
                "INSERT INTO trips (tenant_id, route_id, vehicle_id, driver_id, scheduled_date, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tenant.as_str(),
                    input.route_id,
                    input.vehicle_id,
                    input.driver_id,
                    input.scheduled_date,
                    TripStatus::Scheduled.as_str(),
                    Utc::now()
                ],
            )?;
            let id = tx.last_insert_rowid();

            audit::record(&tx, &tenant, "Trip", id, "Created", None)?;
            let trip = load_trip(&tx, &tenant, id)?;

            tx.commit()?;
            Ok(trip)
        })
        .await?;

    info!("Scheduled trip {} on route {}", trip.id, trip.route_id);
    Ok(trip)
}

pub async fn get_trip(db: &Database, tenant: TenantId, id: Id) -> Result<Trip, AppError> {
    db.call(move |conn| load_trip(conn, &tenant, id)).await
}

pub async fn list_trips(
    db: &Database,
    tenant: TenantId,
    filter: TripFilter,
    page: PageRequest,
) -> Result<Page<Trip>, AppError> {
    db.call(move |conn| {
        let where_clause = "tenant_id = ?1 AND is_deleted = 0
             AND (?2 IS NULL OR scheduled_date = ?2)
             AND (?3 IS NULL OR status = ?3)";
        let status = filter.status.map(|s| s.as_str());

        let total = count(
            conn,
            &format!("SELECT COUNT(*) FROM trips WHERE {where_clause}"),
            params![tenant.as_str(), filter.date, status],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE {where_clause}
             ORDER BY scheduled_date DESC, id DESC LIMIT ?4 OFFSET ?5"
        ))?;
        let items = stmt
            .query_map(
                params![tenant.as_str(), filter.date, status, page.limit(), page.offset()],
                trip_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, page, total))
    })
    .await
}

/// Move a trip through its lifecycle and tell the tenant's clients.
pub async fn transition_trip(
    db: &Database,
    hub: &NotificationHub,
    tenant: TenantId,
    id: Id,
    next: TripStatus,
) -> Result<Trip, AppError> {
    let trip = {
        let tenant = tenant.clone();

        db.call(move |conn| {
            let tx = conn.transaction()?;
            let trip = load_trip(&tx, &tenant, id)?;

            if !trip.status.can_transition_to(next) {
                return Err(AppError::InvalidState(format!(
                    "Cannot move trip from {} to {}",
                    trip.status, next
                )));
            }

            tx.execute(
                "UPDATE trips SET status = ?1 WHERE tenant_id = ?2 AND id = ?3",
                params![next.as_str(), tenant.as_str(), id],
            )?;
            let details = format!("{} -> {}", trip.status, next);
            audit::record(&tx, &tenant, "Trip", id, "StatusChanged", Some(details.as_str()))?;

            let trip = load_trip(&tx, &tenant, id)?;
            tx.commit()?;

            Ok(trip)
        })
        .await?
    };

    info!("Trip {id} is now {next}");
    hub.publish(
        &tenant,
        Notification::TripStatusChanged {
            trip_id: id,
            status: next,
            changed_at: Utc::now(),
        },
    );

    Ok(trip)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::{
        drivers::{NewDriver, create_driver},
        routes::{NewRoute, NewStop, create_route},
        vehicles::{NewVehicle, create_vehicle},
    };

    /// A route with the given stops plus a vehicle, driver and scheduled trip.
    pub(crate) async fn scheduled_trip(db: &Database, tenant: &TenantId, stops: &[(f64, f64)]) -> Trip {
        let route = create_route(
            db,
            tenant.clone(),
            NewRoute {
                name: "Route".into(),
                stops: stops
                    .iter()
                    .enumerate()
                    .map(|(i, (latitude, longitude))| NewStop {
                        name: format!("Stop {}", i + 1),
                        latitude: *latitude,
                        longitude: *longitude,
                    })
                    .collect(),
            },
        )
        .await
        .unwrap();
        let vehicle = create_vehicle(
            db,
            tenant.clone(),
            NewVehicle {
                registration: format!("BUS-{}", route.id),
                model: None,
                capacity: 40,
            },
        )
        .await
        .unwrap();
        let driver = create_driver(
            db,
            tenant.clone(),
            NewDriver {
                name: "Sam".into(),
                license_number: format!("LIC-{}", route.id),
                phone: None,
            },
        )
        .await
        .unwrap();

        create_trip(
            db,
            tenant.clone(),
            NewTrip {
                route_id: route.id,
                vehicle_id: vehicle.id,
                driver_id: driver.id,
                scheduled_date: Utc::now().date_naive(),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_publishes_status() {
        let db = Database::open_in_memory().unwrap();
        let hub = NotificationHub::default();
        let tenant = TenantId("north".into());
        let trip = scheduled_trip(&db, &tenant, &[(40.0, -86.0)]).await;
        assert_eq!(trip.status, TripStatus::Scheduled);

        let mut subscription = hub.subscribe(tenant.clone());

        let started = transition_trip(&db, &hub, tenant.clone(), trip.id, TripStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(started.status, TripStatus::InProgress);

        match subscription.recv().await {
            Some(Notification::TripStatusChanged { trip_id, status, .. }) => {
                assert_eq!(trip_id, trip.id);
                assert_eq!(status, TripStatus::InProgress);
            }
            other => panic!("unexpected {other:?}"),
        }

        transition_trip(&db, &hub, tenant.clone(), trip.id, TripStatus::Completed)
            .await
            .unwrap();
        let err = transition_trip(&db, &hub, tenant, trip.id, TripStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_missing_references() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());

        let err = create_trip(
            &db,
            tenant,
            NewTrip {
                route_id: 1,
                vehicle_id: 1,
                driver_id: 1,
                scheduled_date: Utc::now().date_naive(),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::NotFound("Route")));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let db = Database::open_in_memory().unwrap();
        let hub = NotificationHub::default();
        let tenant = TenantId("north".into());

        let first = scheduled_trip(&db, &tenant, &[(40.0, -86.0)]).await;
        scheduled_trip(&db, &tenant, &[(41.0, -86.0)]).await;
        transition_trip(&db, &hub, tenant.clone(), first.id, TripStatus::InProgress)
            .await
            .unwrap();

        let running = list_trips(
            &db,
            tenant.clone(),
            TripFilter {
                date: None,
                status: Some(TripStatus::InProgress),
            },
            PageRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(running.total_count, 1);
        assert_eq!(running.items[0].id, first.id);

        let today = list_trips(
            &db,
            tenant,
            TripFilter {
                date: Some(Utc::now().date_naive()),
                status: None,
            },
            PageRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(today.total_count, 2);
    }
}
