use chrono::Utc;
use fleet::{
    Position,
    models::{Id, Route, Stop},
};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;
use tracing::info;

use super::{audit, count, soft_delete};
use crate::{
    database::Database,
    error::AppError,
    utils::{Page, PageRequest, TenantId, require_non_empty},
};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStop {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoute {
    pub name: String,
    /// Riding order.
    pub stops: Vec<NewStop>,
}

pub(crate) fn load_stops(conn: &Connection, tenant: &TenantId, route_id: Id) -> Result<Vec<Stop>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT id, route_id, name, latitude, longitude, sequence FROM stops
         WHERE tenant_id = ?1 AND route_id = ?2 ORDER BY sequence",
    )?;

    let stops = stmt
        .query_map(params![tenant.as_str(), route_id], |row| {
            Ok(Stop {
                id: row.get(0)?,
                route_id: row.get(1)?,
                name: row.get(2)?,
                latitude: row.get(3)?,
                longitude: row.get(4)?,
                sequence: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(stops)
}

pub(crate) fn load_route(conn: &Connection, tenant: &TenantId, id: Id) -> Result<Route, AppError> {
    let (name, created_at) = conn
        .query_row(
            "SELECT name, created_at FROM routes WHERE tenant_id = ?1 AND id = ?2 AND is_deleted = 0",
            params![tenant.as_str(), id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or(AppError::NotFound("Route"))?;

    Ok(Route {
        id,
        name,
        stops: load_stops(conn, tenant, id)?,
        created_at,
    })
}

pub fn insert_route(conn: &mut Connection, tenant: &TenantId, input: &NewRoute) -> Result<Route, AppError> {
    let name = require_non_empty("Route name", &input.name)?;

    if input.stops.is_empty() {
        return Err(AppError::Validation("A route needs at least one stop".to_string()));
    }
    for stop in &input.stops {
        require_non_empty("Stop name", &stop.name)?;
        if !Position::new(stop.latitude, stop.longitude).is_valid() {
            return Err(AppError::Validation(format!(
                "Stop {} has invalid coordinates",
                stop.name.trim()
            )));
        }
    }

    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO routes (tenant_id, name, created_at) VALUES (?1, ?2, ?3)",
        params![tenant.as_str(), name, Utc::now()],
    )?;
    let route_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO stops (tenant_id, route_id, name, latitude, longitude, sequence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (sequence, stop) in input.stops.iter().enumerate() {
            stmt.execute(params![
                tenant.as_str(),
                route_id,
                stop.name.trim(),
                stop.latitude,
                stop.longitude,
                sequence as u32 + 1
            ])?;
        }
    }

    let details = format!("{} stops", input.stops.len());
    audit::record(&tx, tenant, "Route", route_id, "Created", Some(details.as_str()))?;
    let route = load_route(&tx, tenant, route_id)?;

    tx.commit()?;
    Ok(route)
}

pub async fn create_route(db: &Database, tenant: TenantId, input: NewRoute) -> Result<Route, AppError> {
    let route = db.call(move |conn| insert_route(conn, &tenant, &input)).await?;

    info!("Created route {} with {} stops", route.id, route.stops.len());
    Ok(route)
}

pub async fn get_route(db: &Database, tenant: TenantId, id: Id) -> Result<Route, AppError> {
    db.call(move |conn| load_route(conn, &tenant, id)).await
}

pub async fn list_routes(db: &Database, tenant: TenantId, page: PageRequest) -> Result<Page<Route>, AppError> {
    db.call(move |conn| {
        let total = count(
            conn,
            "SELECT COUNT(*) FROM routes WHERE tenant_id = ?1 AND is_deleted = 0",
            [tenant.as_str()],
        )?;

        let ids = {
            let mut stmt = conn.prepare(
                "SELECT id FROM routes WHERE tenant_id = ?1 AND is_deleted = 0
                 ORDER BY name, id LIMIT ?2 OFFSET ?3",
            )?;
            let ids = stmt
                .query_map(params![tenant.as_str(), page.limit(), page.offset()], |r| r.get(0))?
                .collect::<Result<Vec<Id>, _>>()?;
            ids
        };

        let items = ids
            .into_iter()
            .map(|id| load_route(conn, &tenant, id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, page, total))
    })
    .await
}

pub async fn delete_route(db: &Database, tenant: TenantId, id: Id) -> Result<(), AppError> {
    db.call(move |conn| {
        let tx = conn.transaction()?;

        soft_delete(&tx, "routes", "Route", &tenant, id)?;
        audit::record(&tx, &tenant, "Route", id, "Deleted", None)?;

        tx.commit()?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(name: &str, latitude: f64, longitude: f64) -> NewStop {
        NewStop {
            name: name.into(),
            latitude,
            longitude,
        }
    }

    #[tokio::test]
    async fn test_stops_keep_riding_order() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());

        let route = create_route(
            &db,
            tenant.clone(),
            NewRoute {
                name: "North Loop".into(),
                stops: vec![
                    stop("Zinnia Ct", 40.43, -86.91),
                    stop("Ash St", 40.44, -86.92),
                    stop("Maple Ave", 40.45, -86.93),
                ],
            },
        )
        .await
        .unwrap();

        let names: Vec<_> = route.stops.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Zinnia Ct", "Ash St", "Maple Ave"]);
        assert_eq!(route.stops[2].sequence, 3);

        let listed = list_routes(&db, tenant, PageRequest::default()).await.unwrap();
        assert_eq!(listed.total_count, 1);
        assert_eq!(listed.items[0].stops.len(), 3);
    }

    #[tokio::test]
    async fn test_rejects_empty_and_out_of_range() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());

        let empty = create_route(
            &db,
            tenant.clone(),
            NewRoute {
                name: "Empty".into(),
                stops: vec![],
            },
        )
        .await;
        assert!(matches!(empty, Err(AppError::Validation(_))));

        let bad = create_route(
            &db,
            tenant,
            NewRoute {
                name: "Bad".into(),
                stops: vec![stop("Nowhere", 123.0, 0.0)],
            },
        )
        .await;
        assert!(matches!(bad, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_deleted_route_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());
        let route = create_route(
            &db,
            tenant.clone(),
            NewRoute {
                name: "Short".into(),
                stops: vec![stop("Only", 40.0, -86.0)],
            },
        )
        .await
        .unwrap();

        delete_route(&db, tenant.clone(), route.id).await.unwrap();
        assert!(matches!(
            get_route(&db, tenant, route.id).await,
            Err(AppError::NotFound("Route"))
        ));
    }
}
