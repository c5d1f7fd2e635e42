//! # Geofence
//!
//! Proximity rules evaluated against a vehicle position and the stops of the
//! trip's route.
//!
//! ## Student not boarded
//!
//! For every stop within the radius, every student assigned to that stop
//! without a `Present` attendance record dated today gets one alert. Severity
//! is `High` at or under 0.1 km from the stop, `Medium` beyond.
//!
//! Two flows use it with different radii:
//! - attendance check, 0.5 km
//! - live tracking, 2 km (the allowed deviation)
//!
//! ## Tracking extras
//!
//! - `RouteDeviation` when the nearest stop is further than the allowed
//!   deviation, `High` past twice the allowance
//! - `SpeedViolation` over the speed limit, `High` past 125% of it
//!
//! Alerts are written once and never updated. `High` tracking alerts are
//! pushed to the tenant as emergency alerts.
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use fleet::{
    Position, geo,
    models::{AttendanceStatus, GeofenceAlert, Id, Severity, Stop, Student, TripStatus, ViolationType},
};
use rusqlite::{Connection, Row, params};
use serde::Deserialize;
use tracing::{info, warn};

use super::{count, routes::load_route, students::students_at_stops, trips};
use crate::{
    database::{Database, parse_column},
    error::AppError,
    hub::{Notification, NotificationHub},
    utils::{Page, PageRequest, TenantId},
};

pub const HIGH_SEVERITY_RADIUS_KM: f64 = 0.1;
pub const SPEED_HIGH_SEVERITY_FACTOR: f64 = 1.25;

/// Thresholds for the live tracking flow.
#[derive(Clone, Copy, Debug)]
pub struct TrackingLimits {
    pub allowed_deviation_km: f64,
    pub speed_limit_kmh: f64,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: Option<f64>,
}

impl VehicleLocation {
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}

pub fn severity_for_distance(distance_km: f64) -> Severity {
    if distance_km <= HIGH_SEVERITY_RADIUS_KM {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Students at stops within `radius_km` of `position` who are not in `present`.
pub fn evaluate_not_boarded(
    trip_id: Id,
    position: Position,
    stops: &[Stop],
    students: &[Student],
    present: &HashSet<Id>,
    radius_km: f64,
    now: DateTime<Utc>,
) -> Vec<GeofenceAlert> {
    let mut alerts = Vec::new();

    for stop in stops {
        let distance = geo::haversine_km(position, stop.position());
        if distance > radius_km {
            continue;
        }

        let missing = students
            .iter()
            .filter(|s| s.stop_id == Some(stop.id) && !present.contains(&s.id));

        for student in missing {
            alerts.push(GeofenceAlert {
                id: None,
                trip_id,
                student_id: Some(student.id),
                stop_id: Some(stop.id),
                violation_type: ViolationType::StudentNotBoarded,
                severity: severity_for_distance(distance),
                description: format!(
                    "{}: {} has not boarded at {} ({distance:.2} km away)",
                    ViolationType::StudentNotBoarded.label(),
                    student.full_name(),
                    stop.name
                ),
                distance_km: Some(distance),
                created_at: now,
            });
        }
    }

    alerts
}

/// Alert when no stop is within the allowed deviation.
pub fn evaluate_route_deviation(
    trip_id: Id,
    position: Position,
    stops: &[Stop],
    allowed_deviation_km: f64,
    now: DateTime<Utc>,
) -> Option<GeofenceAlert> {
    let positions: Vec<Position> = stops.iter().map(Stop::position).collect();
    let (index, distance) = geo::nearest(position, &positions)?;

    if distance <= allowed_deviation_km {
        return None;
    }

    let severity = if distance > 2.0 * allowed_deviation_km {
        Severity::High
    } else {
        Severity::Medium
    };

    Some(GeofenceAlert {
        id: None,
        trip_id,
        student_id: None,
        stop_id: Some(stops[index].id),
        violation_type: ViolationType::RouteDeviation,
        severity,
        description: format!(
            "{}: vehicle is {distance:.2} km from the nearest stop {} (allowed {allowed_deviation_km:.2} km)",
            ViolationType::RouteDeviation.label(),
            stops[index].name
        ),
        distance_km: Some(distance),
        created_at: now,
    })
}

pub fn evaluate_speed(trip_id: Id, speed_kmh: f64, speed_limit_kmh: f64, now: DateTime<Utc>) -> Option<GeofenceAlert> {
    if speed_kmh <= speed_limit_kmh {
        return None;
    }

    let severity = if speed_kmh > speed_limit_kmh * SPEED_HIGH_SEVERITY_FACTOR {
        Severity::High
    } else {
        Severity::Medium
    };

    Some(GeofenceAlert {
        id: None,
        trip_id,
        student_id: None,
        stop_id: None,
        violation_type: ViolationType::SpeedViolation,
        severity,
        description: format!(
            "{}: {speed_kmh:.0} km/h in a {speed_limit_kmh:.0} km/h limit",
            ViolationType::SpeedViolation.label()
        ),
        distance_km: None,
        created_at: now,
    })
}

/// Students with a `Present` record dated `now`'s day, on any trip.
fn present_today(conn: &Connection, tenant: &TenantId, now: DateTime<Utc>) -> Result<HashSet<Id>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM attendance
         WHERE tenant_id = ?1 AND date = ?2 AND status = ?3 AND is_deleted = 0",
    )?;

    let ids = stmt
        .query_map(
            params![tenant.as_str(), now.date_naive(), AttendanceStatus::Present.as_str()],
            |r| r.get(0),
        )?
        .collect::<Result<HashSet<Id>, _>>()?;

    Ok(ids)
}

fn insert_alerts(conn: &Connection, tenant: &TenantId, alerts: &mut [GeofenceAlert]) -> Result<(), AppError> {
    let mut stmt = conn.prepare(
        "INSERT INTO geofence_alerts
             (tenant_id, trip_id, student_id, stop_id, violation_type, severity, description, distance_km, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;

    for alert in alerts.iter_mut() {
        stmt.execute(params![
            tenant.as_str(),
            alert.trip_id,
            alert.student_id,
            alert.stop_id,
            alert.violation_type.as_str(),
            alert.severity.as_str(),
            alert.description,
            alert.distance_km,
            alert.created_at
        ])?;
        alert.id = Some(conn.last_insert_rowid());
    }

    Ok(())
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<GeofenceAlert> {
    Ok(GeofenceAlert {
        id: row.get(0)?,
        trip_id: row.get(1)?,
        student_id: row.get(2)?,
        stop_id: row.get(3)?,
        violation_type: parse_column(row, 4)?,
        severity: parse_column(row, 5)?,
        description: row.get(6)?,
        distance_km: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Trip's route stops and the riders assigned to them.
fn route_context(conn: &Connection, tenant: &TenantId, route_id: Id) -> Result<(Vec<Stop>, Vec<Student>), AppError> {
    let route = load_route(conn, tenant, route_id)?;
    let stop_ids: Vec<Id> = route.stops.iter().map(|s| s.id).collect();
    let students = students_at_stops(conn, tenant, &stop_ids)?;

    Ok((route.stops, students))
}

/// Attendance flow: who should have boarded near `position` but has not.
pub async fn check_geofence_alerts(
    db: &Database,
    tenant: TenantId,
    trip_id: Id,
    position: Position,
    radius_km: f64,
) -> Result<Vec<GeofenceAlert>, AppError> {
    if !position.is_valid() {
        return Err(AppError::Validation("Invalid coordinates".to_string()));
    }

    let alerts = db
        .call(move |conn| {
            let now = Utc::now();
            let trip = trips::load_trip(conn, &tenant, trip_id)?;
            let (stops, students) = route_context(conn, &tenant, trip.route_id)?;
            let present = present_today(conn, &tenant, now)?;

            let mut alerts = evaluate_not_boarded(trip.id, position, &stops, &students, &present, radius_km, now);

            let tx = conn.transaction()?;
            insert_alerts(&tx, &tenant, &mut alerts)?;
            tx.commit()?;

            Ok(alerts)
        })
        .await?;

    if !alerts.is_empty() {
        info!("Trip {trip_id}: {} students not boarded", alerts.len());
    }

    Ok(alerts)
}

/// Tracking flow: store the position, evaluate every rule, escalate `High`.
pub async fn update_vehicle_location(
    db: &Database,
    hub: &NotificationHub,
    tenant: TenantId,
    trip_id: Id,
    location: VehicleLocation,
    limits: TrackingLimits,
) -> Result<Vec<GeofenceAlert>, AppError> {
    let position = location.position();
    if !position.is_valid() {
        return Err(AppError::Validation("Invalid coordinates".to_string()));
    }
    if location.speed_kmh.is_some_and(|s| !s.is_finite() || s < 0.0) {
        return Err(AppError::Validation("Invalid speed".to_string()));
    }

    let alerts = {
        let tenant = tenant.clone();

        db.call(move |conn| {
            let now = Utc::now();
            let trip = trips::load_trip(conn, &tenant, trip_id)?;
            if trip.status != TripStatus::InProgress {
                return Err(AppError::InvalidState(format!(
                    "Trip {trip_id} is {}, not in progress",
                    trip.status
                )));
            }

            let (stops, students) = route_context(conn, &tenant, trip.route_id)?;
            let present = present_today(conn, &tenant, now)?;

            let mut alerts = Vec::new();
            alerts.extend(evaluate_route_deviation(
                trip_id,
                position,
                &stops,
                limits.allowed_deviation_km,
                now,
            ));
            if let Some(speed) = location.speed_kmh {
                alerts.extend(evaluate_speed(trip_id, speed, limits.speed_limit_kmh, now));
            }
            alerts.extend(evaluate_not_boarded(
                trip_id,
                position,
                &stops,
                &students,
                &present,
                limits.allowed_deviation_km,
                now,
            ));

            let tx = conn.transaction()?;
            trips::record_position(&tx, &tenant, trip_id, position)?;
            insert_alerts(&tx, &tenant, &mut alerts)?;
            tx.commit()?;

            Ok(alerts)
        })
        .await?
    };

    for alert in alerts.iter().filter(|a| a.severity == Severity::High) {
        warn!("Trip {trip_id}: {}", alert.description);
        hub.publish(
            &tenant,
            Notification::EmergencyAlert {
                alert: alert.clone(),
            },
        );
    }

    Ok(alerts)
}

pub async fn list_trip_alerts(
    db: &Database,
    tenant: TenantId,
    trip_id: Id,
    page: PageRequest,
) -> Result<Page<GeofenceAlert>, AppError> {
    db.call(move |conn| {
        trips::load_trip(conn, &tenant, trip_id)?;

        let total = count(
            conn,
            "SELECT COUNT(*) FROM geofence_alerts WHERE tenant_id = ?1 AND trip_id = ?2",
            params![tenant.as_str(), trip_id],
        )?;

        let mut stmt = conn.prepare(
            "SELECT id, trip_id, student_id, stop_id, violation_type, severity, description, distance_km, created_at
             FROM geofence_alerts WHERE tenant_id = ?1 AND trip_id = ?2
             ORDER BY id DESC LIMIT ?3 OFFSET ?4",
        )?;
        let items = stmt
            .query_map(
                params![tenant.as_str(), trip_id, page.limit(), page.offset()],
                alert_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, page, total))
    })
    .await
}
