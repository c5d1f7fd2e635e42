//! # SQLite
//!
//! Relational store behind every service.
//!
//! ## Conventions
//!
//! - Every table carries `tenant_id`; every query filters on it
//! - Rows are soft deleted through `is_deleted`, reads skip them
//! - Uniqueness (student number, license, registration, parent email) holds
//!   among live rows only, enforced with partial unique indexes
//! - Timestamps are RFC 3339 text, dates are `YYYY-MM-DD`
//! - Enums are stored as their variant name
//!
//! ## Access
//!
//! One connection behind a mutex. Every query runs on the blocking pool
//! through [`Database::call`], so handlers never block the runtime.
use std::{
    error::Error,
    path::Path,
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use rusqlite::{Connection, Row, types::Type};
use tracing::info;

use crate::error::AppError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS parents (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id   TEXT NOT NULL,
    name        TEXT NOT NULL,
    email       TEXT NOT NULL,
    phone       TEXT,
    is_deleted  INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS parents_email
    ON parents(tenant_id, email) WHERE is_deleted = 0;

CREATE TABLE IF NOT EXISTS routes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id   TEXT NOT NULL,
    name        TEXT NOT NULL,
    is_deleted  INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stops (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id   TEXT NOT NULL,
    route_id    INTEGER NOT NULL REFERENCES routes(id),
    name        TEXT NOT NULL,
    latitude    REAL NOT NULL,
    longitude   REAL NOT NULL,
    sequence    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS stops_route ON stops(route_id, sequence);

CREATE TABLE IF NOT EXISTS students (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id       TEXT NOT NULL,
    student_number  TEXT NOT NULL,
    first_name      TEXT NOT NULL,
    last_name       TEXT NOT NULL,
    grade           TEXT,
    parent_id       INTEGER NOT NULL REFERENCES parents(id),
    stop_id         INTEGER REFERENCES stops(id),
    is_deleted      INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS students_number
    ON students(tenant_id, student_number) WHERE is_deleted = 0;
CREATE INDEX IF NOT EXISTS students_stop ON students(stop_id);

CREATE TABLE IF NOT EXISTS drivers (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id       TEXT NOT NULL,
    name            TEXT NOT NULL,
    license_number  TEXT NOT NULL,
    phone           TEXT,
    is_deleted      INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS drivers_license
    ON drivers(tenant_id, license_number) WHERE is_deleted = 0;

CREATE TABLE IF NOT EXISTS vehicles (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id       TEXT NOT NULL,
    registration    TEXT NOT NULL,
    model           TEXT,
    capacity        INTEGER NOT NULL,
    is_deleted      INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS vehicles_registration
    ON vehicles(tenant_id, registration) WHERE is_deleted = 0;

CREATE TABLE IF NOT EXISTS trips (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id       TEXT NOT NULL,
    route_id        INTEGER NOT NULL REFERENCES routes(id),
    vehicle_id      INTEGER NOT NULL REFERENCES vehicles(id),
    driver_id       INTEGER NOT NULL REFERENCES drivers(id),
    scheduled_date  TEXT NOT NULL,
    status          TEXT NOT NULL,
    last_latitude   REAL,
    last_longitude  REAL,
    is_deleted      INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id       TEXT NOT NULL,
    student_id      INTEGER NOT NULL REFERENCES students(id),
    trip_id         INTEGER NOT NULL REFERENCES trips(id),
    date            TEXT NOT NULL,
    status          TEXT NOT NULL,
    notes           TEXT,
    is_deleted      INTEGER NOT NULL DEFAULT 0,
    recorded_at     TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS attendance_once_per_day
    ON attendance(tenant_id, student_id, trip_id, date) WHERE is_deleted = 0;

CREATE TABLE IF NOT EXISTS geofence_alerts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id       TEXT NOT NULL,
    trip_id         INTEGER NOT NULL REFERENCES trips(id),
    student_id      INTEGER,
    stop_id         INTEGER,
    violation_type  TEXT NOT NULL,
    severity        TEXT NOT NULL,
    description     TEXT NOT NULL,
    distance_km     REAL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS geofence_alerts_trip ON geofence_alerts(tenant_id, trip_id);

CREATE TABLE IF NOT EXISTS payments (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id       TEXT NOT NULL,
    student_id      INTEGER NOT NULL REFERENCES students(id),
    amount_cents    INTEGER NOT NULL,
    currency        TEXT NOT NULL,
    card_last4      TEXT NOT NULL,
    status          TEXT NOT NULL,
    transaction_id  TEXT,
    risk_score      INTEGER NOT NULL,
    risk_level      TEXT NOT NULL,
    description     TEXT,
    is_deleted      INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS mfa_challenges (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    code_hash   TEXT NOT NULL,
    expires_at  TEXT NOT NULL,
    attempts    INTEGER NOT NULL DEFAULT 0,
    consumed    INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id   TEXT NOT NULL,
    entity      TEXT NOT NULL,
    entity_id   INTEGER NOT NULL,
    action      TEXT NOT NULL,
    details     TEXT,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS audit_log_tenant ON audit_log(tenant_id, id);
"#;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;

        info!("Opened database at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AppError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::internal("database lock poisoned"))?;

            f(&mut guard)
        })
        .await?
    }
}

/// Read a TEXT column holding an enum variant name.
pub fn parse_column<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    let raw: String = row.get(index)?;

    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use fleet::models::TripStatus;

    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rideline.db");

        Database::open(&path).unwrap();
        Database::open(&path).unwrap();
    }

    #[tokio::test]
    async fn test_call_runs_query() {
        let db = Database::open_in_memory().unwrap();

        let count: i64 = db
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM students", (), |r| r.get(0))?))
            .await
            .unwrap();

        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_parse_column() {
        let db = Database::open_in_memory().unwrap();

        let status: TripStatus = db
            .call(|conn| Ok(conn.query_row("SELECT 'InProgress'", (), |r| parse_column(r, 0))?))
            .await
            .unwrap();
        assert_eq!(status, TripStatus::InProgress);

        let bad = db
            .call(|conn| {
                Ok(conn.query_row("SELECT 'Parked'", (), |r| parse_column::<TripStatus>(r, 0))?)
            })
            .await;
        assert!(bad.is_err());
    }
}
