//! # Rideline Documentation
//!
//! Multi-tenant school transportation platform: students, drivers, vehicles,
//! routes and trips, with attendance, live vehicle tracking, card payments and
//! SMS one-time codes.
//!
//! ## Crates
//! - `backend`: the `rideline` binary. Boots the server, optionally seeding a
//!   roster first (`seed` feature, `ROSTER_SOURCE`).
//! - `server`: axum HTTP API over sqlite, the notification hub and SMS delivery.
//! - `fleet`: shared domain model, haversine math, roster file format.
//! - `roster`: CLI importing a roster file or URL into the database.
//!
//!
//!
//! # Rules
//!
//! ## Geofence
//! Distances are great-circle distances on a 6371 km sphere.
//!
//! Attendance check (`POST /api/attendance/geofence-check`)
//! - Every stop within 0.5 km of the vehicle is considered
//! - Each student assigned to such a stop without a `Present` record today gets a
//!   `StudentNotBoarded` alert
//! - `High` within 0.1 km of the stop, `Medium` otherwise
//!
//! Live tracking (`POST /api/trips/{id}/location`)
//! - Only for trips `InProgress`
//! - `RouteDeviation` when no stop is within the allowed deviation (2 km)
//! - `SpeedViolation` above the speed limit (80 km/h)
//! - `StudentNotBoarded` as above, within the allowed deviation
//! - `High` alerts are pushed to the tenant's notification stream
//!
//! ## Payment Risk
//! Five checks, each adding a fixed score when it fails.
//!
//! | Check                 | Fails when                         | Score |
//! |-----------------------|------------------------------------|-------|
//! | PCI compliance        | not 13 to 19 digits                | 30    |
//! | Card security         | CVV not 3 or 4 digits              | 20    |
//! | Fraud detection       | amount above 1,000,000 cents       | 25    |
//! | Rate limit            | never                              | 0     |
//! | Address verification  | billing address under 10 chars     | 15    |
//!
//! Under 25 is `Low`, up to 50 `Medium`, above 50 `High`. `High` payments are
//! declined and never reach the gateway.
//!
//!
//!
//! # Setup
//!
//! Run the server.
//! ```sh
//! RUST_LOG=info cargo run -p backend
//! ```
//!
//! Seed a roster on boot.
//! ```sh
//! ROSTER_SOURCE=roster.json cargo run -p backend --features seed
//! ```
//!
//! Import a roster into an existing database.
//! ```sh
//! cargo run -p roster -- roster.json --database rideline.db
//! ```
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```

pub mod client;
