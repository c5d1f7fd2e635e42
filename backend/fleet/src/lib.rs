//! Domain model shared by the server and the roster importer.

pub mod geo;
pub mod models;
pub mod roster;

pub use geo::{EARTH_RADIUS_KM, Position, haversine_km};
