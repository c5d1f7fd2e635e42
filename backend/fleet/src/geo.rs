//! # Geo
//!
//! Great-circle math used by the geofence evaluator.
//!
//! Distances are in kilometres, computed with the haversine formula over a
//! spherical Earth of radius 6371 km. Good enough for bus stops a few hundred
//! metres apart, no ellipsoid correction.
use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

pub fn haversine_km(a: Position, b: Position) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);

    // clamp, rounding can push h a hair above 1 for antipodal points
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Index and distance of the closest point, `None` when `points` is empty.
pub fn nearest<'a, I>(from: Position, points: I) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = &'a Position>,
{
    points
        .into_iter()
        .map(|p| haversine_km(from, *p))
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE_KM: f64 = 0.01;

    #[test]
    fn test_same_point_is_zero() {
        let p = Position::new(40.4237, -86.9212);
        assert_eq!(haversine_km(p, p), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let a = Position::new(40.4237, -86.9212);
        let b = Position::new(41.8781, -87.6298);
        assert_eq!(haversine_km(a, b), haversine_km(b, a));
    }

    #[test]
    fn test_one_kilometre_along_meridian() {
        // one degree of latitude is R * pi / 180 km
        let km_per_degree = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;
        let a = Position::new(40.0, -86.0);
        let b = Position::new(40.0 + 1.0 / km_per_degree, -86.0);

        assert!((haversine_km(a, b) - 1.0).abs() < TOLERANCE_KM);
    }

    #[test]
    fn test_known_city_distance() {
        // West Lafayette to Chicago, roughly 175 km
        let a = Position::new(40.4259, -86.9081);
        let b = Position::new(41.8781, -87.6298);
        let d = haversine_km(a, b);
        assert!((170.0..180.0).contains(&d), "got {d}");
    }

    #[test]
    fn test_antipodal_does_not_nan() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(0.0, 180.0);
        let d = haversine_km(a, b);
        assert!((d - EARTH_RADIUS_KM * std::f64::consts::PI).abs() < 1.0);
    }

    #[test]
    fn test_nearest() {
        let from = Position::new(40.0, -86.0);
        let points = [
            Position::new(40.1, -86.0),
            Position::new(40.001, -86.0),
            Position::new(39.5, -86.0),
        ];
        let (index, distance) = nearest(from, &points).unwrap();
        assert_eq!(index, 1);
        assert!(distance < 0.2);

        assert!(nearest(from, &[]).is_none());
    }

    #[test]
    fn test_validity() {
        assert!(Position::new(90.0, 180.0).is_valid());
        assert!(!Position::new(90.5, 0.0).is_valid());
        assert!(!Position::new(0.0, f64::NAN).is_valid());
    }
}
