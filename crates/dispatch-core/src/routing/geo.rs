// Geographic primitives: points and the two distance measures used by the
// planner (raw-degree Euclidean for clustering, haversine for road legs).

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are finite and inside the valid lat/lng
    /// ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Plain Euclidean distance on raw degrees. Only meaningful for comparing
/// nearby points, which is all clustering needs.
pub fn euclidean_deg(a: GeoPoint, b: GeoPoint) -> f64 {
    squared_deg(a, b).sqrt()
}

pub(crate) fn squared_deg(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = a.lat - b.lat;
    let d_lng = a.lng - b.lng;
    d_lat * d_lat + d_lng * d_lng
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOMBO: GeoPoint = GeoPoint::new(6.9271, 79.8612);
    const KANDY: GeoPoint = GeoPoint::new(7.2906, 80.6337);

    #[test]
    fn haversine_zero_for_same_point() {
        assert_eq!(haversine_km(COLOMBO, COLOMBO), 0.0);
    }

    #[test]
    fn haversine_colombo_to_kandy() {
        // Straight-line distance is roughly 94 km.
        let d = haversine_km(COLOMBO, KANDY);
        assert!((d - 94.0).abs() < 2.0, "got {d}");
    }

    #[test]
    fn haversine_is_symmetric() {
        let ab = haversine_km(COLOMBO, KANDY);
        let ba = haversine_km(KANDY, COLOMBO);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = haversine_km(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        assert!((d - 111.19).abs() < 0.1, "got {d}");
    }

    #[test]
    fn euclidean_on_degrees() {
        let d = euclidean_deg(GeoPoint::new(0.0, 0.0), GeoPoint::new(3.0, 4.0));
        assert!((d - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn validity_checks_ranges_and_finiteness() {
        assert!(COLOMBO.is_valid());
        assert!(GeoPoint::new(-90.0, 180.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, f64::INFINITY).is_valid());
    }
}
