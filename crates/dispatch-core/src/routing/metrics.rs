// Route distance, drive-time estimate, and savings versus the unoptimized
// visiting order.

use serde::{Deserialize, Serialize};

use crate::routing::geo::{haversine_km, GeoPoint};

/// Assumed average urban delivery speed.
pub const DEFAULT_SPEED_KMH: f64 = 30.0;

/// Distance and time for one ordered route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteMetrics {
    pub stops: usize,
    pub distance_km: f64,
    pub estimated_minutes: f64,
}

/// Comparison of the optimized order against visiting stops in input order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Savings {
    pub naive_km: f64,
    pub optimized_km: f64,
    pub saved_km: f64,
    pub saved_percent: f64,
}

impl Savings {
    pub fn new(naive_km: f64, optimized_km: f64) -> Self {
        let saved_km = naive_km - optimized_km;
        let saved_percent = if naive_km > 0.0 {
            saved_km / naive_km * 100.0
        } else {
            0.0
        };
        Self {
            naive_km,
            optimized_km,
            saved_km,
            saved_percent,
        }
    }
}

/// Sum of consecutive haversine legs: depot to the first stop, stop to stop,
/// and back to the depot when `return_to_depot` is set. An empty route is 0.
pub fn route_distance_km(depot: GeoPoint, stops: &[GeoPoint], return_to_depot: bool) -> f64 {
    let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
        return 0.0;
    };

    let mut total = haversine_km(depot, *first);
    total += stops
        .windows(2)
        .map(|w| haversine_km(w[0], w[1]))
        .sum::<f64>();
    if return_to_depot {
        total += haversine_km(*last, depot);
    }
    total
}

/// Drive time in minutes at a constant `speed_kmh`.
pub fn estimate_minutes(distance_km: f64, speed_kmh: f64) -> f64 {
    distance_km / speed_kmh * 60.0
}

pub fn route_metrics(
    depot: GeoPoint,
    stops: &[GeoPoint],
    return_to_depot: bool,
    speed_kmh: f64,
) -> RouteMetrics {
    let distance_km = route_distance_km(depot, stops, return_to_depot);
    RouteMetrics {
        stops: stops.len(),
        distance_km,
        estimated_minutes: estimate_minutes(distance_km, speed_kmh),
    }
}

/// Format minutes as `"1h 05m"` / `"42m"` for summaries.
pub fn format_duration(minutes: f64) -> String {
    let total = minutes.round().max(0.0) as u64;
    let (h, m) = (total / 60, total % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else {
        format!("{m}m")
    }
}
