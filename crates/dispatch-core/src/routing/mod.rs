// Delivery route planning.
//
// Orders are grouped into driver routes with k-means++, each route is ordered
// with a nearest-neighbor walk from the depot, and the result is scored with
// haversine distances at an assumed average speed.

pub mod cluster;
pub mod geo;
pub mod metrics;
pub mod tsp;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::shipping::{Depot, Driver, ShippingOrder};
use cluster::kmeans;
use geo::GeoPoint;
use metrics::{route_distance_km, route_metrics, RouteMetrics, Savings};

// ---------------------------------------------------------------------------
// Errors and options
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RoutingError {
    #[error("cluster count must be at least 1")]
    NoClusters,

    #[error("max_iterations must be at least 1")]
    NoIterations,

    #[error("average speed must be a positive number, got {0}")]
    InvalidSpeed(f64),

    #[error("depot location ({lat}, {lng}) is not a valid coordinate")]
    InvalidDepot { lat: f64, lng: f64 },

    #[error("order {order_id} has an invalid location ({lat}, {lng})")]
    InvalidLocation { order_id: i64, lat: f64, lng: f64 },
}

/// Tunables for one planning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOptions {
    pub clusters: usize,
    pub max_iterations: usize,
    pub average_speed_kmh: f64,
    pub return_to_depot: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            clusters: 2,
            max_iterations: cluster::DEFAULT_MAX_ITERATIONS,
            average_speed_kmh: metrics::DEFAULT_SPEED_KMH,
            return_to_depot: true,
        }
    }
}

impl PlanOptions {
    fn validate(&self) -> Result<(), RoutingError> {
        if self.clusters == 0 {
            return Err(RoutingError::NoClusters);
        }
        if self.max_iterations == 0 {
            return Err(RoutingError::NoIterations);
        }
        if !self.average_speed_kmh.is_finite() || self.average_speed_kmh <= 0.0 {
            return Err(RoutingError::InvalidSpeed(self.average_speed_kmh));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Plan types
// ---------------------------------------------------------------------------

/// One driver's route: stops in visiting order plus its metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRoute {
    /// Position of this route in the plan (0-based, contiguous).
    pub index: usize,
    pub driver: Option<Driver>,
    pub centroid: GeoPoint,
    pub stops: Vec<ShippingOrder>,
    pub metrics: RouteMetrics,
    pub savings: Savings,
}

impl DeliveryRoute {
    pub fn order_ids(&self) -> Vec<i64> {
        self.stops.iter().map(|o| o.id).collect()
    }
}

/// The full output of a planning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub depot: Depot,
    pub options: PlanOptions,
    pub routes: Vec<DeliveryRoute>,
    pub total_orders: usize,
    pub total_distance_km: f64,
    pub total_minutes: f64,
    pub savings: Savings,
    /// Clustering rounds actually performed.
    pub iterations: usize,
    pub converged: bool,
}

impl RoutePlan {
    /// Routes with no driver available.
    pub fn unassigned_routes(&self) -> impl Iterator<Item = &DeliveryRoute> {
        self.routes.iter().filter(|r| r.driver.is_none())
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Split `orders` into routes, order each route, and score the result.
///
/// Empty clusters are dropped, so the plan may hold fewer routes than
/// `options.clusters`. Drivers are handed out in list order by route index;
/// any route beyond the driver list stays unassigned.
pub fn plan_routes<R: Rng + ?Sized>(
    orders: &[ShippingOrder],
    depot: &Depot,
    drivers: &[Driver],
    options: &PlanOptions,
    rng: &mut R,
) -> Result<RoutePlan, RoutingError> {
    options.validate()?;

    let origin = depot.location();
    if !origin.is_valid() {
        return Err(RoutingError::InvalidDepot {
            lat: origin.lat,
            lng: origin.lng,
        });
    }
    if let Some(bad) = orders.iter().find(|o| !o.location.is_valid()) {
        return Err(RoutingError::InvalidLocation {
            order_id: bad.id,
            lat: bad.location.lat,
            lng: bad.location.lng,
        });
    }

    let points: Vec<GeoPoint> = orders.iter().map(|o| o.location).collect();
    let clustering = kmeans(&points, options.clusters, options.max_iterations, rng);
    debug!(
        "Clustered {} orders into {} groups in {} iterations (converged: {})",
        orders.len(),
        clustering.non_empty_clusters(),
        clustering.iterations,
        clustering.converged
    );

    let mut groups: Vec<Vec<&ShippingOrder>> = vec![Vec::new(); clustering.centroids.len()];
    for (order, &cluster) in orders.iter().zip(&clustering.assignments) {
        groups[cluster].push(order);
    }

    let mut routes = Vec::new();
    for (cluster, group) in groups.into_iter().enumerate() {
        if group.is_empty() {
            continue;
        }
        let index = routes.len();
        let driver = drivers.get(index).cloned();
        routes.push(build_route(
            index,
            clustering.centroids[cluster],
            &group,
            origin,
            driver,
            options,
        ));
    }

    let total_distance_km: f64 = routes.iter().map(|r| r.metrics.distance_km).sum();
    let total_minutes: f64 = routes.iter().map(|r| r.metrics.estimated_minutes).sum();
    let naive_km: f64 = routes.iter().map(|r| r.savings.naive_km).sum();

    let plan = RoutePlan {
        depot: depot.clone(),
        options: options.clone(),
        total_orders: orders.len(),
        total_distance_km,
        total_minutes,
        savings: Savings::new(naive_km, total_distance_km),
        iterations: clustering.iterations,
        converged: clustering.converged,
        routes,
    };

    info!(
        "Planned {} routes for {} orders: {:.1} km, saved {:.1} km",
        plan.routes.len(),
        plan.total_orders,
        plan.total_distance_km,
        plan.savings.saved_km
    );

    Ok(plan)
}

fn build_route(
    index: usize,
    centroid: GeoPoint,
    group: &[&ShippingOrder],
    origin: GeoPoint,
    driver: Option<Driver>,
    options: &PlanOptions,
) -> DeliveryRoute {
    let input_points: Vec<GeoPoint> = group.iter().map(|o| o.location).collect();
    let order = tsp::nearest_neighbor(origin, &input_points);
    let stops: Vec<ShippingOrder> = order.iter().map(|&i| group[i].clone()).collect();
    let ordered_points = tsp::apply_order(&input_points, &order);

    let metrics = route_metrics(
        origin,
        &ordered_points,
        options.return_to_depot,
        options.average_speed_kmh,
    );
    let naive_km = route_distance_km(origin, &input_points, options.return_to_depot);

    DeliveryRoute {
        index,
        driver,
        centroid,
        stops,
        metrics,
        savings: Savings::new(naive_km, metrics.distance_km),
    }
}
