// Plain-text rendering of a route plan for the terminal.

use std::fmt::Write;

use dispatch_core::routing::metrics::format_duration;
use dispatch_core::routing::RoutePlan;

pub fn summary(plan: &RoutePlan) -> String {
    let mut out = String::new();

    if plan.routes.is_empty() {
        let _ = writeln!(out, "No orders to plan.");
        return out;
    }

    let _ = writeln!(
        out,
        "Depot: {} ({:.4}, {:.4})",
        plan.depot.name, plan.depot.latitude, plan.depot.longitude
    );
    let _ = writeln!(
        out,
        "{} orders in {} routes ({} k-means iterations{})",
        plan.total_orders,
        plan.routes.len(),
        plan.iterations,
        if plan.converged { "" } else { ", not converged" }
    );

    for route in &plan.routes {
        let driver = route
            .driver
            .as_ref()
            .map(|d| format!("{} ({})", d.name, d.vehicle))
            .unwrap_or_else(|| "unassigned".to_string());
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Route {} - {}: {} stops, {:.2} km, {}",
            route.index + 1,
            driver,
            route.metrics.stops,
            route.metrics.distance_km,
            format_duration(route.metrics.estimated_minutes)
        );
        for (n, stop) in route.stops.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {:>2}. {:<11} {} [{}]",
                n + 1,
                stop.name,
                stop.address,
                stop.status
            );
        }
        if route.savings.saved_km > 0.0 {
            let _ = writeln!(
                out,
                "  saves {:.2} km ({:.1}%) over manifest order",
                route.savings.saved_km, route.savings.saved_percent
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Total: {:.2} km, {} (saved {:.2} km, {:.1}%)",
        plan.total_distance_km,
        format_duration(plan.total_minutes),
        plan.savings.saved_km,
        plan.savings.saved_percent
    );

    let unassigned = plan.unassigned_routes().count();
    if unassigned > 0 {
        let _ = writeln!(out, "{unassigned} route(s) have no driver");
    }

    out
}
