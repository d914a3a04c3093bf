// Greedy nearest-neighbor ordering of the stops inside one route.

use crate::routing::geo::{haversine_km, GeoPoint};

/// Visiting order for `stops`, starting from `start`.
///
/// At each step the closest unvisited stop (haversine) is taken next; ties go
/// to the lower index. The result is a permutation of `0..stops.len()`.
pub fn nearest_neighbor(start: GeoPoint, stops: &[GeoPoint]) -> Vec<usize> {
    let mut visited = vec![false; stops.len()];
    let mut order = Vec::with_capacity(stops.len());
    let mut current = start;

    for _ in 0..stops.len() {
        let mut next = None;
        let mut best = f64::INFINITY;
        for (i, stop) in stops.iter().enumerate() {
            if visited[i] {
                continue;
            }
            let d = haversine_km(current, *stop);
            if d < best || next.is_none() {
                best = d;
                next = Some(i);
            }
        }

        let Some(i) = next else {
            break;
        };
        visited[i] = true;
        order.push(i);
        current = stops[i];
    }

    order
}

/// Reorder `items` by an index permutation produced by [`nearest_neighbor`].
pub fn apply_order<T: Clone>(items: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&i| items[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stops_give_empty_order() {
        assert!(nearest_neighbor(GeoPoint::new(0.0, 0.0), &[]).is_empty());
    }

    #[test]
    fn single_stop() {
        assert_eq!(
            nearest_neighbor(GeoPoint::new(0.0, 0.0), &[GeoPoint::new(1.0, 1.0)]),
            vec![0]
        );
    }

    #[test]
    fn walks_a_line_outward_from_the_start() {
        let start = GeoPoint::new(7.0, 80.0);
        let stops = [
            GeoPoint::new(7.0, 80.3),
            GeoPoint::new(7.0, 80.1),
            GeoPoint::new(7.0, 80.4),
            GeoPoint::new(7.0, 80.2),
        ];
        assert_eq!(nearest_neighbor(start, &stops), vec![1, 3, 0, 2]);
    }

    #[test]
    fn greedy_choice_follows_current_position() {
        // From the start the west stop is closest; after reaching it the far
        // west stop is closer than the east one.
        let start = GeoPoint::new(7.0, 80.0);
        let stops = [
            GeoPoint::new(7.0, 80.15),
            GeoPoint::new(7.0, 79.9),
            GeoPoint::new(7.0, 79.7),
        ];
        assert_eq!(nearest_neighbor(start, &stops), vec![1, 2, 0]);
    }

    #[test]
    fn ties_go_to_lower_index() {
        let start = GeoPoint::new(7.0, 80.0);
        let stops = [GeoPoint::new(7.0, 80.1), GeoPoint::new(7.0, 80.1)];
        assert_eq!(nearest_neighbor(start, &stops), vec![0, 1]);
    }

    #[test]
    fn result_is_a_permutation() {
        let stops: Vec<GeoPoint> = (0..25)
            .map(|i| GeoPoint::new(6.0 + (i * 7 % 13) as f64 * 0.1, 80.0 + (i * 5 % 11) as f64 * 0.1))
            .collect();
        let mut order = nearest_neighbor(GeoPoint::new(7.25, 80.35), &stops);
        order.sort_unstable();
        assert_eq!(order, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn apply_order_reorders_items() {
        let items = ["a", "b", "c"];
        assert_eq!(apply_order(&items, &[2, 0, 1]), vec!["c", "a", "b"]);
    }
}
