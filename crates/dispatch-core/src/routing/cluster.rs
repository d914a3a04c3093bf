// k-means clustering of delivery locations with k-means++ seeding.
//
// Distances are Euclidean on raw lat/lng degrees. The RNG is injected so a
// seeded run always produces the same partition.

use rand::Rng;

use crate::routing::geo::{euclidean_deg, squared_deg, GeoPoint};

/// Iteration cap used when the caller has no preference.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Result of a clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// Cluster index for each input point, parallel to the input slice.
    pub assignments: Vec<usize>,
    /// Final centroid of each cluster. Empty clusters keep their last centroid.
    pub centroids: Vec<GeoPoint>,
    /// Number of assign/update rounds performed.
    pub iterations: usize,
    /// Whether the loop stopped because no assignment changed.
    pub converged: bool,
}

impl Clustering {
    fn empty() -> Self {
        Self {
            assignments: Vec::new(),
            centroids: Vec::new(),
            iterations: 0,
            converged: true,
        }
    }

    /// Number of clusters that received at least one point.
    pub fn non_empty_clusters(&self) -> usize {
        let mut seen = vec![false; self.centroids.len()];
        for &a in &self.assignments {
            seen[a] = true;
        }
        seen.into_iter().filter(|s| *s).count()
    }
}

/// Partition `points` into at most `k` clusters.
///
/// - Empty input or `k == 0` yields an empty clustering.
/// - `k >= points.len()` puts every point in its own cluster.
/// - Otherwise centroids are seeded with k-means++ and refined until no
///   assignment changes or `max_iterations` rounds have run.
pub fn kmeans<R: Rng + ?Sized>(
    points: &[GeoPoint],
    k: usize,
    max_iterations: usize,
    rng: &mut R,
) -> Clustering {
    if points.is_empty() || k == 0 {
        return Clustering::empty();
    }
    if k >= points.len() {
        return Clustering {
            assignments: (0..points.len()).collect(),
            centroids: points.to_vec(),
            iterations: 0,
            converged: true,
        };
    }

    let mut centroids = seed_plus_plus(points, k, rng);
    let mut assignments: Vec<Option<usize>> = vec![None; points.len()];
    let mut iterations = 0;
    let mut changed = true;

    while changed && iterations < max_iterations {
        changed = false;
        iterations += 1;

        for (i, p) in points.iter().enumerate() {
            let closest = nearest_centroid(*p, &centroids);
            if assignments[i] != Some(closest) {
                assignments[i] = Some(closest);
                changed = true;
            }
        }

        update_centroids(points, &assignments, &mut centroids);
    }

    Clustering {
        // Every slot is filled on the first round, and max_iterations == 0 is
        // the only way to skip it; fall back to cluster 0 in that case.
        assignments: assignments.into_iter().map(|a| a.unwrap_or(0)).collect(),
        centroids,
        iterations,
        converged: !changed,
    }
}

/// k-means++ seeding: the first centroid is uniform, each further centroid is
/// drawn with probability proportional to its squared distance from the
/// nearest centroid chosen so far.
fn seed_plus_plus<R: Rng + ?Sized>(points: &[GeoPoint], k: usize, rng: &mut R) -> Vec<GeoPoint> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())]);

    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| squared_deg(*p, *c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();

        let total: f64 = weights.iter().sum();
        let target = rng.gen::<f64>() * total;

        let mut cumulative = 0.0;
        let mut chosen = points.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            cumulative += w;
            if cumulative >= target {
                chosen = i;
                break;
            }
        }
        centroids.push(points[chosen]);
    }

    centroids
}

fn nearest_centroid(p: GeoPoint, centroids: &[GeoPoint]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (j, c) in centroids.iter().enumerate() {
        let d = euclidean_deg(p, *c);
        if d < best_dist {
            best_dist = d;
            best = j;
        }
    }
    best
}

fn update_centroids(points: &[GeoPoint], assignments: &[Option<usize>], centroids: &mut [GeoPoint]) {
    let mut sums = vec![(0.0_f64, 0.0_f64, 0_usize); centroids.len()];
    for (p, a) in points.iter().zip(assignments) {
        if let Some(j) = a {
            let s = &mut sums[*j];
            s.0 += p.lat;
            s.1 += p.lng;
            s.2 += 1;
        }
    }
    for (c, (lat, lng, n)) in centroids.iter_mut().zip(sums) {
        if n > 0 {
            c.lat = lat / n as f64;
            c.lng = lng / n as f64;
        }
    }
}
