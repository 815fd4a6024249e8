
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::distance::{self, DistanceMetric};
use crate::{Result, SemsearchError};

/// Parameters for a single k-means training run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansParams {
    pub clusters: usize,
    pub max_iterations: usize,
    pub tolerance: f32,
    pub seed: u64,
    pub metric: DistanceMetric,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansModel {
    pub centroids: Vec<Vec<f32>>,
    pub iterations: usize,
    pub converged: bool,
}

impl KMeansModel {
    #[inline]
    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }
}

/// Train centroids over `points` with k-means++ seeding followed by Lloyd iterations.
///
/// The number of centroids produced is `min(params.clusters, points.len())`.
/// Training stops once the largest centroid movement in an iteration is at most
/// `params.tolerance`, or after `params.max_iterations` iterations. A cluster that
/// loses all of its points keeps its previous centroid.
///
/// Identical inputs and parameters always produce identical centroids. The
/// cancellation token is checked between iterations.
#[inline]
pub fn train(
    points: &[&[f32]],
    params: &KMeansParams,
    cancel: &CancellationToken,
) -> Result<KMeansModel> {
    let k = params.clusters.min(points.len());
    if k == 0 {
        return Ok(KMeansModel {
            centroids: Vec::new(),
            iterations: 0,
            converged: true,
        });
    }

    let dimension = points[0].len();
    if let Some(bad) = points.iter().find(|p| p.len() != dimension) {
        return Err(SemsearchError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centroids = seed_centroids(points, k, params.metric, &mut rng);
    let mut assignments = vec![0_usize; points.len()];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iterations {
        if cancel.is_cancelled() {
            debug!("k-means cancelled after {} iterations", iterations);
            return Err(SemsearchError::Cancelled);
        }
        iterations += 1;

        for (slot, point) in assignments.iter_mut().zip(points) {
            *slot = nearest_centroid(&centroids, point, params.metric).0;
        }

        let updated = recompute_centroids(points, &assignments, &centroids, params.metric);
        let shift = centroids
            .iter()
            .zip(&updated)
            .map(|(old, new)| distance::euclidean(old, new))
            .fold(0.0_f32, f32::max);
        centroids = updated;

        trace!("k-means iteration {}: max centroid shift {}", iterations, shift);
        if shift <= params.tolerance {
            converged = true;
            break;
        }
    }

    if cancel.is_cancelled() {
        return Err(SemsearchError::Cancelled);
    }

    debug!(
        "Trained {} centroids over {} points in {} iterations (converged: {})",
        k,
        points.len(),
        iterations,
        converged
    );

    Ok(KMeansModel {
        centroids,
        iterations,
        converged,
    })
}

/// Index and distance of the closest centroid; ties go to the lower index
#[inline]
pub fn nearest_centroid(
    centroids: &[Vec<f32>],
    point: &[f32],
    metric: DistanceMetric,
) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (index, centroid) in centroids.iter().enumerate() {
        let d = metric.distance(point, centroid);
        if d < best.1 {
            best = (index, d);
        }
    }
    best
}

/// k-means++: each next seed is drawn with probability proportional to its
/// squared distance from the closest seed chosen so far.
fn seed_centroids(
    points: &[&[f32]],
    k: usize,
    metric: DistanceMetric,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let mut chosen = vec![false; points.len()];
    let first = rng.random_range(0..points.len());
    chosen[first] = true;
    let mut centroids = vec![seed_vector(points[first], metric)];

    let mut closest: Vec<f64> = points
        .iter()
        .map(|p| squared(metric.distance(p, &centroids[0])))
        .collect();

    while centroids.len() < k {
        let total: f64 = closest.iter().sum();
        let next = if total > 0.0 {
            let target = rng.random::<f64>() * total;
            let mut acc = 0.0;
            let mut pick = None;
            for (index, weight) in closest.iter().enumerate() {
                if *weight <= 0.0 {
                    continue;
                }
                acc += weight;
                pick = Some(index);
                if acc >= target {
                    break;
                }
            }
            pick
        } else {
            None
        };

        // Every remaining point coincides with a seed, take them in order
        let next = match next.or_else(|| chosen.iter().position(|c| !c)) {
            Some(index) => index,
            None => break,
        };

        chosen[next] = true;
        let centroid = seed_vector(points[next], metric);
        for (weight, point) in closest.iter_mut().zip(points) {
            let d = squared(metric.distance(point, &centroid));
            if d < *weight {
                *weight = d;
            }
        }
        closest[next] = 0.0;
        centroids.push(centroid);
    }

    centroids
}

fn recompute_centroids(
    points: &[&[f32]],
    assignments: &[usize],
    previous: &[Vec<f32>],
    metric: DistanceMetric,
) -> Vec<Vec<f32>> {
    let dimension = previous[0].len();
    let mut sums = vec![vec![0.0_f64; dimension]; previous.len()];
    let mut counts = vec![0_usize; previous.len()];

    for (point, &cluster) in points.iter().zip(assignments) {
        counts[cluster] += 1;
        for (acc, value) in sums[cluster].iter_mut().zip(point.iter()) {
            *acc += f64::from(*value);
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), old)| {
            if count == 0 {
                return old.clone();
            }
            let n = count as f64;
            let mut centroid: Vec<f32> = sum.into_iter().map(|s| (s / n) as f32).collect();
            if metric == DistanceMetric::Cosine {
                distance::normalize(&mut centroid);
            }
            centroid
        })
        .collect()
}

fn seed_vector(point: &[f32], metric: DistanceMetric) -> Vec<f32> {
    let mut centroid = point.to_vec();
    if metric == DistanceMetric::Cosine {
        distance::normalize(&mut centroid);
    }
    centroid
}

#[inline]
fn squared(d: f32) -> f64 {
    let d = f64::from(d);
    d * d
}
