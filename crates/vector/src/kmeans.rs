//! Spherical k-means for the coarse cluster layout
//!
//! Lloyd iterations over unit vectors with cosine as the assignment metric:
//! - k-means++ seeding (probability proportional to `1 - cos` to the nearest seed)
//! - centroids renormalized after every update
//! - early stop when no centroid moves more than `tolerance`
//! - empty clusters reseeded from the point farthest from its centroid

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::similarity::{dot, normalize_in_place};

/// Training knobs for `SimilarityIndex::rebuild`
#[derive(Debug, Clone)]
pub struct KMeansOptions {
    /// Maximum Lloyd iterations (default: 25)
    pub max_iters: usize,

    /// Stop when the largest centroid movement (1 - cos) falls below this (default: 1e-4)
    pub tolerance: f32,

    /// Seed for reproducible layouts (None = random)
    pub seed: Option<u64>,
}

impl Default for KMeansOptions {
    fn default() -> Self {
        Self {
            max_iters: 25,
            tolerance: 1e-4,
            seed: None,
        }
    }
}

/// Index of the centroid with the highest dot product; ties go to the lower index
pub(crate) fn nearest_centroid(centroids: &[Vec<f32>], v: &[f32]) -> usize {
    let mut best = 0;
    let mut best_sim = f32::NEG_INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let sim = dot(c, v);
        if sim > best_sim {
            best_sim = sim;
            best = i;
        }
    }
    best
}

/// Train up to `k` unit centroids over unit vectors `data`
///
/// Returns fewer than `k` centroids when there are fewer points than `k`, and
/// nothing for empty input.
pub fn train(data: &[&[f32]], k: usize, options: &KMeansOptions) -> Vec<Vec<f32>> {
    let n = data.len();
    let k = k.min(n);
    if k == 0 {
        return Vec::new();
    }
    let dim = data[0].len();

    let mut rng = match options.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let mut centroids = seed_plus_plus(data, k, &mut rng);
    let mut assignments = vec![0usize; n];

    for iter in 0..options.max_iters {
        for (i, v) in data.iter().enumerate() {
            assignments[i] = nearest_centroid(&centroids, v);
        }

        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, v) in data.iter().enumerate() {
            let c = assignments[i];
            counts[c] += 1;
            for (acc, x) in sums[c].iter_mut().zip(v.iter()) {
                *acc += x;
            }
        }

        let mut max_movement = 0.0f32;
        for c in 0..k {
            let mut next = std::mem::take(&mut sums[c]);
            if counts[c] == 0 || !normalize_in_place(&mut next) {
                // Dead centroid: move it to the worst-served point
                let far = farthest_point(data, &centroids, &assignments);
                next = data[far].to_vec();
                assignments[far] = c;
            }
            let movement = 1.0 - dot(&centroids[c], &next);
            max_movement = max_movement.max(movement);
            centroids[c] = next;
        }

        if max_movement < options.tolerance {
            tracing::debug!("K-means converged after {} iterations", iter + 1);
            break;
        }
    }

    centroids
}

fn seed_plus_plus(data: &[&[f32]], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let n = data.len();
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(data[rng.gen_range(0..n)].to_vec());

    // Distance (1 - cos) from each point to its nearest chosen seed
    let mut min_dists = vec![f32::MAX; n];

    while centroids.len() < k {
        let last = &centroids[centroids.len() - 1];
        for (i, v) in data.iter().enumerate() {
            let d = (1.0 - dot(v, last)).max(0.0);
            if d < min_dists[i] {
                min_dists[i] = d;
            }
        }

        let total: f64 = min_dists.iter().map(|&d| d as f64).sum();
        let chosen = if total <= 0.0 {
            // Every point already coincides with a seed
            rng.gen_range(0..n)
        } else {
            let threshold = rng.gen::<f64>() * total;
            let mut cumulative = 0.0f64;
            let mut chosen = n - 1;
            for (i, &d) in min_dists.iter().enumerate() {
                cumulative += d as f64;
                if cumulative >= threshold {
                    chosen = i;
                    break;
                }
            }
            chosen
        };

        centroids.push(data[chosen].to_vec());
    }

    centroids
}

fn farthest_point(data: &[&[f32]], centroids: &[Vec<f32>], assignments: &[usize]) -> usize {
    let mut far = 0;
    let mut worst = f32::NEG_INFINITY;
    for (i, v) in data.iter().enumerate() {
        let d = 1.0 - dot(v, &centroids[assignments[i]]);
        if d > worst {
            worst = d;
            far = i;
        }
    }
    far
}
