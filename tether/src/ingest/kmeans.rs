//! Small k-means over embedding vectors, k-means++ seeding.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn distance_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(centroids: &[Vec<f32>], point: &[f32]) -> (usize, f32) {
    let mut best = (0usize, f32::MAX);
    for (i, c) in centroids.iter().enumerate() {
        let d = distance_sq(c, point);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// Clusters `points` into at most `k` groups. Returns per-point assignments
/// and the centroids. Deterministic for a given seed; `k` is clamped to the
/// point count.
pub fn kmeans(points: &[Vec<f32>], k: usize, iterations: usize, seed: u64) -> (Vec<usize>, Vec<Vec<f32>>) {
    let k = k.clamp(1, points.len().max(1));
    if points.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let mut rng = StdRng::seed_from_u64(seed);

    // k-means++ seeding: spread the initial centroids out.
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].clone());
    while centroids.len() < k {
        let weights: Vec<f32> = points
            .iter()
            .map(|p| nearest(&centroids, p).1)
            .collect();
        let total: f32 = weights.iter().sum();
        if total <= f32::EPSILON {
            // All points coincide with a centroid already.
            centroids.push(points[rng.gen_range(0..points.len())].clone());
            continue;
        }
        let mut pick = rng.gen_range(0.0..total);
        let mut chosen = points.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            if pick <= *w {
                chosen = i;
                break;
            }
            pick -= w;
        }
        centroids.push(points[chosen].clone());
    }

    let mut assignments = vec![0usize; points.len()];
    for _ in 0..iterations {
        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let (cluster, _) = nearest(&centroids, point);
            if assignments[i] != cluster {
                assignments[i] = cluster;
                changed = true;
            }
        }

        let dim = points[0].len();
        let mut sums = vec![vec![0f32; dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (point, &cluster) in points.iter().zip(assignments.iter()) {
            counts[cluster] += 1;
            for (slot, value) in sums[cluster].iter_mut().zip(point.iter()) {
                *slot += value;
            }
        }
        for (cluster, sum) in sums.into_iter().enumerate() {
            if counts[cluster] > 0 {
                centroids[cluster] = sum
                    .into_iter()
                    .map(|v| v / counts[cluster] as f32)
                    .collect();
            }
        }
        if !changed {
            break;
        }
    }

    (assignments, centroids)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Two well-separated groups land in two clusters.
    #[test]
    fn separates_two_groups() {
        let points = vec![
            vec![0.0, 0.1],
            vec![0.1, 0.0],
            vec![0.05, 0.05],
            vec![5.0, 5.1],
            vec![5.1, 5.0],
            vec![5.05, 5.05],
        ];
        let (assignments, centroids) = kmeans(&points, 2, 20, 42);
        assert_eq!(centroids.len(), 2);
        assert_eq!(assignments[0], assignments[1]);
        assert_eq!(assignments[0], assignments[2]);
        assert_eq!(assignments[3], assignments[4]);
        assert_ne!(assignments[0], assignments[3]);
    }

    /// **Scenario**: k larger than the point count clamps to the point count.
    #[test]
    fn k_clamped() {
        let points = vec![vec![1.0], vec![2.0]];
        let (assignments, centroids) = kmeans(&points, 10, 5, 1);
        assert_eq!(assignments.len(), 2);
        assert_eq!(centroids.len(), 2);
    }

    /// **Scenario**: The same seed reproduces the same clustering.
    #[test]
    fn deterministic_for_seed() {
        let points: Vec<Vec<f32>> = (0..20)
            .map(|i| vec![(i % 5) as f32, (i / 5) as f32])
            .collect();
        let a = kmeans(&points, 3, 15, 7);
        let b = kmeans(&points, 3, 15, 7);
        assert_eq!(a.0, b.0);
    }
}
