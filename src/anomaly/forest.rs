//! Isolation forest for unsupervised outlier scoring.
//!
//! Classic formulation: an ensemble of random binary partition trees built
//! over subsamples of the window. Points that need fewer random partitions
//! to isolate are more anomalous. The score for a point x is
//!
//! ```text
//! s(x) = 2 ^ ( -E[h(x)] / c(ψ) )
//! ```
//!
//! where `E[h(x)]` is the mean path length over the trees and `c(ψ)` the
//! expected path length of an unsuccessful search in a tree of the subsample
//! size, giving a normalized score in (0, 1).

use rand::rngs::StdRng;
use rand::Rng;

/// Euler-Mascheroni constant, for the harmonic-number approximation.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Expected path length of an unsuccessful binary search over `n` points.
fn c_factor(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
}

enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

/// A fitted ensemble of isolation trees.
pub struct IsolationForest {
    trees: Vec<Node>,
    c_norm: f64,
}

impl IsolationForest {
    /// Fits `n_trees` trees over random subsamples of `data`.
    ///
    /// Returns `None` for empty data. Rows must share one dimensionality.
    pub fn fit(data: &[Vec<f64>], n_trees: usize, subsample: usize, rng: &mut StdRng) -> Option<Self> {
        let first = data.first()?;
        let dim = first.len();
        let psi = subsample.min(data.len()).max(2);
        let height_limit = (psi as f64).log2().ceil() as usize;

        let mut indices: Vec<usize> = (0..data.len()).collect();
        let mut trees = Vec::with_capacity(n_trees);
        for _ in 0..n_trees {
            // Partial Fisher-Yates: the first psi entries become the subsample.
            for i in 0..psi.min(indices.len()) {
                let j = rng.gen_range(i..indices.len());
                indices.swap(i, j);
            }
            let sample: Vec<&Vec<f64>> = indices[..psi.min(indices.len())]
                .iter()
                .map(|&i| &data[i])
                .collect();
            trees.push(build_tree(&sample, 0, height_limit, dim, rng));
        }

        Some(Self {
            trees,
            c_norm: c_factor(psi),
        })
    }

    /// Normalized anomaly score in (0, 1); higher is more anomalous.
    pub fn score(&self, x: &[f64]) -> f64 {
        if self.trees.is_empty() || self.c_norm <= 0.0 {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|t| path_length(t, x, 0)).sum();
        let mean_path = total / self.trees.len() as f64;
        2.0_f64.powf(-mean_path / self.c_norm)
    }
}

fn build_tree(sample: &[&Vec<f64>], depth: usize, limit: usize, dim: usize, rng: &mut StdRng) -> Node {
    if depth >= limit || sample.len() <= 1 {
        return Node::Leaf { size: sample.len() };
    }

    // Only features with spread can split; a sample of identical points is a
    // leaf no matter the depth.
    let mut splittable: Vec<(usize, f64, f64)> = Vec::with_capacity(dim);
    for feature in 0..dim {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for row in sample {
            let v = row[feature];
            min = min.min(v);
            max = max.max(v);
        }
        if max > min {
            splittable.push((feature, min, max));
        }
    }
    if splittable.is_empty() {
        return Node::Leaf { size: sample.len() };
    }

    let (feature, min, max) = splittable[rng.gen_range(0..splittable.len())];
    let threshold = rng.gen_range(min..max);
    let (left, right): (Vec<&Vec<f64>>, Vec<&Vec<f64>>) = sample
        .iter()
        .copied()
        .partition(|row| row[feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(&left, depth + 1, limit, dim, rng)),
        right: Box::new(build_tree(&right, depth + 1, limit, dim, rng)),
    }
}

fn path_length(node: &Node, x: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + c_factor(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if x[*feature] < *threshold {
                path_length(left, x, depth + 1)
            } else {
                path_length(right, x, depth + 1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn cluster(n: usize) -> Vec<Vec<f64>> {
        // Deterministic jitter around the origin.
        (0..n)
            .map(|i| {
                let j = (i as f64 * 0.7).sin() * 0.1;
                vec![j, -j, j * 0.5]
            })
            .collect()
    }

    #[test]
    fn test_outlier_scores_higher_than_inliers() {
        let data = cluster(64);
        let mut rng = StdRng::seed_from_u64(42);
        let forest = IsolationForest::fit(&data, 100, 32, &mut rng).expect("non-empty data");

        let inlier = forest.score(&[0.05, -0.05, 0.02]);
        let outlier = forest.score(&[8.0, 8.0, 8.0]);
        assert!(
            outlier > inlier,
            "outlier {outlier} should outscore inlier {inlier}"
        );
        assert!(outlier > 0.6);
    }

    #[test]
    fn test_scores_are_normalized() {
        let data = cluster(32);
        let mut rng = StdRng::seed_from_u64(7);
        let forest = IsolationForest::fit(&data, 50, 16, &mut rng).expect("non-empty data");
        for point in &data {
            let s = forest.score(point);
            assert!((0.0..=1.0).contains(&s), "score {s} out of range");
        }
    }

    #[test]
    fn test_fit_on_empty_data() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(IsolationForest::fit(&[], 10, 8, &mut rng).is_none());
    }

    #[test]
    fn test_identical_points_score_alike() {
        let data = vec![vec![1.0, 2.0]; 16];
        let mut rng = StdRng::seed_from_u64(3);
        let forest = IsolationForest::fit(&data, 20, 8, &mut rng).expect("non-empty data");
        let a = forest.score(&[1.0, 2.0]);
        let b = forest.score(&[1.0, 2.0]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_c_factor_monotone() {
        assert_eq!(c_factor(1), 0.0);
        assert!(c_factor(16) > c_factor(4));
        assert!(c_factor(256) > c_factor(16));
    }
}
