//! Isolation Forest outlier model
//!
//! Random axis-aligned partitions isolate outliers in fewer splits than
//! inliers. Scores follow the usual convention: the raw score is the
//! negated anomaly score `-2^(-E[h(x)] / c(psi))`, and the decision value
//! is the raw score minus the contamination percentile of the training
//! scores, so roughly a `contamination` share of the training rows end
//! up negative.

use super::OutlierModel;
use crate::error::{PipelineError, Result};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Euler-Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// One isolation tree stored as a flat arena
#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn build(rows: &[Vec<f64>], sample: Vec<usize>, height_limit: usize, rng: &mut ChaCha8Rng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(rows, sample, 0, height_limit, rng);
        tree
    }

    fn grow(
        &mut self,
        rows: &[Vec<f64>],
        sample: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut ChaCha8Rng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: sample.len() });

        if depth >= height_limit || sample.len() <= 1 {
            return id;
        }

        // Only features that still vary inside this node can split it
        let n_features = rows[sample[0]].len();
        let candidates: Vec<(usize, f64, f64)> = (0..n_features)
            .filter_map(|f| {
                let (min, max) = sample.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    (lo.min(rows[i][f]), hi.max(rows[i][f]))
                });
                (max > min).then_some((f, min, max))
            })
            .collect();

        if candidates.is_empty() {
            return id;
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(min..max);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            sample.into_iter().partition(|&i| rows[i][feature] < threshold);

        let left = self.grow(rows, left_rows, depth + 1, height_limit, rng);
        let right = self.grow(rows, right_rows, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// Average path length of an unsuccessful binary search tree lookup
pub(crate) fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile of unsorted values, `q` in [0, 100]
pub(crate) fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Isolation Forest parameters
#[derive(Debug, Clone)]
pub struct IsolationForest {
    pub n_estimators: usize,
    pub max_samples: usize,
}

impl IsolationForest {
    pub fn new(n_estimators: usize, max_samples: usize) -> Self {
        Self {
            n_estimators,
            max_samples,
        }
    }

    fn fit(&self, rows: &[Vec<f64>], seed: u64) -> Forest {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sample_size = self.max_samples.min(rows.len()).max(1);
        let height_limit = (sample_size.max(2) as f64).log2().ceil() as usize;

        let trees = (0..self.n_estimators)
            .map(|_| {
                let sample = index::sample(&mut rng, rows.len(), sample_size).into_vec();
                IsolationTree::build(rows, sample, height_limit, &mut rng)
            })
            .collect();

        Forest { trees, sample_size }
    }
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new(100, 256)
    }
}

struct Forest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl Forest {
    /// Negated anomaly score in [-1, 0); lower is more anomalous
    fn score_samples(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        let normalizer = average_path_length(self.sample_size).max(f64::EPSILON);
        rows.iter()
            .map(|row| {
                let mean_depth = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>()
                    / self.trees.len() as f64;
                -(2f64.powf(-mean_depth / normalizer))
            })
            .collect()
    }
}

impl OutlierModel for IsolationForest {
    fn name(&self) -> &'static str {
        "isolation_forest"
    }

    fn fit_decision(&self, rows: &[Vec<f64>], contamination: f64, seed: u64) -> Result<Vec<f64>> {
        if self.n_estimators == 0 {
            return Err(PipelineError::invalid("n_estimators", "must be at least 1"));
        }
        if rows.is_empty() {
            return Err(PipelineError::InsufficientData {
                required: 1,
                got: 0,
            });
        }

        let forest = self.fit(rows, seed);
        let scores = forest.score_samples(rows);
        let offset = percentile(&scores, 100.0 * contamination);

        Ok(scores.into_iter().map(|s| s - offset).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<Vec<f64>> {
        let mut rows: Vec<Vec<f64>> = (0..40)
            .map(|i| {
                let x = (i % 7) as f64 * 0.01;
                let y = (i % 5) as f64 * 0.01;
                vec![0.5 + x, 0.5 + y]
            })
            .collect();
        rows.push(vec![5.0, -4.0]);
        rows
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) is roughly 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 4.0);
        assert!((percentile(&values, 50.0) - 2.5).abs() < 1e-12);
        assert!((percentile(&values, 10.0) - 1.3).abs() < 1e-12);
    }

    #[test]
    fn test_outlier_has_lowest_decision() {
        let rows = cluster_with_outlier();
        let decisions = IsolationForest::default()
            .fit_decision(&rows, 0.05, 42)
            .unwrap();
        let outlier = decisions[rows.len() - 1];
        assert!(outlier < 0.0);
        assert!(decisions[..rows.len() - 1].iter().all(|d| *d > outlier));
    }

    #[test]
    fn test_deterministic_for_seed() {
        let rows = cluster_with_outlier();
        let model = IsolationForest::new(50, 32);
        let a = model.fit_decision(&rows, 0.1, 7).unwrap();
        let b = model.fit_decision(&rows, 0.1, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identical_rows_do_not_split() {
        let rows = vec![vec![1.0, 1.0]; 10];
        let decisions = IsolationForest::new(10, 8)
            .fit_decision(&rows, 0.1, 1)
            .unwrap();
        assert!(decisions.iter().all(|d| d.abs() < 1e-12));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(IsolationForest::default()
            .fit_decision(&[], 0.1, 1)
            .is_err());
    }
}
