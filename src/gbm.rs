//! Gradient-boosted regression trees with squared-error loss.
//!
//! Each stage fits a CART tree to the current residuals and adds its output
//! scaled by the learning rate. Splits minimise the summed squared error of
//! the two children; importances are the total error reduction per feature,
//! normalised to sum to one.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::ForecastError;
use crate::settings::GbmConfig;

const MODEL: &str = "gradient-boosting";
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct TreeParams {
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    position: usize,
    gain: f64,
}

impl RegressionTree {
    fn fit(
        x: &[Vec<f64>],
        target: &[f64],
        indices: &mut [usize],
        params: &TreeParams,
        importances: &mut [f64],
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, target, indices, 0, params, importances);
        tree
    }

    fn grow(
        &mut self,
        x: &[Vec<f64>],
        target: &[f64],
        indices: &mut [usize],
        depth: usize,
        params: &TreeParams,
        importances: &mut [f64],
    ) -> usize {
        let n = indices.len();
        let total: f64 = indices.iter().map(|&i| target[i]).sum();
        let node = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: total / n as f64,
        });

        if depth >= params.max_depth || n < params.min_samples_split {
            return node;
        }

        let Some(best) = best_split(x, target, indices, total, params.min_samples_leaf) else {
            return node;
        };

        importances[best.feature] += best.gain;
        sort_by_feature(x, indices, best.feature);
        let (left_idx, right_idx) = indices.split_at_mut(best.position);
        let left = self.grow(x, target, left_idx, depth + 1, params, importances);
        let right = self.grow(x, target, right_idx, depth + 1, params, importances);
        self.nodes[node] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        node
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut current = 0;
        loop {
            match &self.nodes[current] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    current = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

fn sort_by_feature(x: &[Vec<f64>], indices: &mut [usize], feature: usize) {
    indices.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));
}

fn best_split(
    x: &[Vec<f64>],
    target: &[f64],
    indices: &mut [usize],
    total: f64,
    min_leaf: usize,
) -> Option<BestSplit> {
    let n = indices.len();
    let n_features = x[indices[0]].len();
    let parent_score = total * total / n as f64;
    let mut best: Option<BestSplit> = None;

    for feature in 0..n_features {
        sort_by_feature(x, indices, feature);
        let mut left_sum = 0.0;
        for position in 1..n {
            left_sum += target[indices[position - 1]];
            let left_n = position;
            let right_n = n - position;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }
            let lo = x[indices[position - 1]][feature];
            let hi = x[indices[position]][feature];
            if lo >= hi {
                continue;
            }
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / left_n as f64 + right_sum * right_sum / right_n as f64
                - parent_score;
            let better = match &best {
                Some(current) => gain > current.gain,
                None => gain > MIN_GAIN,
            };
            if better {
                best = Some(BestSplit {
                    feature,
                    threshold: (lo + hi) / 2.0,
                    position,
                    gain,
                });
            }
        }
    }

    best
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbmModel {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    feature_importances: Vec<f64>,
}

impl GbmModel {
    pub fn fit(x: &[Vec<f64>], y: &[f64], config: &GbmConfig) -> Result<Self, ForecastError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(ForecastError::model_fit(
                MODEL,
                format!("{} feature rows for {} targets", x.len(), y.len()),
            ));
        }
        let n_features = x[0].len();
        if n_features == 0 || x.iter().any(|row| row.len() != n_features) {
            return Err(ForecastError::model_fit(MODEL, "ragged feature matrix"));
        }
        if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
            return Err(ForecastError::model_fit(MODEL, "non-finite input value"));
        }

        let params = TreeParams {
            max_depth: config.max_depth,
            min_samples_split: config.min_samples_split.max(2),
            min_samples_leaf: config.min_samples_leaf.max(1),
        };
        let n = y.len();
        let init = y.iter().sum::<f64>() / n as f64;
        let mut predictions = vec![init; n];
        let mut residuals = vec![0.0; n];
        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(config.n_estimators);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let sample_size = ((n as f64 * config.subsample).floor() as usize).clamp(1, n);

        for _ in 0..config.n_estimators {
            for i in 0..n {
                residuals[i] = y[i] - predictions[i];
            }
            let mut indices: Vec<usize> = (0..n).collect();
            if sample_size < n {
                indices.shuffle(&mut rng);
                indices.truncate(sample_size);
            }
            let tree = RegressionTree::fit(x, &residuals, &mut indices, &params, &mut importances);
            for (i, row) in x.iter().enumerate() {
                predictions[i] += config.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for value in importances.iter_mut() {
                *value /= total;
            }
        }

        Ok(Self {
            init,
            learning_rate: config.learning_rate,
            trees,
            feature_importances: importances,
        })
    }

    pub fn predict_one(&self, row: &[f64]) -> f64 {
        self.init
            + self
                .trees
                .iter()
                .map(|tree| self.learning_rate * tree.predict(row))
                .sum::<f64>()
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.predict_one(row)).collect()
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn max_tree_depth(&self) -> usize {
        self.trees.iter().map(RegressionTree::depth).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let y = (0..40).map(|i| if i < 20 { 2.0 } else { 8.0 }).collect();
        (x, y)
    }

    #[test]
    fn constant_target_predicts_the_constant() {
        let x: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64]).collect();
        let y = vec![10.0; 30];
        let model = GbmModel::fit(&x, &y, &GbmConfig::default()).unwrap();
        assert_eq!(model.predict_one(&[100.0]), 10.0);
        assert_eq!(model.max_tree_depth(), 0);
        assert!(model.feature_importances().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn learns_a_step_on_the_informative_feature() {
        let (x, y) = step_data();
        let model = GbmModel::fit(&x, &y, &GbmConfig::default()).unwrap();
        assert!((model.predict_one(&[5.0, 1.0]) - 2.0).abs() < 0.01);
        assert!((model.predict_one(&[35.0, 1.0]) - 8.0).abs() < 0.01);
        let importances = model.feature_importances();
        assert!(importances[0] > importances[1]);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn respects_max_depth() {
        let x: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..64).map(|i| ((i * 7) % 11) as f64).collect();
        let config = GbmConfig {
            max_depth: 2,
            n_estimators: 5,
            ..GbmConfig::default()
        };
        let model = GbmModel::fit(&x, &y, &config).unwrap();
        assert_eq!(model.n_trees(), 5);
        assert!(model.max_tree_depth() <= 2);
    }

    #[test]
    fn seeded_subsampling_is_deterministic() {
        let (x, y) = step_data();
        let config = GbmConfig {
            subsample: 0.5,
            ..GbmConfig::default()
        };
        let first = GbmModel::fit(&x, &y, &config).unwrap();
        let second = GbmModel::fit(&x, &y, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_mismatched_or_non_finite_input() {
        let config = GbmConfig::default();
        assert!(GbmModel::fit(&[vec![1.0]], &[1.0, 2.0], &config).is_err());
        assert!(GbmModel::fit(&[vec![f64::NAN]], &[1.0], &config).is_err());
        assert!(GbmModel::fit(&[], &[], &config).is_err());
    }
}
