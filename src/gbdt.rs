//! Gradient-boosted regression trees behind a fit/predict contract.
//!
//! The trainer only talks to [`Regressor`] and [`FittedRegressor`]; the
//! boosted-tree backend here is one implementation of that contract.

use rand::seq::index;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Splits whose loss reduction falls below this are not taken.
const MIN_SPLIT_GAIN: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
pub enum RegressorError {
    #[error("cannot fit on an empty training set")]
    EmptyTrainingSet,
    #[error("target has {targets} values but feature matrix has {rows} rows")]
    TargetLengthMismatch { rows: usize, targets: usize },
    #[error("target value at row {row} is not finite")]
    NonFiniteTarget { row: usize },
    #[error("model expects {expected} feature columns, got {actual}")]
    FeatureCountMismatch { expected: usize, actual: usize },
    #[error("feature matrix data has {actual} values, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("invalid regressor config: {0}")]
    InvalidConfig(String),
}

/// Dense row-major matrix; `NaN` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    n_rows: usize,
    n_cols: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    pub fn new(n_rows: usize, n_cols: usize, data: Vec<f64>) -> Result<Self, RegressorError> {
        let expected = n_rows * n_cols;
        if data.len() != expected {
            return Err(RegressorError::ShapeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            n_rows,
            n_cols,
            data,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_cols + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.n_cols..(row + 1) * self.n_cols]
    }

    pub fn select_rows(&self, rows: &[usize]) -> FeatureMatrix {
        let mut data = Vec::with_capacity(rows.len() * self.n_cols);
        for &row in rows {
            data.extend_from_slice(self.row(row));
        }
        FeatureMatrix {
            n_rows: rows.len(),
            n_cols: self.n_cols,
            data,
        }
    }
}

/// Something that can be fitted to a feature matrix and a target.
pub trait Regressor {
    type Model: FittedRegressor;

    fn fit(&self, features: &FeatureMatrix, target: &[f64]) -> Result<Self::Model, RegressorError>;
}

/// A fitted regression function. Column order must match training.
pub trait FittedRegressor {
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>, RegressorError>;

    fn n_features(&self) -> usize;

    /// Relative importance per feature column, summing to 1 when any split exists.
    fn feature_importances(&self) -> Vec<f64> {
        vec![0.0; self.n_features()]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub reg_lambda: f64,
    pub min_child_weight: f64,
    pub seed: u64,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            learning_rate: 0.05,
            max_depth: 5,
            subsample: 0.8,
            colsample_bytree: 0.8,
            reg_lambda: 1.0,
            min_child_weight: 1.0,
            seed: 42,
        }
    }
}

impl GradientBoostingConfig {
    fn validate(&self) -> Result<(), RegressorError> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(RegressorError::InvalidConfig(
                "learning_rate must be > 0".to_string(),
            ));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(RegressorError::InvalidConfig(
                "subsample must be in (0, 1]".to_string(),
            ));
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return Err(RegressorError::InvalidConfig(
                "colsample_bytree must be in (0, 1]".to_string(),
            ));
        }
        if !(self.reg_lambda.is_finite() && self.reg_lambda >= 0.0) {
            return Err(RegressorError::InvalidConfig(
                "reg_lambda must be >= 0".to_string(),
            ));
        }
        if !(self.min_child_weight.is_finite() && self.min_child_weight >= 0.0) {
            return Err(RegressorError::InvalidConfig(
                "min_child_weight must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Squared-error gradient boosting over exact-greedy regression trees.
#[derive(Debug, Clone, Default)]
pub struct GradientBoostedTrees {
    pub config: GradientBoostingConfig,
}

impl GradientBoostedTrees {
    pub fn new(config: GradientBoostingConfig) -> Self {
        Self { config }
    }
}

impl Regressor for GradientBoostedTrees {
    type Model = GradientBoostedModel;

    fn fit(
        &self,
        features: &FeatureMatrix,
        target: &[f64],
    ) -> Result<GradientBoostedModel, RegressorError> {
        let cfg = &self.config;
        cfg.validate()?;

        let n_rows = features.n_rows();
        let n_cols = features.n_cols();
        if n_rows == 0 {
            return Err(RegressorError::EmptyTrainingSet);
        }
        if target.len() != n_rows {
            return Err(RegressorError::TargetLengthMismatch {
                rows: n_rows,
                targets: target.len(),
            });
        }
        if let Some(row) = target.iter().position(|v| !v.is_finite()) {
            return Err(RegressorError::NonFiniteTarget { row });
        }

        let base_score = target.iter().sum::<f64>() / n_rows as f64;
        let mut predictions = vec![base_score; n_rows];
        let mut gains = vec![0.0; n_cols];
        let mut trees = Vec::with_capacity(cfg.n_estimators);
        let mut rng = Pcg64::seed_from_u64(cfg.seed);

        let row_sample = sample_size(n_rows, cfg.subsample);
        let col_sample = sample_size(n_cols, cfg.colsample_bytree);

        for _ in 0..cfg.n_estimators {
            let residuals: Vec<f64> = target
                .iter()
                .zip(&predictions)
                .map(|(y, p)| y - p)
                .collect();

            let mut rows = index::sample(&mut rng, n_rows, row_sample).into_vec();
            rows.sort_unstable();
            let mut cols = if n_cols == 0 {
                Vec::new()
            } else {
                index::sample(&mut rng, n_cols, col_sample).into_vec()
            };
            cols.sort_unstable();

            let tree = TreeBuilder {
                features,
                residuals: &residuals,
                columns: &cols,
                cfg,
                nodes: Vec::new(),
                gains: &mut gains,
            }
            .build(rows);

            for (row, prediction) in predictions.iter_mut().enumerate() {
                *prediction += tree.predict_row(features.row(row));
            }
            trees.push(tree);
        }

        Ok(GradientBoostedModel {
            base_score,
            trees,
            n_features: n_cols,
            gains,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GradientBoostedModel {
    base_score: f64,
    trees: Vec<RegressionTree>,
    n_features: usize,
    gains: Vec<f64>,
}

impl GradientBoostedModel {
    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl FittedRegressor for GradientBoostedModel {
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>, RegressorError> {
        if features.n_cols() != self.n_features {
            return Err(RegressorError::FeatureCountMismatch {
                expected: self.n_features,
                actual: features.n_cols(),
            });
        }

        Ok((0..features.n_rows())
            .map(|row| {
                let values = features.row(row);
                self.base_score
                    + self
                        .trees
                        .iter()
                        .map(|tree| tree.predict_row(values))
                        .sum::<f64>()
            })
            .collect())
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn feature_importances(&self) -> Vec<f64> {
        let total: f64 = self.gains.iter().sum();
        if total <= 0.0 {
            return vec![0.0; self.n_features];
        }
        self.gains.iter().map(|g| g / total).collect()
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        missing_left: bool,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    missing_left,
                    left,
                    right,
                } => {
                    let x = row[*feature];
                    let go_left = if x.is_nan() {
                        *missing_left
                    } else {
                        x < *threshold
                    };
                    idx = if go_left { *left } else { *right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    missing_left: bool,
    gain: f64,
}

struct TreeBuilder<'a> {
    features: &'a FeatureMatrix,
    residuals: &'a [f64],
    columns: &'a [usize],
    cfg: &'a GradientBoostingConfig,
    nodes: Vec<Node>,
    gains: &'a mut [f64],
}

impl TreeBuilder<'_> {
    fn build(mut self, rows: Vec<usize>) -> RegressionTree {
        self.grow(rows, 0);
        RegressionTree { nodes: self.nodes }
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let grad_sum: f64 = rows.iter().map(|&row| self.residuals[row]).sum();
        let hess_sum = rows.len() as f64;
        let node = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: self.cfg.learning_rate * grad_sum / (hess_sum + self.cfg.reg_lambda),
        });

        if depth >= self.cfg.max_depth {
            return node;
        }
        let Some(split) = self.best_split(&rows, grad_sum) else {
            return node;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.into_iter().partition(|&row| {
            let x = self.features.get(row, split.feature);
            if x.is_nan() {
                split.missing_left
            } else {
                x < split.threshold
            }
        });

        self.gains[split.feature] += split.gain;
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[node] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            missing_left: split.missing_left,
            left,
            right,
        };
        node
    }

    fn best_split(&self, rows: &[usize], grad_sum: f64) -> Option<SplitCandidate> {
        let lambda = self.cfg.reg_lambda;
        let min_child = self.cfg.min_child_weight;
        let parent_score = score(grad_sum, rows.len() as f64, lambda);
        let mut best: Option<SplitCandidate> = None;

        for &feature in self.columns {
            let mut present = Vec::with_capacity(rows.len());
            let (mut grad_missing, mut hess_missing) = (0.0, 0.0);
            for &row in rows {
                let x = self.features.get(row, feature);
                let r = self.residuals[row];
                if x.is_nan() {
                    grad_missing += r;
                    hess_missing += 1.0;
                } else {
                    present.push((x, r));
                }
            }
            if present.is_empty() {
                continue;
            }

            let grad_present = grad_sum - grad_missing;
            let hess_present = present.len() as f64;

            // Present values left, missing values right.
            if hess_missing >= min_child && hess_present >= min_child && hess_missing > 0.0 {
                let gain = score(grad_present, hess_present, lambda)
                    + score(grad_missing, hess_missing, lambda)
                    - parent_score;
                consider(
                    &mut best,
                    SplitCandidate {
                        feature,
                        threshold: f64::INFINITY,
                        missing_left: false,
                        gain,
                    },
                );
            }

            present.sort_by(|a, b| a.0.total_cmp(&b.0));
            let (mut grad_left, mut hess_left) = (0.0, 0.0);

            for pair in present.windows(2) {
                let (x, r) = pair[0];
                let next_x = pair[1].0;
                grad_left += r;
                hess_left += 1.0;
                if x == next_x {
                    continue;
                }
                let threshold = split_point(x, next_x);
                let grad_right = grad_present - grad_left;
                let hess_right = hess_present - hess_left;

                for missing_left in [false, true] {
                    if missing_left && hess_missing == 0.0 {
                        continue;
                    }
                    let (gl, hl, gr, hr) = if missing_left {
                        (
                            grad_left + grad_missing,
                            hess_left + hess_missing,
                            grad_right,
                            hess_right,
                        )
                    } else {
                        (
                            grad_left,
                            hess_left,
                            grad_right + grad_missing,
                            hess_right + hess_missing,
                        )
                    };
                    if hl < min_child || hr < min_child {
                        continue;
                    }
                    let gain = score(gl, hl, lambda) + score(gr, hr, lambda) - parent_score;
                    consider(
                        &mut best,
                        SplitCandidate {
                            feature,
                            threshold,
                            missing_left,
                            gain,
                        },
                    );
                }
            }
        }

        best
    }
}

/// Ties keep the earlier candidate.
fn consider(best: &mut Option<SplitCandidate>, candidate: SplitCandidate) {
    if candidate.gain <= MIN_SPLIT_GAIN {
        return;
    }
    if best.map_or(true, |b| candidate.gain > b.gain) {
        *best = Some(candidate);
    }
}

fn score(grad: f64, hess: f64, lambda: f64) -> f64 {
    grad * grad / (hess + lambda)
}

/// Threshold strictly above `low` and at most `high`.
fn split_point(low: f64, high: f64) -> f64 {
    let mid = low + (high - low) / 2.0;
    if mid > low {
        mid
    } else {
        high
    }
}

fn sample_size(n: usize, fraction: f64) -> usize {
    if n == 0 {
        return 0;
    }
    ((n as f64 * fraction).round() as usize).clamp(1, n)
}
