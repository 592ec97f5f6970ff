//! Survival-time model training and held-out evaluation.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::features::{
    assert_schema_compatible, build_feature_schema, FeatureError, FeatureSchema,
};
use crate::gbdt::{
    FeatureMatrix, FittedRegressor, GradientBoostedModel, GradientBoostedTrees,
    GradientBoostingConfig, Regressor, RegressorError,
};
use crate::table::RecordTable;

/// Absorbs float error in `n * test_fraction` so evenly divisible sizes split exactly.
const SPLIT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub test_fraction: f64,
    /// Seeds both the split and the booster.
    pub split_seed: u64,
    pub boosting: GradientBoostingConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            split_seed: 42,
            boosting: GradientBoostingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub rmse: f64,
    pub r2: f64,
    pub train_rows: usize,
    pub eval_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub eval: Vec<usize>,
}

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("target column '{column}' is missing from the model input table")]
    MissingTargetColumn { column: String },
    #[error("insufficient training data: {rows} row(s) have a value in target column '{column}'")]
    InsufficientTrainingData { column: String, rows: usize },
    #[error("invalid trainer config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Schema(#[from] FeatureError),
    #[error(transparent)]
    Regressor(#[from] RegressorError),
}

/// A fitted regressor bound to the feature layout it was trained on.
#[derive(Debug, Clone)]
pub struct TrainedModel<M = GradientBoostedModel> {
    schema: FeatureSchema,
    model: M,
}

impl<M: FittedRegressor> TrainedModel<M> {
    pub fn feature_schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.schema.names()
    }

    pub fn inner(&self) -> &M {
        &self.model
    }

    /// Predicts one value per row of `table`.
    ///
    /// The table must carry every trained feature column; extra columns such
    /// as the target are ignored and the regressor always sees the trained order.
    pub fn predict(&self, table: &RecordTable) -> Result<Vec<f64>, TrainError> {
        let names = self.schema.names();
        let projected = table.select(&names);
        let actual = build_feature_schema(&projected.column_names());
        assert_schema_compatible(self.schema.version, &self.schema.fingerprint, &actual)?;
        Ok(self.model.predict(&feature_matrix(&projected)?)?)
    }

    /// Feature names with their relative importance, most important first.
    pub fn feature_importances(&self) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = self
            .schema
            .columns
            .iter()
            .cloned()
            .zip(self.model.feature_importances())
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1));
        out
    }
}

/// Trains the gradient-boosted survival model configured by `cfg.boosting`.
///
/// The booster is seeded with `cfg.split_seed`; `cfg.boosting.seed` is ignored.
pub fn train_survival_model(
    table: &RecordTable,
    target_column: &str,
    cfg: &TrainerConfig,
) -> Result<(TrainedModel, Metrics), TrainError> {
    let regressor = GradientBoostedTrees::new(GradientBoostingConfig {
        seed: cfg.split_seed,
        ..cfg.boosting.clone()
    });
    train_with(table, target_column, cfg, &regressor)
}

/// Drops rows without a target, splits, fits `regressor` and scores the held-out rows.
///
/// Every column other than `target_column` is a feature, in table order.
pub fn train_with<R: Regressor>(
    table: &RecordTable,
    target_column: &str,
    cfg: &TrainerConfig,
    regressor: &R,
) -> Result<(TrainedModel<R::Model>, Metrics), TrainError> {
    if !(cfg.test_fraction > 0.0 && cfg.test_fraction < 1.0) {
        return Err(TrainError::InvalidConfig(
            "test_fraction must be in (0, 1)".to_string(),
        ));
    }

    let target = table
        .numeric_column(target_column)
        .ok_or_else(|| TrainError::MissingTargetColumn {
            column: target_column.to_string(),
        })?;

    let mut data = table.clone();
    data.retain_rows(|row| target[row].is_some_and(f64::is_finite));
    let y: Vec<f64> = data
        .remove_column(target_column)
        .unwrap_or_default()
        .iter()
        .filter_map(|value| value.as_f64())
        .collect();

    if y.is_empty() {
        return Err(TrainError::InsufficientTrainingData {
            column: target_column.to_string(),
            rows: 0,
        });
    }

    let feature_names = data.column_names();
    let x = feature_matrix(&data)?;
    let split = train_test_split(y.len(), cfg.test_fraction, cfg.split_seed);
    if split.train.is_empty() {
        return Err(TrainError::InsufficientTrainingData {
            column: target_column.to_string(),
            rows: y.len(),
        });
    }

    info!(
        component = "trainer",
        event = "trainer.fit.start",
        target = target_column,
        features = ?feature_names,
        dropped_missing_target = table.n_rows() - y.len(),
        train_rows = split.train.len(),
        eval_rows = split.eval.len()
    );

    let y_train: Vec<f64> = split.train.iter().map(|&row| y[row]).collect();
    let y_eval: Vec<f64> = split.eval.iter().map(|&row| y[row]).collect();
    let model = regressor.fit(&x.select_rows(&split.train), &y_train)?;
    let predicted = model.predict(&x.select_rows(&split.eval))?;

    let metrics = Metrics {
        rmse: rmse(&y_eval, &predicted),
        r2: r2_score(&y_eval, &predicted),
        train_rows: split.train.len(),
        eval_rows: split.eval.len(),
    };

    info!(
        component = "trainer",
        event = "trainer.fit.finish",
        rmse = metrics.rmse,
        r2 = metrics.r2,
        train_rows = metrics.train_rows,
        eval_rows = metrics.eval_rows
    );

    let trained = TrainedModel {
        schema: build_feature_schema(&feature_names),
        model,
    };
    Ok((trained, metrics))
}

/// Seeded shuffle; the first `ceil(n * test_fraction)` indices are held out.
pub fn train_test_split(n_rows: usize, test_fraction: f64, seed: u64) -> SplitIndices {
    let mut indices: Vec<usize> = (0..n_rows).collect();
    let mut rng = Pcg64::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_eval = ((n_rows as f64 * test_fraction - SPLIT_EPSILON).ceil().max(0.0) as usize)
        .min(n_rows);
    let train = indices.split_off(n_eval);

    SplitIndices {
        train,
        eval: indices,
    }
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return f64::NAN;
    }
    let mse = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64;
    mse.sqrt()
}

/// Coefficient of determination.
///
/// A constant `actual` scores 1.0 when matched exactly and 0.0 otherwise;
/// fewer than two samples leave it undefined (`NaN`).
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.len() < 2 {
        return f64::NAN;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

fn feature_matrix(table: &RecordTable) -> Result<FeatureMatrix, RegressorError> {
    let n_rows = table.n_rows();
    let n_cols = table.n_columns();
    let mut data = Vec::with_capacity(n_rows * n_cols);
    for row in 0..n_rows {
        data.extend(
            table
                .row(row)
                .map(|value| value.as_f64().unwrap_or(f64::NAN)),
        );
    }
    FeatureMatrix::new(n_rows, n_cols, data)
}
