//! Apex Legends survival-time modeling pipeline.
//!
//! Implemented scope:
//! - raw per-match history (CSV) and telemetry (JSON) loading
//! - schema normalization onto canonical columns
//! - behavioral feature derivation and model feature selection
//! - seeded train/eval split, gradient-boosted regression, RMSE/R²
//! - end-to-end orchestration with processed-table persistence

mod features;
mod gbdt;
mod loader;
mod observability;
mod pipeline;
mod schema;
mod table;
#[cfg(test)]
mod test_env;
mod trainer;

pub use features::{
    assert_schema_compatible, build_feature_schema, derive_features, select_model_features,
    FeatureError, FeatureSchema, AVG_TEAMMATE_DISTANCE, DAMAGE_EFFICIENCY, ENGAGEMENT_RATE,
    FEATURE_SCHEMA_VERSION, MODEL_FEATURE_COLUMNS, MOVEMENT_SPEED, WEAPON_SWITCH_FREQ,
};
pub use gbdt::{
    FeatureMatrix, FittedRegressor, GradientBoostedModel, GradientBoostedTrees,
    GradientBoostingConfig, Regressor, RegressorError,
};
pub use loader::{load_source, LoadError, SourceKind};
pub use observability::{
    init_logging, log_app_start, log_run_configured, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    pipeline_config_from_env, run_pipeline, run_pipeline_with_model, PipelineConfig,
    PipelineError, PipelineSummary,
};
pub use schema::{
    load_and_normalize, normalize, normalize_match_history, normalize_telemetry,
    COMBAT_EVENTS_COLUMN, DAMAGE_COLUMN, SURVIVAL_TIME_COLUMN, TIME_COLUMN,
};
pub use table::{RecordTable, Value};
pub use trainer::{
    r2_score, rmse, train_survival_model, train_test_split, train_with, Metrics, SplitIndices,
    TrainError, TrainedModel, TrainerConfig,
};
