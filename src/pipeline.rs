//! End-to-end run: load, normalize, derive, select, persist, train.

use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::features::{derive_features, select_model_features};
use crate::loader::{LoadError, SourceKind};
use crate::schema::{load_and_normalize, SURVIVAL_TIME_COLUMN};
use crate::table::{RecordTable, Value};
use crate::trainer::{train_survival_model, Metrics, TrainError, TrainedModel, TrainerConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub output_filename: String,
    pub target_column: String,
    pub trainer: TrainerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            output_filename: "apex_season15_features_for_model.csv".to_string(),
            target_column: SURVIVAL_TIME_COLUMN.to_string(),
            trainer: TrainerConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn output_path(&self) -> PathBuf {
        self.processed_dir.join(&self.output_filename)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("column '{column}' not found in the feature table; {upstream_step} should have produced it")]
    MissingTargetColumn {
        column: String,
        upstream_step: &'static str,
    },
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV error writing {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub raw_path: PathBuf,
    pub source_kind: SourceKind,
    pub metrics: Metrics,
    pub output_path: PathBuf,
    pub rows_written: usize,
    pub feature_columns: Vec<String>,
    pub feature_importances: Vec<(String, f64)>,
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .raw_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        writeln!(f, "=== Training finished on {name} ===")?;
        writeln!(f, "RMSE: {:.4}", self.metrics.rmse)?;
        writeln!(f, "R^2 : {:.4}", self.metrics.r2)?;
        write!(
            f,
            "Saved processed features to: {}",
            self.output_path.display()
        )
    }
}

/// Reads `APEX_RAW_DIR`, `APEX_PROCESSED_DIR`, `APEX_OUTPUT_FILE` and
/// `APEX_TARGET_COLUMN` over the defaults. Blank values are ignored.
pub fn pipeline_config_from_env() -> PipelineConfig {
    let mut config = PipelineConfig::default();

    if let Some(dir) = non_empty_env("APEX_RAW_DIR") {
        config.raw_dir = PathBuf::from(dir);
    }
    if let Some(dir) = non_empty_env("APEX_PROCESSED_DIR") {
        config.processed_dir = PathBuf::from(dir);
    }
    if let Some(file) = non_empty_env("APEX_OUTPUT_FILE") {
        config.output_filename = file;
    }
    if let Some(column) = non_empty_env("APEX_TARGET_COLUMN") {
        config.target_column = column;
    }

    config
}

pub fn run_pipeline(
    cfg: &PipelineConfig,
    raw_filename: &str,
) -> Result<PipelineSummary, PipelineError> {
    run_pipeline_with_model(cfg, raw_filename).map(|(_, summary)| summary)
}

/// Like [`run_pipeline`], also handing the fitted model to the caller.
pub fn run_pipeline_with_model(
    cfg: &PipelineConfig,
    raw_filename: &str,
) -> Result<(TrainedModel, PipelineSummary), PipelineError> {
    let raw_path = cfg.raw_dir.join(raw_filename);
    execute(cfg, &raw_path).inspect_err(|err| {
        error!(
            component = "pipeline",
            event = "pipeline.run.error",
            raw_path = %raw_path.display(),
            error = %err
        );
    })
}

fn execute(
    cfg: &PipelineConfig,
    raw_path: &Path,
) -> Result<(TrainedModel, PipelineSummary), PipelineError> {
    if !raw_path.is_file() {
        return Err(LoadError::SourceNotFound {
            path: raw_path.to_path_buf(),
        }
        .into());
    }
    let kind = SourceKind::from_path(raw_path).ok_or_else(|| LoadError::InvalidInputFormat {
        path: raw_path.to_path_buf(),
        reason: "expected a .csv match history or a .json telemetry export".to_string(),
    })?;

    info!(
        component = "pipeline",
        event = "pipeline.run.start",
        raw_path = %raw_path.display(),
        source_kind = kind.as_str(),
        target = %cfg.target_column
    );

    let normalized = load_and_normalize(raw_path, kind)?;
    let features = derive_features(&normalized);
    let mut model_input = select_model_features(&features);
    let feature_columns: Vec<String> = model_input
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let target = features
        .column(&cfg.target_column)
        .ok_or_else(|| PipelineError::MissingTargetColumn {
            column: cfg.target_column.clone(),
            upstream_step: upstream_step(kind),
        })?
        .to_vec();
    model_input.set_column(cfg.target_column.as_str(), target);

    let output_path = cfg.output_path();
    write_table_csv(&output_path, &model_input)?;
    info!(
        component = "pipeline",
        event = "pipeline.persist.finish",
        output_path = %output_path.display(),
        rows = model_input.n_rows(),
        columns = model_input.n_columns()
    );

    let (model, metrics) = train_survival_model(&model_input, &cfg.target_column, &cfg.trainer)?;

    let summary = PipelineSummary {
        raw_path: raw_path.to_path_buf(),
        source_kind: kind,
        metrics,
        output_path,
        rows_written: model_input.n_rows(),
        feature_columns,
        feature_importances: model.feature_importances(),
    };

    info!(
        component = "pipeline",
        event = "pipeline.run.finish",
        rmse = summary.metrics.rmse,
        r2 = summary.metrics.r2,
        output_path = %summary.output_path.display()
    );

    Ok((model, summary))
}

fn upstream_step(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::MatchHistory => {
            "the match-history mapping (from 'my_duration', which must be present and non-empty)"
        }
        SourceKind::Telemetry => "the telemetry export (it must carry the canonical column)",
    }
}

/// Writes through a sibling `.tmp` file so readers never see a partial table.
fn write_table_csv(path: &Path, table: &RecordTable) -> Result<(), PipelineError> {
    let io_err = |source: io::Error| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    };
    let csv_err = |source: csv::Error| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            io_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "output path has no file name",
            ))
        })?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut writer = csv::Writer::from_path(&tmp_path).map_err(csv_err)?;
        writer
            .write_record(table.column_names())
            .map_err(csv_err)?;
        for row in 0..table.n_rows() {
            writer
                .write_record(table.row(row).map(Value::to_field))
                .map_err(csv_err)?;
        }
        writer.flush().map_err(io_err)?;
    }

    fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}

fn non_empty_env(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
