//! Behavioral feature derivation and model feature selection.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::schema::{COMBAT_EVENTS_COLUMN, DAMAGE_COLUMN, TIME_COLUMN};
use crate::table::{RecordTable, Value};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

pub const MOVEMENT_SPEED: &str = "movement_speed";
pub const ENGAGEMENT_RATE: &str = "engagement_rate";
pub const WEAPON_SWITCH_FREQ: &str = "weapon_switch_freq";
pub const DAMAGE_EFFICIENCY: &str = "damage_efficiency";
pub const AVG_TEAMMATE_DISTANCE: &str = "avg_teammate_distance";

/// Model features in the order the model expects them.
pub const MODEL_FEATURE_COLUMNS: [&str; 5] = [
    MOVEMENT_SPEED,
    ENGAGEMENT_RATE,
    WEAPON_SWITCH_FREQ,
    DAMAGE_EFFICIENCY,
    AVG_TEAMMATE_DISTANCE,
];

const DISTANCE_COLUMN: &str = "distance";
const WEAPON_SWAPS_COLUMN: &str = "weapon_swaps";
const SHOTS_FIRED_COLUMN: &str = "shots_fired";
const TEAMMATE_DISTANCES_COLUMN: &str = "teammate_distances";

/// Ordered feature layout a model was trained on. Every column is `f64`.
///
/// A schema stored by a caller and read back after an upgrade can carry an
/// older `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<String>,
}

impl FeatureSchema {
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(String::as_str).collect()
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

/// A ratio feature: `numerator / denominator`, missing on a zero denominator.
struct RatioRule {
    output: &'static str,
    numerator: &'static str,
    denominator: &'static str,
}

const RATIO_RULES: [RatioRule; 4] = [
    RatioRule {
        output: MOVEMENT_SPEED,
        numerator: DISTANCE_COLUMN,
        denominator: TIME_COLUMN,
    },
    RatioRule {
        output: ENGAGEMENT_RATE,
        numerator: COMBAT_EVENTS_COLUMN,
        denominator: TIME_COLUMN,
    },
    RatioRule {
        output: WEAPON_SWITCH_FREQ,
        numerator: WEAPON_SWAPS_COLUMN,
        denominator: TIME_COLUMN,
    },
    RatioRule {
        output: DAMAGE_EFFICIENCY,
        numerator: DAMAGE_COLUMN,
        denominator: SHOTS_FIRED_COLUMN,
    },
];

/// Appends every derivable feature to a copy of `table`.
///
/// A feature is computed only when all of its inputs are present as columns.
/// Per-row arithmetic never fails: a zero denominator, a non-numeric operand
/// or a teammate-distance value that is not a list all yield `Missing`.
/// Finally every column left without a single value is dropped.
pub fn derive_features(table: &RecordTable) -> RecordTable {
    let mut out = table.clone();
    let mut derived = Vec::new();

    for rule in &RATIO_RULES {
        let (Some(numerator), Some(denominator)) = (
            table.numeric_column(rule.numerator),
            table.numeric_column(rule.denominator),
        ) else {
            continue;
        };

        let values: Vec<Value> = numerator
            .iter()
            .zip(&denominator)
            .map(|(n, d)| Value::from_f64(safe_ratio(*n, *d)))
            .collect();
        out.set_column(rule.output, values);
        derived.push(rule.output);
    }

    if let Some(distances) = table.column(TEAMMATE_DISTANCES_COLUMN) {
        let values: Vec<Value> = distances
            .iter()
            .map(|value| Value::from_f64(mean_of_list(value)))
            .collect();
        out.set_column(AVG_TEAMMATE_DISTANCE, values);
        derived.push(AVG_TEAMMATE_DISTANCE);
    }

    let dropped = out.drop_empty_columns();

    info!(
        component = "features",
        event = "features.derive.finish",
        rows = out.n_rows(),
        derived = ?derived,
        dropped_empty = ?dropped
    );

    out
}

/// Projects onto the model features that are present, in canonical order.
pub fn select_model_features(table: &RecordTable) -> RecordTable {
    table.select(&MODEL_FEATURE_COLUMNS)
}

pub fn build_feature_schema<S: AsRef<str>>(names: &[S]) -> FeatureSchema {
    let columns: Vec<String> = names.iter().map(|name| name.as_ref().to_string()).collect();
    let fingerprint = schema_fingerprint(FEATURE_SCHEMA_VERSION, &columns);

    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint,
        columns,
    }
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), FeatureError> {
    if expected_version != actual.version {
        return Err(FeatureError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(FeatureError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn safe_ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let (n, d) = (numerator?, denominator?);
    if d == 0.0 {
        return None;
    }
    let ratio = n / d;
    ratio.is_finite().then_some(ratio)
}

fn mean_of_list(value: &Value) -> Option<f64> {
    let items = value.as_list()?;
    if items.is_empty() {
        return None;
    }
    let mut sum = 0.0;
    for item in items {
        sum += item.as_f64()?;
    }
    Some(sum / items.len() as f64)
}

fn schema_fingerprint(version: u32, columns: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.as_bytes());
        hasher.update(":f64;");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_missing_on_zero_or_missing_operands() {
        assert_eq!(safe_ratio(Some(10.0), Some(4.0)), Some(2.5));
        assert_eq!(safe_ratio(Some(10.0), Some(0.0)), None);
        assert_eq!(safe_ratio(Some(0.0), Some(0.0)), None);
        assert_eq!(safe_ratio(None, Some(2.0)), None);
        assert_eq!(safe_ratio(Some(1.0), None), None);
    }

    #[test]
    fn list_mean_requires_numeric_non_empty_list() {
        let list = Value::List(vec![Value::Int(10), Value::Int(20), Value::Float(30.0)]);
        assert_eq!(mean_of_list(&list), Some(20.0));
        assert_eq!(mean_of_list(&Value::List(Vec::new())), None);
        assert_eq!(
            mean_of_list(&Value::List(vec![Value::Int(1), Value::Missing])),
            None
        );
        assert_eq!(mean_of_list(&Value::Str("not a list".to_string())), None);
        assert_eq!(mean_of_list(&Value::Int(5)), None);
    }

    #[test]
    fn fingerprint_depends_on_column_order() {
        let a = build_feature_schema(&["movement_speed", "engagement_rate"]);
        let b = build_feature_schema(&["engagement_rate", "movement_speed"]);
        let a2 = build_feature_schema(&["movement_speed", "engagement_rate"]);
        assert_eq!(a, a2);
        assert_ne!(a.fingerprint, b.fingerprint);
        assert_eq!(a.names(), vec!["movement_speed", "engagement_rate"]);
    }

    #[test]
    fn schema_from_an_older_release_is_rejected_by_version() {
        let current = build_feature_schema(&["movement_speed"]);
        let stored = serde_json::json!({
            "version": 0,
            "fingerprint": current.fingerprint,
            "columns": ["movement_speed"],
        });
        let stored: FeatureSchema = serde_json::from_value(stored).unwrap();

        let err =
            assert_schema_compatible(FEATURE_SCHEMA_VERSION, &current.fingerprint, &stored)
                .unwrap_err();
        assert!(matches!(
            err,
            FeatureError::SchemaVersionMismatch {
                expected: FEATURE_SCHEMA_VERSION,
                actual: 0
            }
        ));
        assert!(assert_schema_compatible(
            FEATURE_SCHEMA_VERSION,
            &current.fingerprint,
            &current
        )
        .is_ok());
    }
}
