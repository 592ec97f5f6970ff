//! Maps heterogeneous raw sources onto the canonical column names.

use std::path::Path;

use tracing::info;

use crate::loader::{load_source, LoadError, SourceKind};
use crate::table::{RecordTable, Value};

pub const TIME_COLUMN: &str = "time";
pub const SURVIVAL_TIME_COLUMN: &str = "survival_time";
pub const DAMAGE_COLUMN: &str = "damage";
pub const COMBAT_EVENTS_COLUMN: &str = "combat_events";

const HISTORY_DURATION: &str = "my_duration";
const HISTORY_DAMAGE: &str = "my_damage";
const HISTORY_COMBAT_ADDENDS: [&str; 3] = ["my_kills", "my_assists", "my_knocks"];

/// Loads `path` as `kind` and applies that variant's normalization.
pub fn load_and_normalize(path: &Path, kind: SourceKind) -> Result<RecordTable, LoadError> {
    let raw = load_source(path, kind)?;
    Ok(normalize(raw, kind))
}

pub fn normalize(raw: RecordTable, kind: SourceKind) -> RecordTable {
    let input_rows = raw.n_rows();
    let table = match kind {
        SourceKind::MatchHistory => normalize_match_history(raw),
        SourceKind::Telemetry => normalize_telemetry(raw),
    };

    info!(
        component = "schema",
        event = "schema.normalize.finish",
        source_kind = kind.as_str(),
        input_rows,
        output_rows = table.n_rows(),
        columns = table.n_columns()
    );

    table
}

/// Per-match history export: `my_*` columns become canonical ones.
pub fn normalize_match_history(raw: RecordTable) -> RecordTable {
    let mut table = clean(raw);

    if let Some(duration) = table.column(HISTORY_DURATION).map(<[Value]>::to_vec) {
        table.set_column(TIME_COLUMN, duration.clone());
        table.set_column(SURVIVAL_TIME_COLUMN, duration);
    }

    if let Some(damage) = table.column(HISTORY_DAMAGE).map(<[Value]>::to_vec) {
        table.set_column(DAMAGE_COLUMN, damage);
    }

    for name in HISTORY_COMBAT_ADDENDS {
        if !table.has_column(name) {
            table.set_column(name, vec![Value::Int(0); table.n_rows()]);
        }
    }

    let combat_events: Vec<Value> = (0..table.n_rows())
        .map(|row| {
            let addends = HISTORY_COMBAT_ADDENDS
                .iter()
                .filter_map(|name| table.column(name).map(|values| &values[row]));
            combat_sum(addends)
        })
        .collect();
    table.set_column(COMBAT_EVENTS_COLUMN, combat_events);

    table
}

/// Telemetry exports already use canonical names; only generic cleaning applies.
pub fn normalize_telemetry(raw: RecordTable) -> RecordTable {
    clean(raw)
}

fn clean(mut table: RecordTable) -> RecordTable {
    table.drop_missing_rows();
    table
}

/// Missing, non-numeric and negative addends count as zero.
fn combat_sum<'a>(addends: impl Iterator<Item = &'a Value>) -> Value {
    let mut int_total: i64 = 0;
    let mut float_total = 0.0_f64;
    let mut integral = true;

    for value in addends {
        match value {
            Value::Int(v) if *v > 0 => {
                int_total = int_total.saturating_add(*v);
                float_total += *v as f64;
            }
            Value::Float(v) if *v > 0.0 && v.is_finite() => {
                integral = false;
                float_total += v;
            }
            Value::Float(_) => integral = false,
            _ => {}
        }
    }

    if integral {
        Value::Int(int_total)
    } else {
        Value::Float(float_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(header: Vec<&str>, rows: Vec<Vec<Value>>) -> RecordTable {
        RecordTable::from_rows(header, rows)
    }

    #[test]
    fn history_row_maps_duration_damage_and_combat_events() {
        let raw = history(
            vec!["my_duration", "my_damage", "my_kills", "my_assists", "my_knocks"],
            vec![vec![
                Value::Int(600),
                Value::Int(800),
                Value::Int(2),
                Value::Int(1),
                Value::Int(1),
            ]],
        );

        let table = normalize_match_history(raw);
        assert_eq!(table.column("time").unwrap(), &[Value::Int(600)]);
        assert_eq!(table.column("survival_time").unwrap(), &[Value::Int(600)]);
        assert_eq!(table.column("damage").unwrap(), &[Value::Int(800)]);
        assert_eq!(table.column("combat_events").unwrap(), &[Value::Int(4)]);
        assert!(table.has_column("my_duration"));
    }

    #[test]
    fn absent_addend_columns_count_as_zero() {
        let raw = history(
            vec!["my_duration", "my_kills"],
            vec![vec![Value::Int(100), Value::Int(3)]],
        );

        let table = normalize_match_history(raw);
        assert_eq!(table.column("combat_events").unwrap(), &[Value::Int(3)]);
        assert_eq!(table.column("my_assists").unwrap(), &[Value::Int(0)]);
        assert_eq!(table.column("my_knocks").unwrap(), &[Value::Int(0)]);
    }

    #[test]
    fn missing_addends_are_zero_and_float_addends_sum_as_float() {
        let raw = history(
            vec!["my_kills", "my_assists", "my_knocks"],
            vec![
                vec![Value::Missing, Value::Int(2), Value::Missing],
                vec![Value::Float(1.0), Value::Float(f64::NAN), Value::Int(1)],
            ],
        );

        let table = normalize_match_history(raw);
        assert_eq!(
            table.column("combat_events").unwrap(),
            &[Value::Int(2), Value::Float(2.0)]
        );
    }

    #[test]
    fn combat_events_never_negative() {
        let raw = history(
            vec!["my_kills", "my_assists", "my_knocks"],
            vec![vec![
                Value::Int(-5),
                Value::Str("two".to_string()),
                Value::Int(1),
            ]],
        );

        let table = normalize_match_history(raw);
        assert_eq!(table.column("combat_events").unwrap(), &[Value::Int(1)]);
    }

    #[test]
    fn all_missing_rows_are_dropped_before_mapping() {
        let raw = history(
            vec!["my_duration", "my_damage"],
            vec![
                vec![Value::Missing, Value::Missing],
                vec![Value::Int(300), Value::Int(120)],
            ],
        );

        let table = normalize_match_history(raw);
        assert_eq!(table.n_rows(), 1);
        assert_eq!(table.column("survival_time").unwrap(), &[Value::Int(300)]);
    }

    #[test]
    fn telemetry_keeps_names_untouched() {
        let raw = history(
            vec!["time", "distance"],
            vec![
                vec![Value::Int(10), Value::Int(50)],
                vec![Value::Missing, Value::Missing],
            ],
        );

        let table = normalize_telemetry(raw);
        assert_eq!(table.column_names(), vec!["time", "distance"]);
        assert_eq!(table.n_rows(), 1);
        assert!(!table.has_column("combat_events"));
    }
}
