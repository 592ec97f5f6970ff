//! Raw source loading: per-match history CSV and telemetry JSON exports.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use crate::table::{RecordTable, Value};

/// Tokens read as missing, matching the NA set common tabular tooling uses.
const NA_TOKENS: [&str; 14] = [
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "NULL", "null", "None", "<NA>", "#N/A",
    "#NA",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Flat per-match history table (`.csv`).
    MatchHistory,
    /// Raw telemetry export (`.json`), already using canonical names.
    Telemetry,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::MatchHistory),
            "json" => Some(Self::Telemetry),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MatchHistory => "match_history",
            Self::Telemetry => "telemetry",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::MatchHistory => "csv",
            Self::Telemetry => "json",
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("source file not found: {path}")]
    SourceNotFound { path: PathBuf },
    #[error("invalid input format for {path}: {reason}")]
    InvalidInputFormat { path: PathBuf, reason: String },
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub fn load_source(path: &Path, kind: SourceKind) -> Result<RecordTable, LoadError> {
    if !path.is_file() {
        return Err(LoadError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }

    if SourceKind::from_path(path) != Some(kind) {
        return Err(invalid(
            path,
            format!(
                "expected a .{} file for {} input",
                kind.extension(),
                kind.as_str()
            ),
        ));
    }

    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let table = match kind {
        SourceKind::MatchHistory => parse_history_csv(path, &bytes)?,
        SourceKind::Telemetry => parse_telemetry_json(path, &bytes)?,
    };

    debug!(
        component = "loader",
        event = "loader.source.read",
        path = %path.display(),
        source_kind = kind.as_str(),
        rows = table.n_rows(),
        columns = table.n_columns()
    );

    Ok(table)
}

fn parse_history_csv(path: &Path, bytes: &[u8]) -> Result<RecordTable, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let header: Vec<String> = reader
        .headers()
        .map_err(|err| invalid(path, format!("unreadable header: {err}")))?
        .iter()
        .map(|name| name.trim().to_string())
        .collect();

    let mut seen = HashSet::new();
    for name in &header {
        if !seen.insert(name.as_str()) {
            return Err(invalid(path, format!("duplicate column '{name}'")));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| invalid(path, err.to_string()))?;
        rows.push(record.iter().map(parse_cell).collect());
    }

    Ok(RecordTable::from_rows(header, rows))
}

fn parse_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if NA_TOKENS.contains(&trimmed) {
        return Value::Missing;
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Value::Int(v);
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return Value::Float(v);
    }
    Value::Str(trimmed.to_string())
}

fn parse_telemetry_json(path: &Path, bytes: &[u8]) -> Result<RecordTable, LoadError> {
    let parsed: JsonValue = serde_json::from_slice(bytes)
        .map_err(|err| invalid(path, format!("malformed JSON: {err}")))?;
    let JsonValue::Array(records) = parsed else {
        return Err(invalid(path, "top-level value must be an array of records".to_string()));
    };

    let mut header: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for (idx, record) in records.iter().enumerate() {
        let JsonValue::Object(fields) = record else {
            return Err(invalid(path, format!("record {idx} is not an object")));
        };
        for key in fields.keys() {
            if seen.insert(key.clone()) {
                header.push(key.clone());
            }
        }
    }

    let rows = records
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|fields| {
            header
                .iter()
                .map(|key| fields.get(key).map_or(Value::Missing, json_to_value))
                .collect()
        })
        .collect();

    Ok(RecordTable::from_rows(header, rows))
}

fn json_to_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Missing,
        JsonValue::Bool(b) => Value::Int(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(v) => Value::Int(v),
            None => Value::from_f64(n.as_f64()),
        },
        JsonValue::String(s) => Value::Str(s.clone()),
        JsonValue::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        JsonValue::Object(_) => Value::Str(value.to_string()),
    }
}

fn invalid(path: &Path, reason: String) -> LoadError {
    LoadError::InvalidInputFormat {
        path: path.to_path_buf(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn source_kind_follows_extension() {
        assert_eq!(
            SourceKind::from_path(Path::new("a/History.CSV")),
            Some(SourceKind::MatchHistory)
        );
        assert_eq!(
            SourceKind::from_path(Path::new("sample_telemetry.json")),
            Some(SourceKind::Telemetry)
        );
        assert_eq!(SourceKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(SourceKind::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn csv_cells_are_typed_and_na_tokens_are_missing() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "history.csv",
            "my_duration, my_damage ,legend\n600,812.5,Wraith\nNA,,  \n",
        );

        let table = load_source(&path, SourceKind::MatchHistory).unwrap();
        assert_eq!(table.column_names(), vec!["my_duration", "my_damage", "legend"]);
        assert_eq!(
            table.column("my_duration").unwrap(),
            &[Value::Int(600), Value::Missing]
        );
        assert_eq!(
            table.column("my_damage").unwrap(),
            &[Value::Float(812.5), Value::Missing]
        );
        assert_eq!(
            table.column("legend").unwrap(),
            &[Value::Str("Wraith".to_string()), Value::Missing]
        );
    }

    #[test]
    fn ragged_csv_is_invalid_input() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "bad.csv", "a,b\n1,2,3\n");
        let err = load_source(&path, SourceKind::MatchHistory).unwrap_err();
        assert!(matches!(err, LoadError::InvalidInputFormat { .. }));
    }

    #[test]
    fn duplicate_csv_header_is_invalid_input() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "dup.csv", "a,a\n1,2\n");
        let err = load_source(&path, SourceKind::MatchHistory).unwrap_err();
        assert!(matches!(err, LoadError::InvalidInputFormat { .. }));
    }

    #[test]
    fn json_records_union_keys_and_keep_lists() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "telemetry.json",
            r#"[
                {"time": 300, "teammate_distances": [10, 20.5], "alive": true},
                {"distance": 1200.5, "time": null, "meta": {"map": "olympus"}}
            ]"#,
        );

        let table = load_source(&path, SourceKind::Telemetry).unwrap();
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.column("time").unwrap(), &[Value::Int(300), Value::Missing]);
        assert_eq!(
            table.column("teammate_distances").unwrap()[0],
            Value::List(vec![Value::Int(10), Value::Float(20.5)])
        );
        assert_eq!(table.column("alive").unwrap()[0], Value::Int(1));
        assert_eq!(table.column("distance").unwrap()[0], Value::Missing);
        assert_eq!(
            table.column("meta").unwrap()[1],
            Value::Str(r#"{"map":"olympus"}"#.to_string())
        );
    }

    #[test]
    fn json_must_be_array_of_objects() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "obj.json", r#"{"time": 1}"#);
        let err = load_source(&path, SourceKind::Telemetry).unwrap_err();
        assert!(matches!(err, LoadError::InvalidInputFormat { .. }));

        let path = write(dir.path(), "scalars.json", "[1, 2]");
        let err = load_source(&path, SourceKind::Telemetry).unwrap_err();
        assert!(matches!(err, LoadError::InvalidInputFormat { .. }));
    }

    #[test]
    fn extension_mismatch_is_invalid_input() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "sample_telemetry.json", "[]");
        let err = load_source(&path, SourceKind::MatchHistory).unwrap_err();
        assert!(matches!(err, LoadError::InvalidInputFormat { .. }));
    }

    #[test]
    fn missing_file_is_source_not_found() {
        let dir = tempdir().unwrap();
        let err =
            load_source(&dir.path().join("absent.csv"), SourceKind::MatchHistory).unwrap_err();
        assert!(matches!(err, LoadError::SourceNotFound { .. }));
    }
}
