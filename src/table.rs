//! Column-oriented record table with missing-value semantics.

use std::fmt;

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// `Float(NaN)` counts as missing, the same as `Missing`.
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Missing => true,
            Self::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) if !v.is_nan() => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn from_f64(value: Option<f64>) -> Self {
        match value {
            Some(v) if !v.is_nan() => Self::Float(v),
            _ => Self::Missing,
        }
    }

    /// Text form used by tabular writers. Missing values become empty fields.
    pub fn to_field(&self) -> String {
        match self {
            Self::Missing => String::new(),
            Self::Float(v) if v.is_nan() => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("NaN"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Column {
    name: String,
    values: Vec<Value>,
}

/// Ordered named columns of equal length.
///
/// Rows carry no identity: any operation that removes rows renumbers the
/// remaining ones contiguously from zero. The row count is tracked on its own
/// so a table without columns still has a length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordTable {
    columns: Vec<Column>,
    n_rows: usize,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table with `n_rows` rows and no columns.
    pub fn with_rows(n_rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            n_rows,
        }
    }

    /// Builds a table from a header and row-major values.
    ///
    /// Short rows are padded with `Missing`; extra trailing values are ignored.
    /// A repeated header name keeps its first position and the later values.
    pub fn from_rows<S: Into<String>>(header: Vec<S>, rows: Vec<Vec<Value>>) -> Self {
        let mut table = Self::with_rows(rows.len());
        let names: Vec<String> = header.into_iter().map(Into::into).collect();
        let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); names.len()];

        for row in rows {
            let mut cells = row.into_iter();
            for column in &mut columns {
                column.push(cells.next().unwrap_or(Value::Missing));
            }
        }

        for (name, values) in names.into_iter().zip(columns) {
            table.set_column(name, values);
        }
        table
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// True only when every name is present.
    pub fn has_columns(&self, names: &[&str]) -> bool {
        names.iter().all(|name| self.has_column(name))
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.position(name).map(|idx| self.columns[idx].values.as_slice())
    }

    pub fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        self.column(name)
            .map(|values| values.iter().map(Value::as_f64).collect())
    }

    /// Replaces the named column in place, or appends it.
    ///
    /// # Panics
    ///
    /// Panics when `values.len()` differs from the table's row count.
    pub fn set_column(&mut self, name: impl Into<String>, values: Vec<Value>) {
        let name = name.into();
        assert_eq!(
            values.len(),
            self.n_rows,
            "column '{name}' has {} values, table has {} rows",
            values.len(),
            self.n_rows
        );
        match self.position(&name) {
            Some(idx) => self.columns[idx].values = values,
            None => self.columns.push(Column { name, values }),
        }
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Vec<Value>> {
        let idx = self.position(name)?;
        Some(self.columns.remove(idx).values)
    }

    pub fn row(&self, index: usize) -> impl Iterator<Item = &Value> + '_ {
        self.columns.iter().map(move |c| &c.values[index])
    }

    /// Keeps the rows for which `keep(row_index)` holds.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(usize) -> bool) {
        let mask: Vec<bool> = (0..self.n_rows).map(&mut keep).collect();
        for column in &mut self.columns {
            let mut idx = 0;
            column.values.retain(|_| {
                let keep = mask[idx];
                idx += 1;
                keep
            });
        }
        self.n_rows = mask.iter().filter(|keep| **keep).count();
    }

    /// Drops rows where every column is missing.
    pub fn drop_missing_rows(&mut self) -> usize {
        let before = self.n_rows;
        let columns = &self.columns;
        let mask: Vec<bool> = (0..self.n_rows)
            .map(|row| columns.iter().any(|c| !c.values[row].is_missing()))
            .collect();
        self.retain_rows(|row| mask[row]);
        before - self.n_rows
    }

    /// Drops columns whose every value is missing, returning their names.
    pub fn drop_empty_columns(&mut self) -> Vec<String> {
        let mut dropped = Vec::new();
        self.columns.retain(|c| {
            let empty = c.values.iter().all(Value::is_missing);
            if empty {
                dropped.push(c.name.clone());
            }
            !empty
        });
        dropped
    }

    /// Sub-table of the present `names`, in the order given.
    pub fn select(&self, names: &[&str]) -> RecordTable {
        let mut out = Self::with_rows(self.n_rows);
        for name in names {
            if let Some(values) = self.column(name) {
                out.set_column(*name, values.to_vec());
            }
        }
        out
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}
