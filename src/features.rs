//! Request-side data model
//!
//! A batch is a list of [`PredictItem`]s, each carrying a caller-supplied
//! identifier and a [`FeatureMap`] of raw scalar inputs. The assembler turns
//! the maps into a [`FeatureTable`] of [`Cell`]s that the model consumes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single raw feature value as received in JSON
///
/// Variant order matters for untagged decoding: `2` is an `Int`, `2.0` a
/// `Float`, and integers beyond `i64` fall through to `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// `true` / `false`
    Bool(bool),
    /// Integral number
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String value
    Text(String),
    /// JSON `null`
    Null,
}

impl FeatureValue {
    /// Whether the value was supplied as a number or boolean
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int(_) | Self::Float(_))
    }

    /// Convert to a table cell, mapping `null` to the neutral default
    pub fn to_cell(&self) -> Cell {
        match self {
            Self::Bool(b) => Cell::Number(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Cell::Number(*i as f64),
            Self::Float(f) => Cell::Number(*f),
            Self::Text(s) => Cell::Text(s.clone()),
            Self::Null => Cell::default(),
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Feature name to raw value, one per batch item
pub type FeatureMap = BTreeMap<String, FeatureValue>;

/// Caller-supplied item identifier, echoed back unchanged
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    /// Numeric identifier
    Int(i64),
    /// String identifier
    Text(String),
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ItemId {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<i64> for ItemId {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

/// One entry of a prediction batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictItem {
    /// Identifier echoed in the result
    pub user_id: ItemId,
    /// Raw features for this item
    pub features: FeatureMap,
}

/// Prediction for one batch item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Identifier copied from the request item
    pub user_id: ItemId,
    /// Model output
    pub prediction: f64,
}

/// One assembled table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Numeric value (booleans become 0/1)
    Number(f64),
    /// Categorical value
    Text(String),
}

impl Default for Cell {
    fn default() -> Self {
        Self::Number(0.0)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Row-major table handed to the model
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl FeatureTable {
    /// Empty table with the given column order
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row; the caller guarantees `row.len() == columns.len()`
    pub(crate) fn push_row(&mut self, row: Vec<Cell>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    /// Column names in table order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All rows
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of rows
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `(row, column name)`
    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }
}
