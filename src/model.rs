//! Regression model capability
//!
//! The serving pipeline only needs "table in, one number per row out". That
//! seam is the [`Regressor`] trait. The concrete artifact shipped in the
//! model directory is a [`LinearPipeline`]: an intercept, numeric
//! coefficients and one-hot weights for categorical columns, serialized as
//! `model.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Result, ServeError};
use crate::features::{Cell, FeatureTable};

/// File name of the serialized pipeline inside the model directory
pub const MODEL_FILE: &str = "model.json";

/// Failure raised by a model while predicting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ModelError(pub String);

impl ModelError {
    /// Build an error from any message
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Anything that maps a feature table to one prediction per row
pub trait Regressor: Send + Sync {
    /// Predict every row of `table`, in row order
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the table does not fit the model (missing
    /// columns, non-numeric values, internal failure).
    fn predict(&self, table: &FeatureTable) -> std::result::Result<Vec<f64>, ModelError>;

    /// Human-readable model name
    fn name(&self) -> &str {
        "regressor"
    }
}

/// Linear regression over numeric and one-hot encoded categorical inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearPipeline {
    /// Model name reported in logs
    #[serde(default)]
    pub name: Option<String>,
    /// Bias term
    #[serde(default)]
    pub intercept: f64,
    /// Weight per numeric column
    #[serde(default)]
    pub coefficients: BTreeMap<String, f64>,
    /// Weight per (categorical column, category); unknown categories add 0
    #[serde(default)]
    pub categories: BTreeMap<String, BTreeMap<String, f64>>,
}

impl LinearPipeline {
    /// Decode a pipeline from its JSON form
    ///
    /// # Errors
    ///
    /// Returns the decoder message on malformed input.
    pub fn from_json(json: &str) -> std::result::Result<Self, String> {
        serde_json::from_str(json).map_err(|e| e.to_string())
    }

    /// Every column name the pipeline reads
    pub fn required_columns(&self) -> BTreeSet<&str> {
        self.coefficients
            .keys()
            .chain(self.categories.keys())
            .map(String::as_str)
            .collect()
    }

    fn numeric(cell: &Cell, column: &str) -> std::result::Result<f64, ModelError> {
        match cell {
            Cell::Number(n) => Ok(*n),
            Cell::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                ModelError::new(format!(
                    "could not convert string to float: '{s}' (column '{column}')"
                ))
            }),
        }
    }
}

impl Regressor for LinearPipeline {
    fn predict(&self, table: &FeatureTable) -> std::result::Result<Vec<f64>, ModelError> {
        let missing: Vec<&str> = self
            .required_columns()
            .into_iter()
            .filter(|c| table.column_index(c).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ModelError::new(format!(
                "columns are missing: {missing:?}"
            )));
        }

        let numeric: Vec<(usize, &str, f64)> = self
            .coefficients
            .iter()
            .filter_map(|(c, w)| table.column_index(c).map(|i| (i, c.as_str(), *w)))
            .collect();
        let categorical: Vec<(usize, &BTreeMap<String, f64>)> = self
            .categories
            .iter()
            .filter_map(|(c, weights)| table.column_index(c).map(|i| (i, weights)))
            .collect();

        table
            .rows()
            .iter()
            .map(|row| -> std::result::Result<f64, ModelError> {
                let mut y = self.intercept;
                for &(idx, column, weight) in &numeric {
                    y += weight * Self::numeric(&row[idx], column)?;
                }
                for &(idx, weights) in &categorical {
                    y += weights.get(&row[idx].to_string()).copied().unwrap_or(0.0);
                }
                Ok(y)
            })
            .collect()
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("linear-pipeline")
    }
}

/// Load the serialized pipeline from a model directory
///
/// # Errors
///
/// [`ServeError::ModelNotFound`] when the directory or `model.json` is
/// absent, [`ServeError::Io`] on other read failures and
/// [`ServeError::ModelFormat`] when the artifact does not decode.
pub fn load_from_dir(model_dir: &Path) -> Result<LinearPipeline> {
    if !model_dir.is_dir() {
        return Err(ServeError::ModelNotFound {
            path: model_dir.to_path_buf(),
        });
    }

    let path = model_dir.join(MODEL_FILE);
    let text = fs::read_to_string(&path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            ServeError::ModelNotFound { path: path.clone() }
        } else {
            ServeError::Io {
                path: path.clone(),
                source,
            }
        }
    })?;

    LinearPipeline::from_json(&text).map_err(|reason| ServeError::ModelFormat { path, reason })
}
