//! Batch prediction pipeline
//!
//! A request moves strictly forward through
//! `Received -> Validated -> Assembled -> Inferred -> Responded`; the first
//! failing stage ends it with a [`PredictError`] tagged by [`Stage`].
//!
//! - [`validate`]: every item carries every resolved column (first offender wins)
//! - [`assemble`]: build the row-major [`FeatureTable`], zero-filling gaps
//! - [`infer`]: call the [`Regressor`] once for the whole table
//! - [`BatchPredictor`]: run the stages and record metrics exactly once

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use thiserror::Error;

use crate::features::{
    Cell, FeatureMap, FeatureTable, FeatureValue, PredictItem, PredictionResult,
};
use crate::metrics::MetricsCollector;
use crate::model::Regressor;
use crate::schema::ColumnOrder;

/// Endpoint label used for pipeline metrics
pub const PREDICT_ENDPOINT: &str = "/predict";

/// Pipeline stage used to classify failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Model was not available when the request arrived
    Startup,
    /// Required feature keys missing
    Validation,
    /// Feature table could not be built
    BuildTable,
    /// Model rejected the table
    ModelPredict,
}

impl Stage {
    /// Metric label for this stage
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Validation => "validation",
            Self::BuildTable => "build_df",
            Self::ModelPredict => "model_predict",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request pipeline failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    /// No model was loaded at startup
    #[error("Model is not loaded")]
    ModelUnavailable,

    /// An item lacks declared columns
    #[error("Item #{index} is missing required features: {missing:?}")]
    MissingFeatures {
        /// 0-based index of the first offending item
        index: usize,
        /// Missing column names in declared order
        missing: Vec<String>,
    },

    /// Table construction failed
    #[error("Failed to build feature table: {0}")]
    Assembly(String),

    /// Model call failed
    #[error("Inference error: {0}")]
    Inference(String),
}

impl PredictError {
    /// Stage that produced this error
    pub fn stage(&self) -> Stage {
        match self {
            Self::ModelUnavailable => Stage::Startup,
            Self::MissingFeatures { .. } => Stage::Validation,
            Self::Assembly(_) => Stage::BuildTable,
            Self::Inference(_) => Stage::ModelPredict,
        }
    }

    /// HTTP status reported to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ModelUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingFeatures { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Assembly(_) | Self::Inference(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Check that every row has every declared column as a key
///
/// An empty `columns` order always passes. Only the first offending row is
/// reported.
///
/// # Errors
///
/// [`PredictError::MissingFeatures`] naming the row index and its missing
/// columns.
pub fn validate(rows: &[&FeatureMap], columns: &ColumnOrder) -> Result<(), PredictError> {
    if columns.is_empty() {
        return Ok(());
    }

    for (index, row) in rows.iter().enumerate() {
        let missing: Vec<String> = columns
            .as_slice()
            .iter()
            .filter(|c| !row.contains_key(c.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PredictError::MissingFeatures { index, missing });
        }
    }
    Ok(())
}

/// Build the model input table
///
/// Columns are `columns` when non-empty, else the sorted keys of the first
/// row. Keys absent from a row and `null` values become `0`. Keys outside
/// the column set are dropped.
///
/// # Errors
///
/// [`PredictError::Assembly`] when one column receives text in one row and
/// a number in another.
pub fn assemble(rows: &[&FeatureMap], columns: &ColumnOrder) -> Result<FeatureTable, PredictError> {
    let names: Vec<String> = if columns.is_empty() {
        // FeatureMap is a BTreeMap, so keys are already sorted
        rows.first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    } else {
        columns.as_slice().to_vec()
    };

    check_column_types(rows, &names)?;

    let mut table = FeatureTable::new(names);
    for row in rows {
        let cells: Vec<Cell> = table
            .columns()
            .iter()
            .map(|c| row.get(c).map(|v| v.to_cell()).unwrap_or_default())
            .collect();
        table.push_row(cells);
    }
    Ok(table)
}

fn check_column_types(rows: &[&FeatureMap], names: &[String]) -> Result<(), PredictError> {
    for name in names {
        let mut first_text = None;
        let mut first_number = None;
        for (i, row) in rows.iter().enumerate() {
            match row.get(name) {
                Some(v) if v.is_numeric() => {
                    first_number.get_or_insert(i);
                },
                Some(FeatureValue::Text(_)) => {
                    first_text.get_or_insert(i);
                },
                _ => {},
            }
            if let (Some(t), Some(n)) = (first_text, first_number) {
                let (a, b) = (t.min(n), t.max(n));
                return Err(PredictError::Assembly(format!(
                    "column '{name}' mixes text and numeric values (rows {a} and {b})"
                )));
            }
        }
    }
    Ok(())
}

/// Run the model over the assembled table
///
/// # Errors
///
/// [`PredictError::Inference`] carrying the model's message, or when the
/// model returns a different number of values than there are rows.
pub fn infer(model: &dyn Regressor, table: &FeatureTable) -> Result<Vec<f64>, PredictError> {
    let preds = model
        .predict(table)
        .map_err(|e| PredictError::Inference(e.to_string()))?;

    if preds.len() != table.num_rows() {
        return Err(PredictError::Inference(format!(
            "model returned {} predictions for {} rows",
            preds.len(),
            table.num_rows()
        )));
    }
    Ok(preds)
}

/// End-to-end batch handler over one shared model
///
/// Holds the model (if it loaded), the column order resolved at startup and
/// the metrics sink. Cheap to clone.
#[derive(Clone)]
pub struct BatchPredictor {
    model: Option<Arc<dyn Regressor>>,
    columns: Arc<ColumnOrder>,
    metrics: MetricsCollector,
}

impl fmt::Debug for BatchPredictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchPredictor")
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

impl BatchPredictor {
    /// Create a predictor; `model` is `None` when loading failed
    pub fn new(
        model: Option<Arc<dyn Regressor>>,
        columns: ColumnOrder,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            model,
            columns: Arc::new(columns),
            metrics,
        }
    }

    /// Whether a model is available
    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Column order resolved at startup
    pub fn columns(&self) -> &ColumnOrder {
        &self.columns
    }

    /// Shared metrics sink
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Score a batch, returning one result per item in input order
    ///
    /// Latency and the request counter are recorded once per call whatever
    /// the outcome; a failure also bumps the error counter of its stage.
    ///
    /// # Errors
    ///
    /// The first failing stage's [`PredictError`].
    pub fn predict(&self, items: &[PredictItem]) -> Result<Vec<PredictionResult>, PredictError> {
        let start = Instant::now();
        let outcome = self.run(items);

        match &outcome {
            Ok(results) => {
                for r in results {
                    // a value the summary cannot take must not affect the response
                    let _ = self.metrics.observe_prediction_value(r.prediction);
                }
                tracing::debug!(items = items.len(), "batch scored");
            },
            Err(e) => {
                self.metrics.record_stage_error(PREDICT_ENDPOINT, e.stage());
                tracing::warn!(stage = %e.stage(), error = %e, "prediction failed");
            },
        }
        self.metrics
            .record_prediction(PREDICT_ENDPOINT, start.elapsed());
        outcome
    }

    fn run(&self, items: &[PredictItem]) -> Result<Vec<PredictionResult>, PredictError> {
        let model = self.model.as_deref().ok_or(PredictError::ModelUnavailable)?;

        if items.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<&FeatureMap> = items.iter().map(|it| &it.features).collect();
        validate(&rows, &self.columns)?;
        let table = assemble(&rows, &self.columns)?;
        let preds = infer(model, &table)?;

        Ok(items
            .iter()
            .zip(preds)
            .map(|(item, prediction)| PredictionResult {
                user_id: item.user_id.clone(),
                prediction,
            })
            .collect())
    }
}
