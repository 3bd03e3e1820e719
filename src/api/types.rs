//! API request/response types

use serde::{Deserialize, Serialize};

use crate::features::{PredictItem, PredictionResult};

/// Health check response for `GET /`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status, always `"ok"` when the process answers
    pub status: String,
    /// Whether the model artifact loaded at startup
    pub model_loaded: bool,
    /// Model directory the service was started with
    pub model_dir: String,
    /// Number of resolved input columns (0 when inferred per request)
    pub feature_order_len: usize,
    /// Service version
    pub version: String,
}

/// Batch prediction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictBatchRequest {
    /// Items to score
    pub items: Vec<PredictItem>,
}

/// Batch prediction response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictBatchResponse {
    /// One result per request item, in request order
    pub results: Vec<PredictionResult>,
}

/// Error and status body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message
    pub detail: String,
}

impl ErrorResponse {
    /// Wrap a message
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}
