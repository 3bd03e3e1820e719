//! HTTP API for batch prediction
//!
//! ## Endpoints
//!
//! - `GET /` - Health and model status
//! - `POST /predict` - Score a batch of items
//! - `GET /metrics` - Prometheus-formatted metrics
//! - `GET /make_test_load` - Start the load generator in the background
//!
//! ## Example
//!
//! ```rust,ignore
//! use tabserve::api::{create_router, AppState};
//!
//! let state = AppState::load(&config)?;
//! let app = create_router(state);
//! axum::serve(listener, app).await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::{
    config::{LoadConfig, ServeConfig},
    loadgen,
    metrics::MetricsCollector,
    model::{self, Regressor},
    pipeline::{BatchPredictor, PredictError},
    schema,
};

mod types;
pub use types::*;

#[cfg(test)]
mod tests;

/// Prometheus text exposition content type
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Model, resolved columns and metrics
    predictor: BatchPredictor,
    /// Directory the model was loaded from
    model_dir: Arc<PathBuf>,
    /// Settings for `/make_test_load`
    load_config: Arc<LoadConfig>,
    /// Set while a background load run is active
    load_running: Arc<AtomicBool>,
}

impl AppState {
    /// Create state around an existing predictor
    pub fn new(predictor: BatchPredictor, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            predictor,
            model_dir: Arc::new(model_dir.into()),
            load_config: Arc::new(LoadConfig::default()),
            load_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the background load generator settings
    #[must_use]
    pub fn with_load_config(mut self, config: LoadConfig) -> Self {
        self.load_config = Arc::new(config);
        self
    }

    /// Load the model and column order from `config.model_dir`
    ///
    /// A model that fails to load is logged and leaves the service running
    /// without one, so every prediction answers 500 until restart. Load
    /// generator settings come from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ServeError::Metrics`] if the metric registry cannot be
    /// built. Model problems are not errors here.
    pub fn load(config: &ServeConfig) -> crate::error::Result<Self> {
        let metrics = MetricsCollector::new()?;
        let dir = config.model_dir.as_path();

        let model: Option<Arc<dyn Regressor>> = match model::load_from_dir(dir) {
            Ok(pipeline) => {
                tracing::info!(
                    model_dir = %dir.display(),
                    model = pipeline.name(),
                    "model loaded"
                );
                Some(Arc::new(pipeline))
            },
            Err(e) => {
                tracing::error!(model_dir = %dir.display(), error = %e, "failed to load model");
                None
            },
        };
        metrics.set_model_loaded(model.is_some());

        let columns = schema::resolve(dir);
        if columns.is_empty() {
            tracing::warn!("no input signature found, columns will be inferred from requests");
        } else {
            tracing::info!(columns = ?columns.as_slice(), "resolved input columns");
        }

        Ok(Self::new(BatchPredictor::new(model, columns, metrics), dir)
            .with_load_config(LoadConfig::from_env()))
    }

    /// Batch predictor
    pub fn predictor(&self) -> &BatchPredictor {
        &self.predictor
    }

    /// Metrics collector
    pub fn metrics(&self) -> &MetricsCollector {
        self.predictor.metrics()
    }

    /// Model directory
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }
}

/// Create the API router
///
/// # Arguments
///
/// * `state` - Application state with the predictor
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/predict", post(predict_handler))
        .route("/metrics", get(metrics_handler))
        .route("/make_test_load", get(make_test_load_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_http))
        .with_state(state)
}

/// Per-route request counter and duration histogram
///
/// Installed as a route layer, so requests that match no route never get here.
async fn track_http(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let handler = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned());
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(handler) = handler {
        state
            .metrics()
            .record_http(&handler, &method, response.status().as_u16(), start.elapsed());
    }
    response
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model_loaded: state.predictor.model_loaded(),
        model_dir: state.model_dir.display().to_string(),
        feature_order_len: state.predictor.columns().len(),
        version: crate::VERSION.to_string(),
    })
}

/// Metrics handler - returns Prometheus-formatted metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics().to_prometheus(),
    )
}

fn error_response(e: &PredictError) -> (StatusCode, Json<ErrorResponse>) {
    (e.status_code(), Json(ErrorResponse::new(e.to_string())))
}

/// Batch prediction handler
///
/// Bodies that fail to decode get the same `{"detail": ...}` shape as
/// pipeline errors: 422 for a wrong shape, 400 for broken JSON.
async fn predict_handler(
    State(state): State<AppState>,
    payload: Result<Json<PredictBatchRequest>, JsonRejection>,
) -> Result<Json<PredictBatchResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection.body_text(), "rejected request body");
        (
            rejection.status(),
            Json(ErrorResponse::new(rejection.body_text())),
        )
    })?;

    let predictor = state.predictor.clone();
    let outcome = tokio::task::spawn_blocking(move || predictor.predict(&request.items))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "prediction task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(format!("Prediction task failed: {e}"))),
            )
        })?;

    match outcome {
        Ok(results) => Ok(Json(PredictBatchResponse { results })),
        Err(e) => Err(error_response(&e)),
    }
}

/// Clears the running flag when the load thread ends, even by panic
struct LoadRunGuard(Arc<AtomicBool>);

impl Drop for LoadRunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Start a background load run against the configured endpoint
async fn make_test_load_handler(State(state): State<AppState>) -> (StatusCode, Json<ErrorResponse>) {
    if state
        .load_running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("load already running")),
        );
    }

    let config = Arc::clone(&state.load_config);
    let guard = LoadRunGuard(Arc::clone(&state.load_running));
    // plain OS thread: the blocking HTTP client must stay off the runtime
    let spawned = std::thread::Builder::new()
        .name("loadgen".to_string())
        .spawn(move || {
            let _guard = guard;
            let stop = Arc::new(AtomicBool::new(false));
            match loadgen::run_load(&config, stop) {
                Ok(reports) => {
                    let sent: u64 = reports.iter().map(|r| r.sent).sum();
                    let ok: u64 = reports.iter().map(|r| r.ok).sum();
                    tracing::info!(sent, ok, "load run finished");
                },
                Err(e) => tracing::error!(error = %e, "load run failed"),
            }
        });

    // a failed spawn drops the closure and with it the guard
    if let Err(e) = spawned {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("Failed to start load: {e}"))),
        );
    }

    tracing::info!(url = %state.load_config.api_url, "load started");
    (StatusCode::OK, Json(ErrorResponse::new("load started")))
}
