//! Metrics collection and Prometheus exposition
//!
//! Tracks the prediction endpoint's health:
//! - Prediction requests per endpoint and their end-to-end latency
//! - Pipeline failures per endpoint and stage
//! - Whether the model loaded at startup
//! - Distribution of predicted values
//! - Per-route HTTP request counts and durations
//!
//! All series live in one [`prometheus::Registry`] owned by the collector and
//! are rendered by [`MetricsCollector::to_prometheus`].

use std::time::Duration;

use prometheus::{
    proto::MetricFamily, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};
use thiserror::Error;

use crate::pipeline::Stage;

/// Bucket bounds (seconds) for `app_prediction_latency_seconds`
pub const PREDICTION_LATENCY_BUCKETS: [f64; 9] = [0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0];

/// Bucket bounds (seconds) for `http_request_duration_seconds`
pub const HTTP_DURATION_BUCKETS: [f64; 3] = [0.1, 0.5, 1.0];

/// Bucket bounds for `app_predicted_price`
pub const PREDICTED_VALUE_BUCKETS: [f64; 8] =
    [1e6, 2e6, 5e6, 1e7, 2e7, 5e7, 1e8, 1e9];

/// A predicted value could not be recorded
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("cannot record non-finite value {0}")]
pub struct ObserveError(pub f64);

/// Central metrics collector shared by all handlers
///
/// Cloning is cheap; clones share the same series.
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Registry,
    predictions_total: IntCounterVec,
    inference_errors_total: IntCounterVec,
    prediction_latency: Histogram,
    model_loaded: IntGauge,
    predicted_value: Histogram,
    http_requests_total: IntCounterVec,
    http_request_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a collector with every series registered
    ///
    /// # Errors
    ///
    /// Returns the registry error if a metric definition is rejected.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let predictions_total = IntCounterVec::new(
            Opts::new("app_predictions_total", "Total number of predictions"),
            &["endpoint"],
        )?;
        let inference_errors_total = IntCounterVec::new(
            Opts::new("app_inference_errors_total", "Total number of inference errors"),
            &["endpoint", "stage"],
        )?;
        let prediction_latency = Histogram::with_opts(
            HistogramOpts::new("app_prediction_latency_seconds", "Prediction latency in seconds")
                .buckets(PREDICTION_LATENCY_BUCKETS.to_vec()),
        )?;
        let model_loaded = IntGauge::new(
            "app_model_loaded",
            "Model loaded flag (1=loaded, 0=not loaded)",
        )?;
        let predicted_value = Histogram::with_opts(
            HistogramOpts::new("app_predicted_price", "Distribution of predicted price")
                .buckets(PREDICTED_VALUE_BUCKETS.to_vec()),
        )?;
        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "http_requests_total",
                "Total number of requests by method, status and handler",
            ),
            &["handler", "method", "status"],
        )?;
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Latency with only few buckets by handler",
            )
            .buckets(HTTP_DURATION_BUCKETS.to_vec()),
            &["handler", "method"],
        )?;

        registry.register(Box::new(predictions_total.clone()))?;
        registry.register(Box::new(inference_errors_total.clone()))?;
        registry.register(Box::new(prediction_latency.clone()))?;
        registry.register(Box::new(model_loaded.clone()))?;
        registry.register(Box::new(predicted_value.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            registry,
            predictions_total,
            inference_errors_total,
            prediction_latency,
            model_loaded,
            predicted_value,
            http_requests_total,
            http_request_duration,
        })
    }

    /// Count one finished prediction request and record its latency
    pub fn record_prediction(&self, endpoint: &str, latency: Duration) {
        self.predictions_total.with_label_values(&[endpoint]).inc();
        self.prediction_latency.observe(latency.as_secs_f64());
    }

    /// Count one pipeline failure at `stage`
    pub fn record_stage_error(&self, endpoint: &str, stage: Stage) {
        self.inference_errors_total
            .with_label_values(&[endpoint, stage.as_str()])
            .inc();
    }

    /// Add a predicted value to the distribution
    ///
    /// # Errors
    ///
    /// Rejects NaN and infinities, which would poison the running sum.
    pub fn observe_prediction_value(&self, value: f64) -> Result<(), ObserveError> {
        if !value.is_finite() {
            return Err(ObserveError(value));
        }
        self.predicted_value.observe(value);
        Ok(())
    }

    /// Set the model-loaded gauge
    pub fn set_model_loaded(&self, loaded: bool) {
        self.model_loaded.set(i64::from(loaded));
    }

    /// Count one HTTP request on a matched route
    pub fn record_http(&self, handler: &str, method: &str, status: u16, duration: Duration) {
        let group = format!("{}xx", status / 100);
        self.http_requests_total
            .with_label_values(&[handler, method, &group])
            .inc();
        self.http_request_duration
            .with_label_values(&[handler, method])
            .observe(duration.as_secs_f64());
    }

    /// Finished prediction requests for `endpoint`
    pub fn predictions_total(&self, endpoint: &str) -> u64 {
        self.counter_sum("app_predictions_total", &[("endpoint", endpoint)])
    }

    /// Failures recorded for `(endpoint, stage)`
    pub fn stage_errors(&self, endpoint: &str, stage: Stage) -> u64 {
        self.counter_sum(
            "app_inference_errors_total",
            &[("endpoint", endpoint), ("stage", stage.as_str())],
        )
    }

    /// Failures recorded for `endpoint` across all stages
    pub fn total_stage_errors(&self, endpoint: &str) -> u64 {
        self.counter_sum("app_inference_errors_total", &[("endpoint", endpoint)])
    }

    /// Number of latency observations
    pub fn latency_count(&self) -> u64 {
        self.prediction_latency.get_sample_count()
    }

    /// `(count, sum)` of recorded predicted values
    pub fn prediction_value_summary(&self) -> (u64, f64) {
        (
            self.predicted_value.get_sample_count(),
            self.predicted_value.get_sample_sum(),
        )
    }

    /// Current gauge value
    pub fn model_loaded(&self) -> bool {
        self.model_loaded.get() == 1
    }

    /// Requests counted for `(handler, method, "2xx"/"4xx"/..)`
    pub fn http_requests(&self, handler: &str, method: &str, status_group: &str) -> u64 {
        self.counter_sum(
            "http_requests_total",
            &[
                ("handler", handler),
                ("method", method),
                ("status", status_group),
            ],
        )
    }

    /// Export all metrics in Prometheus text format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&families, &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        normalize_bucket_bounds(&String::from_utf8_lossy(&buffer))
    }

    /// Sum of counter series under `name` whose labels include `labels`
    ///
    /// Reads the gathered families so that querying never creates a series.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn counter_sum(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let families: Vec<MetricFamily> = self.registry.gather();
        let total: f64 = families
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric())
            .filter(|metric| {
                labels.iter().all(|(key, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|pair| pair.get_name() == *key && pair.get_value() == *value)
                })
            })
            .map(|metric| metric.get_counter().get_value())
            .sum();
        total as u64
    }
}

/// Write integral bucket bounds as `1.0` rather than `1`
///
/// Keeps `le` label values identical to the Python exporters the dashboards
/// were built against.
fn normalize_bucket_bounds(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 64);
    for line in text.lines() {
        out.push_str(&normalize_line(line));
        out.push('\n');
    }
    out
}

fn normalize_line(line: &str) -> String {
    const KEY: &str = "le=\"";
    let Some(start) = line.find(KEY).filter(|_| line.contains("_bucket{")) else {
        return line.to_string();
    };
    let value_start = start + KEY.len();
    let Some(len) = line[value_start..].find('"') else {
        return line.to_string();
    };
    let bound = &line[value_start..value_start + len];
    let integral = bound.parse::<f64>().is_ok_and(f64::is_finite)
        && !bound.contains(['.', 'e', 'E']);
    if integral {
        format!(
            "{}.0{}",
            &line[..value_start + len],
            &line[value_start + len..]
        )
    } else {
        line.to_string()
    }
}
