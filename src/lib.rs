//! # tabserve
//!
//! Batch prediction server for tabular regression models.
//!
//! A model directory holds a serialized [`model::LinearPipeline`] and,
//! optionally, metadata naming its input columns. The server accepts batches
//! of feature maps, checks them against the resolved column order, assembles
//! a row-major table and scores the whole batch in one model call.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tabserve::{
//!     features::{FeatureMap, FeatureValue, PredictItem},
//!     metrics::MetricsCollector,
//!     model::LinearPipeline,
//!     pipeline::BatchPredictor,
//!     schema::ColumnOrder,
//! };
//!
//! let model = LinearPipeline::from_json(
//!     r#"{"intercept": 1.0, "coefficients": {"rooms": 2.0}}"#,
//! ).unwrap();
//! let columns: ColumnOrder = ["rooms"].into_iter().collect();
//! let metrics = MetricsCollector::new().unwrap();
//! let predictor = BatchPredictor::new(Some(Arc::new(model)), columns, metrics);
//!
//! let mut features = FeatureMap::new();
//! features.insert("rooms".to_string(), FeatureValue::Int(3));
//! let items = vec![PredictItem { user_id: "u-1".into(), features }];
//!
//! let results = predictor.predict(&items).unwrap();
//! assert_eq!(results[0].prediction, 7.0);
//! ```
//!
//! ## Modules
//!
//! - [`schema`]: input column order from `MLmodel` or the feature list
//! - [`pipeline`]: validate, assemble, infer
//! - [`metrics`]: Prometheus exposition
//! - [`api`]: axum router
//! - [`loadgen`]: synthetic traffic

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // counts -> f64 for metrics and test models
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::doc_markdown)] // Allow technical terms without backticks
#![allow(clippy::missing_panics_doc)] // Allow missing Panics doc sections
#![allow(clippy::float_cmp)] // Allow float comparisons in tests

/// HTTP API
pub mod api;
/// Command-line interface
pub mod cli;
pub mod config;
pub mod error;
pub mod features;
pub mod loadgen;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod schema;

// Re-exports for convenience
pub use error::{Result, ServeError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
