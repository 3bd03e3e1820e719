//! Input column resolution
//!
//! The column order handed to the model is resolved once at startup from the
//! model directory. Sources are tried in priority order and the first one
//! that yields a non-empty name list wins:
//!
//! 1. `MLmodel` signature (`signature.inputs`)
//! 2. `final_selected_features.json` hint list
//!
//! Unreadable or malformed metadata is treated as absent. When no source
//! matches the order is empty and each request's first item decides the
//! columns.

use std::fs;
use std::path::Path;

use serde_yaml::Value as YamlValue;

/// File name of the model signature document
pub const SIGNATURE_FILE: &str = "MLmodel";
/// File name of the feature hint list
pub const FEATURE_HINT_FILE: &str = "final_selected_features.json";

/// Resolved input column order; empty means "no fixed order"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnOrder(Vec<String>);

impl ColumnOrder {
    /// Wrap an explicit list of column names
    pub fn new(columns: Vec<String>) -> Self {
        Self(columns)
    }

    /// Order that defers to request keys
    pub fn undetermined() -> Self {
        Self(Vec::new())
    }

    /// Whether no order was resolved
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of resolved columns
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Column names in order
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for ColumnOrder {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// A best-effort provider of input column names
pub trait ColumnSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Column names found under `model_dir`, or `None` if this source has
    /// nothing usable
    fn columns(&self, model_dir: &Path) -> Option<Vec<String>>;
}

/// Reads `signature.inputs` from the `MLmodel` YAML document
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureSource;

impl ColumnSource for SignatureSource {
    fn name(&self) -> &'static str {
        "signature"
    }

    fn columns(&self, model_dir: &Path) -> Option<Vec<String>> {
        let text = fs::read_to_string(model_dir.join(SIGNATURE_FILE)).ok()?;
        signature_input_names(&text)
    }
}

/// Reads a plain JSON list of feature names
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureHintSource;

impl ColumnSource for FeatureHintSource {
    fn name(&self) -> &'static str {
        "feature_hint"
    }

    fn columns(&self, model_dir: &Path) -> Option<Vec<String>> {
        let text = fs::read_to_string(model_dir.join(FEATURE_HINT_FILE)).ok()?;
        let names: Vec<String> = serde_json::from_str(&text).ok()?;
        (!names.is_empty()).then_some(names)
    }
}

/// Extract declared input names from an `MLmodel` document
///
/// `signature.inputs` may be a YAML list of `{name, type}` maps or a JSON
/// string encoding the same list. Entries without a string `name` are
/// skipped.
pub fn signature_input_names(mlmodel_yaml: &str) -> Option<Vec<String>> {
    let doc: YamlValue = serde_yaml::from_str(mlmodel_yaml).ok()?;
    let inputs = doc.get("signature")?.get("inputs")?;

    let entries: Vec<YamlValue> = match inputs {
        YamlValue::String(encoded) => {
            let json: Vec<serde_json::Value> = serde_json::from_str(encoded).ok()?;
            json.into_iter()
                .filter_map(|v| serde_yaml::to_value(v).ok())
                .collect()
        },
        YamlValue::Sequence(seq) => seq.clone(),
        _ => return None,
    };

    let names: Vec<String> = entries
        .iter()
        .filter_map(|entry| entry.get("name")?.as_str().map(str::to_string))
        .collect();

    (!names.is_empty()).then_some(names)
}

/// Resolve columns with an explicit list of sources
pub fn resolve_with(model_dir: &Path, sources: &[&dyn ColumnSource]) -> ColumnOrder {
    sources
        .iter()
        .find_map(|source| {
            let found = source.columns(model_dir);
            match &found {
                Some(cols) => tracing::debug!(
                    source = source.name(),
                    columns = cols.len(),
                    "resolved input columns"
                ),
                None => tracing::debug!(source = source.name(), "no usable column metadata"),
            }
            found
        })
        .map(ColumnOrder::new)
        .unwrap_or_default()
}

/// Resolve columns from the signature, then the hint list
pub fn resolve(model_dir: &Path) -> ColumnOrder {
    resolve_with(model_dir, &[&SignatureSource, &FeatureHintSource])
}
