//! Router tests driven through `tower::ServiceExt::oneshot`

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use super::*;
use crate::features::{Cell, FeatureTable};
use crate::metrics::MetricsCollector;
use crate::model::{LinearPipeline, ModelError};
use crate::pipeline::{Stage, PREDICT_ENDPOINT};
use crate::schema::ColumnOrder;

/// Fails with "shape mismatch"
struct Broken;

impl Regressor for Broken {
    fn predict(&self, _: &FeatureTable) -> Result<Vec<f64>, ModelError> {
        Err(ModelError::new("shape mismatch"))
    }
}

/// Returns the row count of numeric cells, after checking the column set
struct ExpectColumns(Vec<&'static str>);

impl Regressor for ExpectColumns {
    fn predict(&self, table: &FeatureTable) -> Result<Vec<f64>, ModelError> {
        if table.columns() != self.0.as_slice() {
            return Err(ModelError::new(format!("unexpected columns {:?}", table.columns())));
        }
        Ok(table
            .rows()
            .iter()
            .map(|r| r.iter().filter(|c| matches!(c, Cell::Number(_))).count() as f64)
            .collect())
    }
}

fn price_model() -> Arc<dyn Regressor> {
    Arc::new(
        LinearPipeline::from_json(
            r#"{
                "name": "price",
                "intercept": 1000.0,
                "coefficients": {"total_area": 100.0, "rooms": 10.0, "floor": 1.0}
            }"#,
        )
        .expect("test"),
    )
}

fn test_state(model: Option<Arc<dyn Regressor>>, columns: &[&str]) -> AppState {
    let columns: ColumnOrder = columns.iter().copied().collect();
    let predictor = BatchPredictor::new(model, columns, MetricsCollector::new().expect("test"));
    AppState::new(predictor, "/srv/models")
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(request).await.expect("test");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("test");
    (status, body.to_vec())
}

async fn post_predict(app: Router, payload: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .expect("test");
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).expect("test"))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder().uri(uri).body(Body::empty()).expect("test");
    send(app, request).await
}

fn scenario_payload() -> Value {
    json!({"items": [{"user_id": "u-1", "features": {"total_area": 55.0, "rooms": 2}}]})
}

#[tokio::test]
async fn test_health_endpoint() {
    let state = test_state(Some(price_model()), &["total_area", "rooms", "floor"]);
    let (status, body) = get(create_router(state), "/").await;

    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body).expect("test");
    assert_eq!(health.status, "ok");
    assert!(health.model_loaded);
    assert_eq!(health.model_dir, "/srv/models");
    assert_eq!(health.feature_order_len, 3);
    assert_eq!(health.version, crate::VERSION);
}

#[tokio::test]
async fn test_health_reports_missing_model() {
    let state = test_state(None, &[]);
    let (status, body) = get(create_router(state), "/").await;

    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body).expect("test");
    assert!(!health.model_loaded);
    assert_eq!(health.feature_order_len, 0);
}

#[tokio::test]
async fn test_predict_success_in_order() {
    let state = test_state(Some(price_model()), &["total_area", "rooms", "floor"]);
    let payload = json!({"items": [
        {"user_id": "u-1", "features": {"total_area": 50.0, "rooms": 2, "floor": 3}},
        {"user_id": 7, "features": {"total_area": 10, "rooms": 1, "floor": null, "extra": "x"}},
    ]});

    let (status, body) = post_predict(create_router(state.clone()), &payload).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"results": [
            {"user_id": "u-1", "prediction": 6023.0},
            {"user_id": 7, "prediction": 2010.0},
        ]})
    );
    assert_eq!(state.metrics().predictions_total(PREDICT_ENDPOINT), 1);
    assert_eq!(state.metrics().prediction_value_summary(), (2, 8033.0));
}

#[tokio::test]
async fn test_predict_empty_batch() {
    let state = test_state(Some(price_model()), &["total_area"]);
    let (status, body) = post_predict(create_router(state.clone()), &json!({"items": []})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"results": []}));
    assert_eq!(state.metrics().total_stage_errors(PREDICT_ENDPOINT), 0);
}

#[tokio::test]
async fn test_predict_missing_feature_is_422() {
    let state = test_state(Some(price_model()), &["total_area", "rooms", "floor"]);
    let (status, body) = post_predict(create_router(state.clone()), &scenario_payload()).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body["detail"],
        r#"Item #0 is missing required features: ["floor"]"#
    );
    let m = state.metrics();
    assert_eq!(m.stage_errors(PREDICT_ENDPOINT, Stage::Validation), 1);
    assert_eq!(m.stage_errors(PREDICT_ENDPOINT, Stage::ModelPredict), 0);
    assert_eq!(m.predictions_total(PREDICT_ENDPOINT), 1);
}

#[tokio::test]
async fn test_predict_undetermined_columns_uses_sorted_first_row_keys() {
    let model: Arc<dyn Regressor> = Arc::new(ExpectColumns(vec!["rooms", "total_area"]));
    let state = test_state(Some(model), &[]);

    let (status, body) = post_predict(create_router(state), &scenario_payload()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["user_id"], "u-1");
    assert_eq!(body["results"][0]["prediction"], 2.0);
}

#[tokio::test]
async fn test_predict_heterogeneous_keys_without_schema() {
    let model: Arc<dyn Regressor> = Arc::new(ExpectColumns(vec!["a", "b"]));
    let state = test_state(Some(model), &[]);
    let payload = json!({"items": [
        {"user_id": 1, "features": {"b": 1, "a": 2}},
        {"user_id": 2, "features": {"c": 3}},
    ]});

    let (status, body) = post_predict(create_router(state), &payload).await;

    assert_eq!(status, StatusCode::OK);
    // second row is all filled zeros, still numeric
    assert_eq!(body["results"][1]["prediction"], 2.0);
}

#[tokio::test]
async fn test_predict_model_failure_is_400() {
    let state = test_state(Some(Arc::new(Broken)), &[]);
    let (status, body) = post_predict(create_router(state.clone()), &scenario_payload()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Inference error: shape mismatch");
    assert_eq!(
        state.metrics().stage_errors(PREDICT_ENDPOINT, Stage::ModelPredict),
        1
    );
}

#[tokio::test]
async fn test_predict_assembly_failure_is_400() {
    let state = test_state(Some(price_model()), &[]);
    let payload = json!({"items": [
        {"user_id": 1, "features": {"kind": "brick"}},
        {"user_id": 2, "features": {"kind": 3}},
    ]});

    let (status, body) = post_predict(create_router(state.clone()), &payload).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let detail = body["detail"].as_str().expect("test");
    assert!(detail.starts_with("Failed to build feature table:"));
    assert_eq!(
        state.metrics().stage_errors(PREDICT_ENDPOINT, Stage::BuildTable),
        1
    );
}

#[tokio::test]
async fn test_predict_text_in_numeric_column_is_400() {
    let state = test_state(Some(price_model()), &["total_area", "rooms", "floor"]);
    let payload = json!({"items": [
        {"user_id": 1, "features": {"total_area": "big", "rooms": 1, "floor": 1}},
    ]});

    let (status, body) = post_predict(create_router(state), &payload).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let detail = body["detail"].as_str().expect("test");
    assert!(detail.starts_with("Inference error: could not convert string to float"));
}

#[tokio::test]
async fn test_predict_without_model_is_500() {
    let state = test_state(None, &["total_area", "rooms", "floor"]);
    let (status, body) = post_predict(create_router(state.clone()), &scenario_payload()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "Model is not loaded");
    let m = state.metrics();
    assert_eq!(m.stage_errors(PREDICT_ENDPOINT, Stage::Startup), 1);
    assert_eq!(m.stage_errors(PREDICT_ENDPOINT, Stage::Validation), 0);
}

#[tokio::test]
async fn test_predict_malformed_body_never_reaches_pipeline() {
    let state = test_state(Some(price_model()), &[]);
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"rows": []}"#))
        .expect("test");

    let (status, body) = send(create_router(state.clone()), request).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let body: ErrorResponse = serde_json::from_slice(&body).expect("test");
    assert!(body.detail.contains("items"), "{}", body.detail);
    assert_eq!(state.metrics().predictions_total(PREDICT_ENDPOINT), 0);
    assert_eq!(state.metrics().total_stage_errors(PREDICT_ENDPOINT), 0);
    assert_eq!(state.metrics().http_requests("/predict", "POST", "4xx"), 1);
}

#[tokio::test]
async fn test_predict_invalid_json_returns_json_detail() {
    let state = test_state(Some(price_model()), &[]);
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"items": ["#))
        .expect("test");

    let (status, body) = send(create_router(state.clone()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: ErrorResponse = serde_json::from_slice(&body).expect("test");
    assert!(!body.detail.is_empty());
    assert_eq!(state.metrics().predictions_total(PREDICT_ENDPOINT), 0);
}

#[tokio::test]
async fn test_predict_wrong_field_type_returns_json_detail() {
    let state = test_state(Some(price_model()), &[]);
    let (status, body) = post_predict(
        create_router(state.clone()),
        &json!({"items": [{"user_id": "u-1", "features": [1, 2]}]}),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string());
    assert_eq!(state.metrics().predictions_total(PREDICT_ENDPOINT), 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let state = test_state(Some(price_model()), &["total_area", "rooms", "floor"]);
    state.metrics().set_model_loaded(true);
    let app = create_router(state);

    let (status, _) = post_predict(app.clone(), &scenario_payload()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).expect("test"))
        .await
        .expect("test");
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE]
        .to_str()
        .expect("test")
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("test");
    let text = String::from_utf8(body.to_vec()).expect("test");
    assert!(text.contains("app_predictions_total{endpoint=\"/predict\"} 1"));
    assert!(text.contains(
        "app_inference_errors_total{endpoint=\"/predict\",stage=\"validation\"} 1"
    ));
    assert!(text.contains("app_prediction_latency_seconds_count 1"));
    assert!(text.contains("app_model_loaded 1"));
    assert!(text.contains(
        "http_requests_total{handler=\"/predict\",method=\"POST\",status=\"4xx\"} 1"
    ));
}

#[tokio::test]
async fn test_unmatched_route_not_recorded() {
    let state = test_state(Some(price_model()), &[]);
    let (status, _) = get(create_router(state.clone()), "/nope").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let text = state.metrics().to_prometheus();
    assert!(!text.contains("/nope"));
}

#[tokio::test]
async fn test_http_requests_grouped_by_status() {
    let state = test_state(Some(price_model()), &[]);
    let app = create_router(state.clone());

    let (status, _) = get(app.clone(), "/").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get(app, "/").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(state.metrics().http_requests("/", "GET", "2xx"), 2);
}

#[tokio::test]
async fn test_make_test_load_conflict_while_running() {
    let state = test_state(Some(price_model()), &[]);
    state.load_running.store(true, Ordering::SeqCst);

    let (status, body) = get(create_router(state), "/make_test_load").await;

    assert_eq!(status, StatusCode::CONFLICT);
    let body: ErrorResponse = serde_json::from_slice(&body).expect("test");
    assert_eq!(body.detail, "load already running");
}

#[tokio::test]
async fn test_make_test_load_starts_background_run() {
    let load = LoadConfig {
        // nothing listens here; the run ends without successful requests
        api_url: "http://127.0.0.1:9/predict".to_string(),
        users: 1,
        duration: 0,
        sleep: 0.0,
    };
    let state = test_state(Some(price_model()), &[]).with_load_config(load);

    let (status, body) = get(create_router(state.clone()), "/make_test_load").await;

    assert_eq!(status, StatusCode::OK);
    let body: ErrorResponse = serde_json::from_slice(&body).expect("test");
    assert_eq!(body.detail, "load started");

    for _ in 0..100 {
        if !state.load_running.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("load run did not finish");
}

#[tokio::test]
async fn test_make_test_load_rejected_settings_release_flag() {
    let load = LoadConfig {
        api_url: "http://127.0.0.1:9/predict".to_string(),
        users: 1,
        duration: 0,
        sleep: 1e30,
    };
    let state = test_state(Some(price_model()), &[]).with_load_config(load);
    let app = create_router(state.clone());

    let (status, _) = get(app.clone(), "/make_test_load").await;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..100 {
        if !state.load_running.load(Ordering::SeqCst) {
            let (status, _) = get(app, "/make_test_load").await;
            assert_eq!(status, StatusCode::OK);
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("running flag was never cleared");
}

#[test]
fn test_load_run_guard_clears_flag_on_panic() {
    let running = Arc::new(AtomicBool::new(true));
    let guard = LoadRunGuard(Arc::clone(&running));

    let joined = std::thread::spawn(move || {
        let _guard = guard;
        panic!("load thread crashed");
    })
    .join();

    assert!(joined.is_err());
    assert!(!running.load(Ordering::SeqCst));
}

#[test]
fn test_app_state_load_without_artifact() {
    let dir = tempfile::tempdir().expect("test");
    let config = ServeConfig {
        model_dir: dir.path().to_path_buf(),
        ..ServeConfig::default()
    };

    let state = AppState::load(&config).expect("test");

    assert!(!state.predictor().model_loaded());
    assert!(!state.metrics().model_loaded());
    assert!(state.predictor().columns().is_empty());
    assert_eq!(state.model_dir(), dir.path());
}
