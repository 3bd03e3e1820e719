//! Synthetic traffic generator for the prediction endpoint
//!
//! Spawns `users` OS threads, each posting random single-item batches in a
//! loop with a fixed pause, until the shared stop flag is raised. Each
//! worker owns its counters; nothing is synchronised between workers.
//!
//! Everything here blocks. Call it from a plain thread or
//! `tokio::task::spawn_blocking`, never directly from async code.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::api::PredictBatchRequest;
use crate::config::LoadConfig;
use crate::error::{Result, ServeError};
use crate::features::{FeatureMap, FeatureValue, ItemId, PredictItem};

/// Per-request client timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Granularity of the coordinator's stop-flag polling
const STOP_POLL: Duration = Duration::from_millis(100);

/// Totals reported by one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Worker index
    pub worker: usize,
    /// Requests that got any HTTP response
    pub sent: u64,
    /// Requests answered with 200
    pub ok: u64,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Random apartment features in realistic ranges
pub fn random_features<R: Rng + ?Sized>(rng: &mut R) -> FeatureMap {
    let int = |v: i64| FeatureValue::Int(v);
    let float = |v: f64, d: i32| FeatureValue::Float(round_to(v, d));

    let mut f = FeatureMap::new();
    f.insert("flat_id".into(), int(rng.gen_range(10_000..=99_999)));
    f.insert("building_id".into(), int(rng.gen_range(1000..=9999)));
    f.insert("total_area".into(), float(rng.gen_range(20.0..=120.0), 1));
    f.insert("living_area".into(), float(rng.gen_range(10.0..=80.0), 1));
    f.insert("kitchen_area".into(), float(rng.gen_range(5.0..=25.0), 1));
    f.insert("floor".into(), int(rng.gen_range(1..=25)));
    f.insert("floors_total".into(), int(rng.gen_range(5..=30)));
    f.insert("flats_count".into(), int(rng.gen_range(20..=300)));
    f.insert("ceiling_height".into(), float(rng.gen_range(2.5..=3.5), 2));
    f.insert("rooms".into(), int(rng.gen_range(1..=4)));
    f.insert("build_year".into(), int(rng.gen_range(1960..=2022)));
    f.insert("building_type_int".into(), int(rng.gen_range(1..=3)));
    f.insert("is_apartment".into(), int(rng.gen_range(0..=1)));
    f.insert("studio".into(), int(0));
    f.insert("has_elevator".into(), int(rng.gen_range(0..=1)));
    f.insert("latitude".into(), float(rng.gen_range(59.7..=60.1), 5));
    f.insert("longitude".into(), float(rng.gen_range(30.1..=30.6), 5));
    f
}

/// One-item request body with a random `u-N` identifier
pub fn make_payload<R: Rng + ?Sized>(rng: &mut R) -> PredictBatchRequest {
    PredictBatchRequest {
        items: vec![PredictItem {
            user_id: ItemId::Text(format!("u-{}", rng.gen_range(1..=9999))),
            features: random_features(rng),
        }],
    }
}

fn worker(id: usize, api_url: &str, pause: Duration, stop: &AtomicBool) -> WorkerReport {
    let mut report = WorkerReport {
        worker: id,
        sent: 0,
        ok: 0,
    };

    let client = match Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(worker = id, error = %e, "failed to create HTTP client");
            return report;
        },
    };
    let mut rng = rand::thread_rng();

    while !stop.load(Ordering::Relaxed) {
        if let Ok(resp) = client.post(api_url).json(&make_payload(&mut rng)).send() {
            report.sent += 1;
            if resp.status() == reqwest::StatusCode::OK {
                report.ok += 1;
            }
        }
        thread::sleep(pause);
    }

    tracing::info!(worker = id, sent = report.sent, ok = report.ok, "worker finished");
    report
}

/// Run the generator for `config.duration` seconds or until `stop` is set
///
/// # Errors
///
/// [`ServeError::InvalidConfiguration`] for unusable settings and
/// [`ServeError::Worker`] if a worker thread cannot be spawned or panics.
pub fn run_load(config: &LoadConfig, stop: Arc<AtomicBool>) -> Result<Vec<WorkerReport>> {
    config.validate()?;

    tracing::info!(
        url = %config.api_url,
        users = config.users,
        duration_secs = config.duration,
        "starting load"
    );

    let pause = config.pause();
    let deadline = config.deadline_from(Instant::now())?;
    let mut handles = Vec::with_capacity(config.users);
    for id in 0..config.users {
        let worker_stop = Arc::clone(&stop);
        let url = config.api_url.clone();
        let spawned = thread::Builder::new()
            .name(format!("loadgen-{id}"))
            .spawn(move || worker(id, &url, pause, &worker_stop));
        match spawned {
            Ok(h) => handles.push(h),
            Err(e) => {
                stop.store(true, Ordering::Relaxed);
                join_all(handles)?;
                return Err(ServeError::Worker(format!("failed to spawn worker {id}: {e}")));
            },
        }
    }

    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(STOP_POLL.min(deadline - now));
    }
    stop.store(true, Ordering::Relaxed);

    join_all(handles)
}

/// Join every handle, failing if any worker panicked
fn join_all(handles: Vec<thread::JoinHandle<WorkerReport>>) -> Result<Vec<WorkerReport>> {
    let total = handles.len();
    let reports: Vec<WorkerReport> = handles.into_iter().filter_map(|h| h.join().ok()).collect();
    if reports.len() != total {
        return Err(ServeError::Worker(format!(
            "{} of {total} workers panicked",
            total - reports.len()
        )));
    }
    Ok(reports)
}
