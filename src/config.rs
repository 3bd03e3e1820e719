//! Runtime configuration
//!
//! Both settings blocks are filled from CLI flags with environment fallbacks
//! (see `cli`), and can also be built directly from the environment for the
//! `/make_test_load` endpoint.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServeError};

/// Default bind host
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default bind port
pub const DEFAULT_PORT: u16 = 8765;
/// Default model directory
pub const DEFAULT_MODEL_DIR: &str = "./models";
/// Default load generator target
pub const DEFAULT_API_URL: &str = "http://localhost:8765/predict";

/// Prediction server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Directory holding `model.json` and optional schema metadata
    pub model_dir: PathBuf,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
        }
    }
}

impl ServeConfig {
    /// Parse `host:port` into a socket address
    ///
    /// # Errors
    ///
    /// [`ServeError::InvalidConfiguration`] when the pair does not parse.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ServeError::InvalidConfiguration(format!("Invalid address: {e}")))
    }
}

/// Synthetic traffic settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Prediction endpoint URL
    pub api_url: String,
    /// Concurrent workers
    pub users: usize,
    /// Run duration in seconds
    pub duration: u64,
    /// Pause between requests per worker, in seconds
    pub sleep: f64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            users: 4,
            duration: 60,
            sleep: 0.1,
        }
    }
}

impl LoadConfig {
    /// Read `API_URL`, `USERS`, `DURATION` and `SLEEP`, keeping defaults for
    /// unset or unparsable values
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(key: &str) -> Option<T> {
            env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();
        Self {
            api_url: env::var("API_URL").unwrap_or(defaults.api_url),
            users: var("USERS").unwrap_or(defaults.users),
            duration: var("DURATION").unwrap_or(defaults.duration),
            sleep: var("SLEEP").unwrap_or(defaults.sleep),
        }
    }

    /// Reject settings the generator cannot run with
    ///
    /// # Errors
    ///
    /// [`ServeError::InvalidConfiguration`] for zero workers, a sleep that is
    /// not a representable non-negative duration, or a run too long to
    /// schedule.
    pub fn validate(&self) -> Result<()> {
        if self.users == 0 {
            return Err(ServeError::InvalidConfiguration(
                "users must be at least 1".to_string(),
            ));
        }
        if !self.sleep.is_finite() || self.sleep < 0.0 {
            return Err(ServeError::InvalidConfiguration(format!(
                "sleep must be a non-negative number of seconds, got {}",
                self.sleep
            )));
        }
        if Duration::try_from_secs_f64(self.sleep).is_err() {
            return Err(ServeError::InvalidConfiguration(format!(
                "sleep of {} seconds is too long",
                self.sleep
            )));
        }
        self.deadline_from(Instant::now())?;
        Ok(())
    }

    /// Run duration
    pub fn run_for(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    /// Instant at which a run started at `start` ends
    ///
    /// # Errors
    ///
    /// [`ServeError::InvalidConfiguration`] if the duration overflows the clock.
    pub fn deadline_from(&self, start: Instant) -> Result<Instant> {
        start.checked_add(self.run_for()).ok_or_else(|| {
            ServeError::InvalidConfiguration(format!(
                "duration of {} seconds is too long",
                self.duration
            ))
        })
    }

    /// Per-iteration pause; zero for settings [`Self::validate`] rejects
    pub fn pause(&self) -> Duration {
        Duration::try_from_secs_f64(self.sleep).unwrap_or_default()
    }
}
