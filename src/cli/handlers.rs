//! Command-line definitions
//!
//! Every setting has an environment fallback so the same binary runs
//! unchanged under a process manager.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{
    LoadConfig, ServeConfig, DEFAULT_API_URL, DEFAULT_HOST, DEFAULT_MODEL_DIR, DEFAULT_PORT,
};

/// tabserve - batch prediction server for tabular regression models
#[derive(Parser, Debug)]
#[command(name = "tabserve")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the prediction server
    ///
    /// Examples:
    ///   tabserve serve --model-dir ./models
    ///   MODEL_DIR=/srv/model PORT=9000 tabserve serve
    Serve {
        /// Host to bind to
        #[arg(long, default_value = DEFAULT_HOST, env = "HOST")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PORT")]
        port: u16,

        /// Directory with model.json and optional MLmodel / feature list
        #[arg(long, default_value = DEFAULT_MODEL_DIR, env = "MODEL_DIR")]
        model_dir: PathBuf,
    },
    /// Send synthetic traffic to a running server
    Loadgen {
        /// Prediction endpoint URL
        #[arg(long, default_value = DEFAULT_API_URL, env = "API_URL")]
        url: String,

        /// Concurrent workers
        #[arg(short, long, default_value_t = 4, env = "USERS")]
        users: usize,

        /// Run duration in seconds
        #[arg(short, long, default_value_t = 60, env = "DURATION")]
        duration: u64,

        /// Pause between requests per worker, in seconds
        #[arg(short, long, default_value_t = 0.1, env = "SLEEP")]
        sleep: f64,
    },
    /// Show version info
    Info,
}

impl Commands {
    /// Server settings, if this is `serve`
    pub fn serve_config(&self) -> Option<ServeConfig> {
        match self {
            Self::Serve {
                host,
                port,
                model_dir,
            } => Some(ServeConfig {
                host: host.clone(),
                port: *port,
                model_dir: model_dir.clone(),
            }),
            _ => None,
        }
    }

    /// Load generator settings, if this is `loadgen`
    pub fn load_config(&self) -> Option<LoadConfig> {
        match self {
            Self::Loadgen {
                url,
                users,
                duration,
                sleep,
            } => Some(LoadConfig {
                api_url: url.clone(),
                users: *users,
                duration: *duration,
                sleep: *sleep,
            }),
            _ => None,
        }
    }
}
