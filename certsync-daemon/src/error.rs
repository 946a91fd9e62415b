use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use certsync_aggregator::AggregatorError;
use certsync_core::{ConfigError, CoreError};

/// Failure of a single adapter run. Always recovered by restarting the adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("certificate error: {0}")]
    Certificate(#[from] CoreError),

    #[error("aggregator error: {0}")]
    Aggregator(#[from] AggregatorError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote error: {0}")]
    Remote(String),

    #[error("adapter is not configured")]
    NotConfigured,

    #[error("context cancelled")]
    Cancelled,
}

/// Error surface for daemon startup and shutdown.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("no client configured for running ({importers} importers, {exporters} exporters)")]
    NoAdapters { importers: usize, exporters: usize },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },

    #[error("tasks did not stop within {0:?} of shutdown")]
    ShutdownTimeout(Duration),

    #[error("signal handler failed: {0}")]
    Signal(String),
}

pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AdapterError {
    AdapterError::Io {
        path: path.into(),
        source,
    }
}
