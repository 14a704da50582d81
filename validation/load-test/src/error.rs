//! Error types for the load test.
//!
//! Per-request failures are not errors: they are recorded as failed
//! [`Outcome`](crate::client::Outcome)s. Only configuration and report I/O
//! problems surface here.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unreadable run configuration. Raised before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("URL template is required")]
    EmptyUrlTemplate,

    #[error("min {axis} ({min}) must be less than or equal to max {axis} ({max})")]
    InvalidBounds {
        axis: &'static str,
        min: u32,
        max: u32,
    },

    #[error("threads must be > 0")]
    InvalidThreads,

    #[error("pattern must be either 'random' or 'fixed', got '{0}'")]
    UnknownPattern(String),

    #[error("fixed mode must be either 'sweep' or 'single', got '{0}'")]
    UnknownFixedMode(String),

    #[error("invalid {field} '{value}': {source}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("invalid header '{0}': expected 'Name: value'")]
    InvalidHeader(String),

    #[error("accepted status list must not be empty")]
    EmptyAcceptList,

    #[error("failed to read scenario {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scenario {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failure to append a run to the output report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to open output file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write results to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Misuse of the metrics collector state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("metrics must be finalized before computing results")]
    NotFinalized,
}
