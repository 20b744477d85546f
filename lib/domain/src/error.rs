//! Error types for fluxgauge.
//!
//! Setup-time failures (`ConnectionError`) and poll-time failures
//! (`QueryError`) are kept apart so callers can tell "retry setup later"
//! from "mark the metric unavailable and keep polling".

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a backend client for a single call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("backend returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Setup-time failure: the backend is unreachable or refused us.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("cannot build client for {endpoint}: {reason}")]
    Client { endpoint: String, reason: String },

    #[error("{endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("{endpoint} rejected the credentials: {reason}")]
    Unauthorized { endpoint: String, reason: String },

    #[error("{endpoint} is not ready (status {status}): {message}")]
    NotReady {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("readiness check against {endpoint} timed out after {after:?}")]
    Timeout { endpoint: String, after: Duration },

    #[error("worker pool is shut down")]
    PoolClosed,
}

impl ConnectionError {
    pub fn from_backend(endpoint: &str, err: BackendError) -> Self {
        let endpoint = endpoint.to_string();
        match err {
            BackendError::Transport(reason) | BackendError::Decode(reason) => {
                Self::Unreachable { endpoint, reason }
            }
            BackendError::Unauthorized(reason) => Self::Unauthorized { endpoint, reason },
            BackendError::Status { status, message } => Self::NotReady {
                endpoint,
                status,
                message,
            },
        }
    }
}

/// Poll-time failure for one query execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("query rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("could not decode result: {0}")]
    Decode(String),

    #[error("first row has no field '{field}'")]
    MissingField { field: String },

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker pool is shut down")]
    PoolClosed,
}

impl From<BackendError> for QueryError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Transport(reason) => Self::Transport(reason),
            BackendError::Unauthorized(reason) => Self::Unauthorized(reason),
            BackendError::Status { status, message } => Self::Rejected { status, message },
            BackendError::Decode(reason) => Self::Decode(reason),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("connection '{0}' is configured more than once")]
    DuplicateConnection(String),

    #[error("metric '{metric}' is configured more than once on connection '{connection}'")]
    DuplicateMetric { connection: String, metric: String },
}

/// Outcome of bringing up one configured connection.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("backend not ready: {0}")]
    NotReady(#[from] ConnectionError),

    #[error("connection '{0}' is already configured")]
    AlreadyConfigured(String),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

impl SetupError {
    /// Whether the host should try the same setup again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }
}
