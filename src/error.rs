//! Error Types
//!
//! A single error enum shared by the API server, the metel agent and
//! the storage and cluster layers.

use thiserror::Error;

use crate::wes::State;

/// Errors produced anywhere in Metis.
#[derive(Error, Debug)]
pub enum MetisError {
    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The Kubernetes API answered with a non-success status
    #[error("kubernetes API error ({status}): {message}")]
    Kubernetes { status: u16, message: String },

    #[error("{0} not found")]
    NotFound(String),

    /// A client sent something we cannot accept
    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("invalid page token: {0}")]
    InvalidPageToken(String),

    #[error("run '{run_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: State,
        to: State,
    },

    #[error("no suitable plugin found for workflow type '{0}'")]
    NoSuitablePlugin(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("invalid file path: access to {0} is not allowed")]
    InvalidFilePath(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Any failure talking to a Tool Registry Service
    #[error("TRS error: {0}")]
    Trs(String),

    #[error("unsupported staging provider type: {0}")]
    UnsupportedStagingProvider(String),

    #[error("staging failed: {0}")]
    Staging(String),

    /// A plugin answered with an error status or an unusable body
    #[error("plugin error: {0}")]
    Plugin(String),

    #[error("job has not finished: {0}")]
    JobNotFinished(String),

    /// The API server refused a run update sent by metel
    #[error("run update rejected: {0}")]
    Report(String),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, MetisError>;

impl MetisError {
    /// Returns true for a Kubernetes "404 Not Found" answer.
    pub fn is_kube_not_found(&self) -> bool {
        matches!(self, Self::Kubernetes { status: 404, .. })
    }
}
