//! Crate-level error taxonomy.
//!
//! Two layers of errors exist: `DiscoveryError` is the orchestration-side
//! error type (resolver failures, scope validation, transport faults), while
//! the execution boundary reports structured failures through
//! [`crate::boundary::types::ErrorInfo`] inside an `ExecuteResponse` so that
//! a failed operation never aborts the surrounding run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("unknown layer: {0}")]
    UnknownLayer(String),

    #[error("invalid layer registry: {0}")]
    InvalidRegistry(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("connection {0} not found")]
    ConnectionNotFound(String),

    #[error("boundary transport failed{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Transport {
        message: String,
        status: Option<u16>,
    },

    #[error("repository error: {0}")]
    Repository(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DiscoveryError {
    /// Whether the tool execution client may retry after this error.
    ///
    /// Authorization and not-found responses are terminal: retrying them
    /// cannot succeed and would burn the shared retry budget.
    pub fn is_retryable(&self) -> bool {
        match self {
            DiscoveryError::Transport { status, .. } => {
                !matches!(status, Some(401) | Some(403) | Some(404))
            }
            _ => false,
        }
    }
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
