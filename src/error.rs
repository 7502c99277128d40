//! Error types for the Node Protection Operator
//!
//! Per-item failures (one node group, one instance, one cluster node) are
//! recorded in the run report; only malformed top-level input aborts an
//! invocation.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Invocation Errors
    // =========================================================================
    #[error("Cluster identity missing from request and configuration")]
    MissingClusterIdentity,

    #[error("Unable to resolve region for cluster {cluster}")]
    UnresolvableRegion { cluster: String },

    #[error("Reconciliation exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Malformed lifecycle notification: {0}")]
    MalformedEvent(String),

    // =========================================================================
    // Capacity Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid capacity request: {0}")]
    InvalidCapacityRequest(String),

    // =========================================================================
    // Provider Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Transient provider error during {operation}: {reason}")]
    TransientProvider { operation: String, reason: String },

    #[error("Provider error during {operation}: {reason}")]
    Provider { operation: String, reason: String },

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Cluster control plane unreachable: {0}")]
    ControlPlaneUnreachable(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry with exponential backoff
    RequeueWithBackoff,
    /// Retry after specific duration
    RequeueAfter(Duration),
    /// Don't retry, wait for the next pass
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::TransientProvider { .. }
            | Error::ControlPlaneUnreachable(_)
            | Error::Kube(_) => ErrorAction::RequeueWithBackoff,

            // The hosting task ran out of time; the next trigger picks it up
            Error::DeadlineExceeded(_) => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Input and lookup errors - retrying the same call cannot help
            Error::Configuration(_)
            | Error::Validation(_)
            | Error::InvalidCapacityRequest(_)
            | Error::MissingClusterIdentity
            | Error::UnresolvableRegion { .. }
            | Error::MalformedEvent(_)
            | Error::NotFound { .. }
            | Error::Provider { .. }
            | Error::JsonParse(_)
            | Error::YamlParse(_) => ErrorAction::NoRequeue,

            Error::Internal(_) | Error::Io(_) => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient and worth an in-run retry
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientProvider { .. } | Error::ControlPlaneUnreachable(_) => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 429 || response.code >= 500,
            Error::Kube(_) => true,
            _ => false,
        }
    }

    /// Check if this error means the target resource does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    /// Check if this error rejects the invocation as a whole
    pub fn is_invocation_error(&self) -> bool {
        matches!(
            self,
            Error::MissingClusterIdentity
                | Error::UnresolvableRegion { .. }
                | Error::MalformedEvent(_)
                | Error::Validation(_)
                | Error::InvalidCapacityRequest(_)
        )
    }

    pub(crate) fn not_found(kind: &str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            name: name.into(),
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
