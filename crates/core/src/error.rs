//! Error types for the ToolRelay domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant, and every error maps onto
//! the wire-level [`ErrorKind`] taxonomy that callers and the model see.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all ToolRelay operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Capability store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The wire-level kind this error surfaces as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(_) => ErrorKind::ModelUnavailable,
            Self::Store(_) => ErrorKind::RegistryUnavailable,
            Self::Tool(e) => e.kind(),
            Self::Config { .. } | Self::Serialization(_) | Self::Internal(_) => {
                ErrorKind::InternalFault
            }
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by tool results and terminal stream errors.
///
/// Capability-level kinds (`InvalidArguments`, `ExecutionFailed`,
/// `MalformedResponse`) are recoverable and fed back to the model.
/// The rest terminate the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArguments,
    ExecutionFailed,
    MalformedResponse,
    ModelUnavailable,
    RegistryUnavailable,
    InternalFault,
}

impl ErrorKind {
    /// Whether an error of this kind ends the request.
    pub fn is_request_fatal(self) -> bool {
        matches!(
            self,
            Self::ModelUnavailable | Self::RegistryUnavailable | Self::InternalFault
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArguments => "InvalidArguments",
            Self::ExecutionFailed => "ExecutionFailed",
            Self::MalformedResponse => "MalformedResponse",
            Self::ModelUnavailable => "ModelUnavailable",
            Self::RegistryUnavailable => "RegistryUnavailable",
            Self::InternalFault => "InternalFault",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures reading capability definitions from the backing store.
///
/// Every variant surfaces as `RegistryUnavailable`: a request never runs
/// against a partially loaded capability set.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Capability store unreachable: {0}")]
    Unavailable(String),

    #[error("Capability '{name}' is invalid: {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("Duplicate capability name in snapshot: {0}")]
    DuplicateName(String),

    #[error("Store migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown capability: {0}")]
    NotFound(String),

    #[error("Invalid capability arguments: {0}")]
    InvalidArguments(String),

    #[error("Capability execution failed: {capability}: {reason}")]
    ExecutionFailed { capability: String, reason: String },

    #[error("Malformed capability response: {0}")]
    MalformedResponse(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::InvalidArguments(_) => ErrorKind::InvalidArguments,
            Self::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    }

    #[test]
    fn store_errors_are_registry_unavailable() {
        let err: Error = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(err.kind(), ErrorKind::RegistryUnavailable);
        assert!(err.kind().is_request_fatal());
    }

    #[test]
    fn tool_errors_are_recoverable() {
        let err = ToolError::ExecutionFailed {
            capability: "lookup-weather".into(),
            reason: "HTTP 401".into(),
        };
        assert!(err.to_string().contains("lookup-weather"));
        assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
        assert!(!err.kind().is_request_fatal());
        assert_eq!(
            ToolError::NotFound("x".into()).kind(),
            ErrorKind::InvalidArguments
        );
    }

    #[test]
    fn error_kind_serializes_by_name() {
        let json = serde_json::to_string(&ErrorKind::RegistryUnavailable).unwrap();
        assert_eq!(json, r#""RegistryUnavailable""#);
        assert_eq!(ErrorKind::InternalFault.to_string(), "InternalFault");
    }
}
