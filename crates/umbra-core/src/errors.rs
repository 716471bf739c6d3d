//! Unified error system for Umbra
//!
//! A single error type shared by every crate in the workspace. Variants map
//! onto the failure taxonomy of the ads engine: token exhaustion, credential
//! and issuer failures, network failures (split into retryable and fatal by
//! [`UmbraError::is_retryable`]), malformed downloaded content, and the usual
//! storage/serialization/internal errors.

use serde::{Deserialize, Serialize};

/// Unified error type for all Umbra operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum UmbraError {
    /// The token ledger cannot satisfy a request
    #[error("Insufficient tokens: requested {requested}, available {available}")]
    InsufficientTokens {
        /// Number of tokens requested
        requested: usize,
        /// Number of tokens held by the ledger
        available: usize,
    },

    /// A confirmation credential failed to build or verify
    #[error("Invalid credential: {message}")]
    InvalidCredential {
        /// Error message describing the credential failure
        message: String,
    },

    /// A public key is not published by any current issuer
    #[error("Unknown issuer: {message}")]
    UnknownIssuer {
        /// Error message naming the unrecognised key
        message: String,
    },

    /// Transport level failure (connection, DNS, reset)
    #[error("Network error: {message}")]
    Network {
        /// Error message describing the network issue
        message: String,
    },

    /// The remote service answered with a server-side failure
    #[error("Server unavailable ({status}): {message}")]
    ServerUnavailable {
        /// HTTP status code returned by the server
        status: u16,
        /// Error message describing the failure
        message: String,
    },

    /// The remote service rejected the request or answered with garbage
    #[error("Request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code returned by the server
        status: u16,
        /// Error message describing the rejection
        message: String,
    },

    /// An operation exceeded its deadline
    #[error("Timeout after {timeout_ms}ms")]
    Timeout {
        /// Deadline that was exceeded
        timeout_ms: u64,
    },

    /// A downloaded catalog failed validation
    #[error("Malformed catalog: {message}")]
    MalformedCatalog {
        /// Error message describing the first validation failure
        message: String,
    },

    /// A downloaded resource failed validation
    #[error("Malformed resource: {message}")]
    MalformedResource {
        /// Error message describing the first validation failure
        message: String,
    },

    /// An exclusion rule could not evaluate a candidate
    #[error("Exclusion evaluation failed: {message}")]
    ExclusionEvaluation {
        /// Error message describing the failed rule
        message: String,
    },

    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Resource not found
    #[error("Not found: {message}")]
    NotFound {
        /// Error message describing what was not found
        message: String,
    },

    /// Cryptographic operation failed
    #[error("Crypto error: {message}")]
    Crypto {
        /// Error message describing the cryptographic failure
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Storage operation failed
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the storage failure
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl UmbraError {
    /// Create an insufficient tokens error
    pub fn insufficient_tokens(requested: usize, available: usize) -> Self {
        Self::InsufficientTokens {
            requested,
            available,
        }
    }

    /// Create an invalid credential error
    pub fn invalid_credential(message: impl Into<String>) -> Self {
        Self::InvalidCredential {
            message: message.into(),
        }
    }

    /// Create an unknown issuer error
    pub fn unknown_issuer(message: impl Into<String>) -> Self {
        Self::UnknownIssuer {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a server unavailable error
    pub fn server_unavailable(status: u16, message: impl Into<String>) -> Self {
        Self::ServerUnavailable {
            status,
            message: message.into(),
        }
    }

    /// Create a rejected request error
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create a malformed catalog error
    pub fn malformed_catalog(message: impl Into<String>) -> Self {
        Self::MalformedCatalog {
            message: message.into(),
        }
    }

    /// Create a malformed resource error
    pub fn malformed_resource(message: impl Into<String>) -> Self {
        Self::MalformedResource {
            message: message.into(),
        }
    }

    /// Create an exclusion evaluation error
    pub fn exclusion_evaluation(message: impl Into<String>) -> Self {
        Self::ExclusionEvaluation {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Network failures, server-side (5xx) failures and timeouts are
    /// transient. Everything else, including every 4xx rejection, is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::ServerUnavailable { .. } | Self::Timeout { .. }
        )
    }
}

/// Standard Result type for Umbra operations
pub type Result<T> = std::result::Result<T, UmbraError>;

impl From<serde_json::Error> for UmbraError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for UmbraError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            std::io::ErrorKind::TimedOut => Self::timeout(0),
            _ => Self::storage(err.to_string()),
        }
    }
}

impl From<base64::DecodeError> for UmbraError {
    fn from(err: base64::DecodeError) -> Self {
        Self::serialization(format!("base64: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_error_creation() {
        let err = UmbraError::invalid("test message");
        assert_matches!(err, UmbraError::Invalid { .. });
        assert_eq!(err.to_string(), "Invalid: test message");

        let err = UmbraError::insufficient_tokens(3, 1);
        assert_eq!(
            err.to_string(),
            "Insufficient tokens: requested 3, available 1"
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(UmbraError::network("reset").is_retryable());
        assert!(UmbraError::server_unavailable(503, "busy").is_retryable());
        assert!(UmbraError::timeout(1000).is_retryable());

        assert!(!UmbraError::rejected(400, "bad request").is_retryable());
        assert!(!UmbraError::unknown_issuer("key").is_retryable());
        assert!(!UmbraError::invalid_credential("sig").is_retryable());
        assert!(!UmbraError::insufficient_tokens(1, 0).is_retryable());
    }

    #[test]
    fn test_error_serialization() {
        let err = UmbraError::server_unavailable(502, "gateway");
        let json = serde_json::to_string(&err).unwrap();
        let back: UmbraError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_matches!(UmbraError::from(io), UmbraError::NotFound { .. });
    }
}
