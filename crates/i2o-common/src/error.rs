//! Error types for ice2ocean services.

use serde::Serialize;
use thiserror::Error;

/// Result type alias using I2oError.
pub type I2oResult<T> = Result<T, I2oError>;

/// Primary error type for cache, fetch and state-tracking operations.
///
/// `Clone` so one failed fetch can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum I2oError {
    // === Request Errors ===
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    // === Data Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Incomplete download of {name}: expected {expected} bytes, got {actual} after {attempts} attempts")]
    Incomplete {
        name: String,
        expected: u64,
        actual: u64,
        attempts: u32,
    },

    #[error("Dataset {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    // === Infrastructure Errors ===
    #[error("Remote store unreachable: {0}")]
    Unreachable(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Coarse failure classes used for propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Object or file absent; drives fallback paths.
    NotFound,
    /// Download never matched the authoritative size.
    Incomplete,
    /// Transport or connection failure, including deadlines.
    Unreachable,
    /// Malformed request parameters.
    Invalid,
    /// Anything else, including collaborator failures.
    Internal,
}

impl I2oError {
    pub fn invalid(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            I2oError::MissingParameter(_) | I2oError::InvalidParameter { .. } => ErrorKind::Invalid,
            I2oError::NotFound(_) => ErrorKind::NotFound,
            I2oError::Incomplete { .. } => ErrorKind::Incomplete,
            I2oError::Unreachable(_) | I2oError::Timeout(_) => ErrorKind::Unreachable,
            I2oError::Unavailable { .. } | I2oError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, I2oError::NotFound(_))
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            I2oError::MissingParameter(_) | I2oError::InvalidParameter { .. } => 400,

            I2oError::NotFound(_) => 404,

            I2oError::Unreachable(_) => 503,
            I2oError::Timeout(_) => 504,

            I2oError::Incomplete { .. } | I2oError::Unavailable { .. } | I2oError::Internal(_) => {
                500
            }
        }
    }
}

impl From<serde_json::Error> for I2oError {
    fn from(err: serde_json::Error) -> Self {
        I2oError::Internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_is_client_error() {
        let err = I2oError::invalid("year", "not an integer");
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(err.http_status_code(), 400);

        let err = I2oError::MissingParameter("param".into());
        assert_eq!(err.http_status_code(), 400);
    }

    #[test]
    fn test_not_found_and_unreachable_stay_distinct() {
        let missing = I2oError::NotFound("ice2oceans/abc".into());
        let down = I2oError::unreachable("connection reset");

        assert_ne!(missing.kind(), down.kind());
        assert!(missing.is_not_found());
        assert!(!down.is_not_found());
        assert_eq!(missing.http_status_code(), 404);
        assert_eq!(down.http_status_code(), 503);
    }

    #[test]
    fn test_fetch_failures_are_server_errors() {
        let err = I2oError::Incomplete {
            name: "roff.dat".into(),
            expected: 100,
            actual: 40,
            attempts: 4,
        };
        assert_eq!(err.kind(), ErrorKind::Incomplete);
        assert_eq!(err.http_status_code(), 500);
        assert!(err.to_string().contains("after 4 attempts"));

        let timeout = I2oError::Timeout(std::time::Duration::from_secs(5));
        assert_eq!(timeout.kind(), ErrorKind::Unreachable);
        assert_eq!(timeout.http_status_code(), 504);
    }
}
