//! Service-level error type.

use thiserror::Error;

/// Error surfaced to the intercepting proxy.
///
/// Variants map to HTTP status codes returned to callers:
/// - [`ServiceError::BadRequest`] → 400 (malformed input, failed integrity checks)
/// - [`ServiceError::Forbidden`] → 403 (KMS authorisation or key configuration faults)
/// - [`ServiceError::Unavailable`] → 503 (transient KMS failures; safe to retry)
/// - [`ServiceError::Internal`] → 500
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request or envelope is invalid, or an integrity check failed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The key is missing, disabled, or not usable by this service.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The KMS is temporarily unreachable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::Forbidden(_) => 403,
            ServiceError::Unavailable(_) => 503,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in [`crate::protocol::ErrorResponse`].
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::BadRequest(_) => "bad_request",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::Unavailable(_) => "service_unavailable",
            ServiceError::Internal(_) => "internal_error",
        }
    }
}
