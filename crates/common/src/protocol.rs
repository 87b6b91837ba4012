//! JSON bodies exchanged with the sealing service.
//!
//! Seal and open themselves carry raw bytes (`application/octet-stream`);
//! only errors and health checks are JSON.

use serde::{Deserialize, Serialize};

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"bad_request"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// Whether payloads are being sealed (`false` = passthrough mode).
    pub encryption_enabled: bool,
    /// Number of distinct master keys in the bucket mapping.
    pub keys_configured: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_new() {
        let e = ErrorResponse::new("forbidden", "no key mapped for bucket");
        assert_eq!(e.code, "forbidden");
        assert!(e.message.contains("no key mapped"));
    }

    #[test]
    fn health_response_serde() {
        let h = HealthResponse {
            status: "ok".into(),
            encryption_enabled: true,
            keys_configured: 2,
        };
        let json = serde_json::to_string(&h).unwrap();
        let decoded: HealthResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.keys_configured, 2);
        assert!(decoded.encryption_enabled);
    }
}
