//! Axum request handlers for all service endpoints.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{ErrorResponse, HealthResponse};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::ServiceError;
use envelope::{EnvelopeError, ErrorKind};
use md5::{Digest, Md5};
use tracing::{error, warn};

use super::state::AppState;
use crate::keymap::KeyMapError;

const OCTET_STREAM: &str = "application/octet-stream";

/// Base64 MD5 of the response body. The proxy copies it into the object's
/// `Content-MD5` / `md5Hash` metadata, which the original body no longer matches.
pub const CONTENT_MD5: HeaderName = HeaderName::from_static("content-md5");

/// `POST /seal`: encrypt the request body for storage at the object path.
///
/// The object path is taken from the `X-Object-Path` request header (or the
/// configured header name). The response body is the envelope.
/// Every 200 response from `/seal` and `/open` carries [`CONTENT_MD5`]
/// for the bytes it returns.
pub async fn seal(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.encryption_enabled {
        return octet_stream(body);
    }
    let object_path = match object_path(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let key = match state.key_mapping.resolve(&object_path) {
        Ok(k) => k,
        Err(e) => return error_response(key_error(e)),
    };

    let codec = state.codec.as_ref();
    let path = object_path.as_str();
    let plaintext: &[u8] = &body;
    match state
        .retry
        .run("seal", || codec.seal_to_bytes(key, path, plaintext))
        .await
    {
        Ok(sealed) => octet_stream(sealed),
        Err(e) => envelope_error_response("seal", path, &e),
    }
}

/// `POST /open`: decrypt an envelope read from the object path.
pub async fn open(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.encryption_enabled {
        return octet_stream(body);
    }
    let object_path = match object_path(&state, &headers) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let key = match state.key_mapping.resolve(&object_path) {
        Ok(k) => k,
        Err(e) => return error_response(key_error(e)),
    };

    let codec = state.codec.as_ref();
    let path = object_path.as_str();
    let envelope: &[u8] = &body;
    match state
        .retry
        .run("open", || codec.open(key, path, envelope))
        .await
    {
        Ok(plaintext) => octet_stream(plaintext),
        Err(e) => envelope_error_response("open", path, &e),
    }
}

/// `GET /health`: liveness check.
///
/// Keys are verified before the listener is bound, so a running server is
/// always ready.
pub async fn health(State(state): State<AppState>) -> Response {
    let body = HealthResponse {
        status: "ok".into(),
        encryption_enabled: state.encryption_enabled,
        keys_configured: state.key_mapping.handles().len(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn octet_stream<B: AsRef<[u8]> + IntoResponse>(body: B) -> Response {
    let md5 = content_md5(body.as_ref());
    (
        [(header::CONTENT_TYPE, OCTET_STREAM.to_owned()), (CONTENT_MD5, md5)],
        body,
    )
        .into_response()
}

/// Base64-encoded MD5 digest, as GCS reports it.
pub fn content_md5(bytes: &[u8]) -> String {
    STANDARD.encode(Md5::digest(bytes))
}

/// Extract the object path from the configured header.
///
/// Paths are taken verbatim; UTF-8 beyond visible ASCII is allowed.
fn object_path(state: &AppState, headers: &HeaderMap) -> Result<String, ServiceError> {
    let name = state.object_path_header.as_str();
    let value = headers
        .get(name)
        .ok_or_else(|| ServiceError::BadRequest(format!("missing {name} header")))?;
    std::str::from_utf8(value.as_bytes())
        .map(str::to_owned)
        .map_err(|_| ServiceError::BadRequest(format!("{name} header is not valid UTF-8")))
}

fn key_error(e: KeyMapError) -> ServiceError {
    match e {
        KeyMapError::Unmapped(_) => ServiceError::Forbidden(e.to_string()),
        _ => ServiceError::BadRequest(e.to_string()),
    }
}

/// Map an [`EnvelopeError`] onto the status the proxy returns to its client.
pub fn service_error(e: &EnvelopeError) -> ServiceError {
    match e.kind() {
        ErrorKind::KmsUnavailable => ServiceError::Unavailable(e.to_string()),
        ErrorKind::KmsAccessDenied | ErrorKind::KmsKeyNotFound => {
            ServiceError::Forbidden(e.to_string())
        }
        // Integrity failures get a fixed message: the cause stays in the logs.
        ErrorKind::KmsIntegrity | ErrorKind::AuthenticationFailure => {
            ServiceError::BadRequest("envelope failed integrity check".into())
        }
        ErrorKind::MalformedEnvelope | ErrorKind::InvalidObjectIdentity => {
            ServiceError::BadRequest(e.to_string())
        }
        ErrorKind::Internal => ServiceError::Internal("envelope operation failed".into()),
    }
}

fn envelope_error_response(op: &'static str, object_path: &str, e: &EnvelopeError) -> Response {
    let kind = e.kind();
    if e.is_security_violation() {
        error!(op, object_path, kind = %kind, "envelope integrity violation");
    } else if kind == ErrorKind::Internal {
        error!(op, object_path, kind = %kind, error = %e, "envelope operation failed");
    } else {
        warn!(op, object_path, kind = %kind, error = %e, "envelope operation failed");
    }
    error_response(service_error(e))
}

fn error_response(e: ServiceError) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse::new(e.code(), e.to_string());
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use envelope::IntegrityFailure;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_configuration() {
        let app = Router::new()
            .route("/health", get(health))
            .with_state(AppState::for_tests());
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
        assert!(health.encryption_enabled);
        assert_eq!(health.keys_configured, 1);
    }

    #[test]
    fn error_statuses() {
        let cases = [
            (EnvelopeError::KmsUnavailable("timeout".into()), 503),
            (EnvelopeError::KmsAccessDenied("denied".into()), 403),
            (EnvelopeError::KmsKeyNotFound("gone".into()), 403),
            (
                EnvelopeError::Integrity(IntegrityFailure::AuthenticationFailure),
                400,
            ),
            (
                EnvelopeError::Integrity(IntegrityFailure::KmsIntegrity("bad".into())),
                400,
            ),
            (EnvelopeError::MalformedEnvelope("short".into()), 400),
            (EnvelopeError::InvalidObjectIdentity("empty".into()), 400),
            (EnvelopeError::Internal("aead".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(service_error(&err).http_status(), status, "{err:?}");
        }
    }

    #[test]
    fn integrity_message_hides_cause() {
        let err = EnvelopeError::Integrity(IntegrityFailure::KmsIntegrity(
            "ciphertext was produced by key X".into(),
        ));
        assert!(!service_error(&err).to_string().contains("key X"));
    }

    #[test]
    fn content_md5_matches_gcs_encoding() {
        assert_eq!(content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
        assert_eq!(
            content_md5(b"The quick brown fox jumps over the lazy dog"),
            "nhB9nTcrtoJr2B01QqQZ1g=="
        );
    }

    #[test]
    fn key_errors() {
        assert_eq!(key_error(KeyMapError::Unmapped("b".into())).http_status(), 403);
        assert_eq!(
            key_error(KeyMapError::InvalidObjectPath("".into())).http_status(),
            400
        );
    }

    #[test]
    fn object_path_accepts_utf8() {
        let state = AppState::for_tests();
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Object-Path",
            axum::http::HeaderValue::from_bytes("gs://b/caf\u{e9}".as_bytes()).unwrap(),
        );
        assert_eq!(object_path(&state, &headers).unwrap(), "gs://b/caf\u{e9}");

        let err = object_path(&state, &HeaderMap::new()).unwrap_err();
        assert!(err.to_string().contains("missing X-Object-Path header"));
    }
}
