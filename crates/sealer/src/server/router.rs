//! Axum router construction.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
pub fn build(state: AppState) -> Router {
    let seal_limit = DefaultBodyLimit::max(state.max_object_bytes);
    let open_limit = DefaultBodyLimit::max(state.max_envelope_bytes());
    Router::new()
        .route("/seal", post(handlers::seal).layer(seal_limit))
        .route("/open", post(handlers::open).layer(open_limit))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(middleware::REQUEST_TIMEOUT))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use common::protocol::ErrorResponse;
    use envelope::kms::LocalKmsWrapper;
    use envelope::{CodecOptions, EnvelopeCodec, MasterKeyHandle};
    use tower::ServiceExt;

    use crate::keymap::KeyMapping;
    use crate::retry::RetryPolicy;
    use crate::server::handlers::{content_md5, CONTENT_MD5};

    const OBJECT_CONTENT: &[u8] = b"testing object content";
    const PATH: &str = "gs://gcs-proxy-func-test/run-1/func-test-run-1";

    fn post(uri: &str, path: Option<&str>, body: impl Into<Body>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(path) = path {
            builder = builder.header("X-Object-Path", path);
        }
        builder.body(body.into()).unwrap()
    }

    async fn body_bytes(resp: Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn error_body(resp: Response) -> ErrorResponse {
        serde_json::from_slice(&body_bytes(resp).await).unwrap()
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = build(AppState::for_tests());
        let req = Request::builder()
            .uri("/unknown")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn health_route_exists() {
        let app = build(AppState::for_tests());
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn seal_then_open_round_trips() {
        let app = build(AppState::for_tests());

        let resp = app
            .clone()
            .oneshot(post("/seal", Some(PATH), OBJECT_CONTENT))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        let sealed = body_bytes(resp).await;
        assert_ne!(sealed, OBJECT_CONTENT);

        let resp = app
            .oneshot(post("/open", Some(PATH), sealed))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, OBJECT_CONTENT);
    }

    #[tokio::test]
    async fn responses_carry_md5_of_their_body() {
        let app = build(AppState::for_tests());

        let resp = app
            .clone()
            .oneshot(post("/seal", Some(PATH), OBJECT_CONTENT))
            .await
            .unwrap();
        let md5 = resp.headers()[CONTENT_MD5].to_str().unwrap().to_owned();
        let sealed = body_bytes(resp).await;
        assert_eq!(md5, content_md5(&sealed));
        assert_ne!(md5, content_md5(OBJECT_CONTENT));

        let resp = app
            .oneshot(post("/open", Some(PATH), sealed))
            .await
            .unwrap();
        assert_eq!(
            resp.headers()[CONTENT_MD5].to_str().unwrap(),
            content_md5(OBJECT_CONTENT)
        );
    }

    #[tokio::test]
    async fn relocated_envelope_is_rejected() {
        let app = build(AppState::for_tests());
        let resp = app
            .clone()
            .oneshot(post("/seal", Some(PATH), OBJECT_CONTENT))
            .await
            .unwrap();
        let sealed = body_bytes(resp).await;

        let resp = app
            .oneshot(post("/open", Some("gs://gcs-proxy-func-test/elsewhere"), sealed))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let err = error_body(resp).await;
        assert_eq!(err.code, "bad_request");
        assert!(err.message.contains("integrity"));
    }

    #[tokio::test]
    async fn missing_path_header_is_bad_request() {
        let app = build(AppState::for_tests());
        let resp = app
            .oneshot(post("/seal", None, OBJECT_CONTENT))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(error_body(resp).await.message.contains("X-Object-Path"));
    }

    #[tokio::test]
    async fn malformed_envelope_is_bad_request() {
        let app = build(AppState::for_tests());
        let resp = app
            .oneshot(post("/open", Some(PATH), vec![0u8, 0, 0]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(error_body(resp).await.message.contains("malformed"));
    }

    #[tokio::test]
    async fn unmapped_bucket_is_forbidden() {
        let key = MasterKeyHandle::parse("local-kms://data").unwrap();
        let state = AppState::new(
            EnvelopeCodec::new(
                Arc::new(LocalKmsWrapper::new().with_random_key(key)),
                CodecOptions::default(),
            ),
            "data:local-kms://data".parse::<KeyMapping>().unwrap(),
            "X-Object-Path".into(),
            RetryPolicy::default(),
            1024,
        );
        let app = build(state);

        let resp = app
            .clone()
            .oneshot(post("/seal", Some("gs://data/obj"), OBJECT_CONTENT))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(post("/seal", Some("gs://other/obj"), OBJECT_CONTENT))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_body(resp).await.code, "forbidden");
    }

    #[tokio::test]
    async fn unknown_kms_key_is_forbidden() {
        let key = MasterKeyHandle::parse("local-kms://not-registered").unwrap();
        let state = AppState::new(
            EnvelopeCodec::new(Arc::new(LocalKmsWrapper::new()), CodecOptions::default()),
            KeyMapping::global(key),
            "X-Object-Path".into(),
            RetryPolicy::default(),
            1024,
        );
        let resp = build(state)
            .oneshot(post("/seal", Some(PATH), OBJECT_CONTENT))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn disabled_encryption_passes_bodies_through() {
        let app = build(AppState::for_tests().with_encryption_enabled(false));
        for uri in ["/seal", "/open"] {
            let resp = app
                .clone()
                .oneshot(post(uri, None, OBJECT_CONTENT))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(body_bytes(resp).await, OBJECT_CONTENT);
        }
    }

    #[tokio::test]
    async fn object_at_size_limit_round_trips() {
        let state = AppState::for_tests();
        let object = vec![0x5Au8; state.max_object_bytes];
        let app = build(state);

        let resp = app
            .clone()
            .oneshot(post("/seal", Some(PATH), object.clone()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let sealed = body_bytes(resp).await;
        assert!(sealed.len() > object.len());

        let resp = app
            .oneshot(post("/open", Some(PATH), sealed))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, object);
    }

    #[tokio::test]
    async fn open_rejects_bodies_beyond_envelope_limit() {
        let state = AppState::for_tests();
        let too_big = vec![0u8; state.max_envelope_bytes() + 1];
        let resp = build(state)
            .oneshot(post("/open", Some(PATH), too_big))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let app = build(AppState::for_tests());
        let resp = app
            .oneshot(post("/seal", Some(PATH), vec![0u8; 2 * 1024 * 1024]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
