//! `sealer`: object sealing service entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (tracing + optional OTLP).
//! 3. Build the KMS backends the key mapping refers to.
//! 4. Build the [`EnvelopeCodec`] and verify every mapped key.
//! 5. Build the Axum router and serve until Ctrl-C / SIGTERM.

mod config;
mod keymap;
mod retry;
mod server;
mod startup;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use envelope::kms::{AwsKmsWrapper, GcpCredentials, GcpKmsWrapper, KmsScheme, LocalKmsWrapper};
use envelope::{EnvelopeCodec, KmsClients};
use tracing::{info, warn};

use config::Config;
use keymap::KeyMapping;
use server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_port = cfg.listen_port,
        algorithm = %cfg.aead_algorithm,
        "sealer starting"
    );

    // -----------------------------------------------------------------------
    // 3. KMS backends
    // -----------------------------------------------------------------------
    let mapping = cfg.key_mapping()?;
    let kms = build_kms_clients(&cfg, &mapping).await?;

    // -----------------------------------------------------------------------
    // 4. Codec + key verification
    // -----------------------------------------------------------------------
    let codec = EnvelopeCodec::new(Arc::new(kms), cfg.codec_options());
    if cfg.encryption_disabled {
        warn!("ENCRYPTION_DISABLED is set: objects will be stored in plaintext");
    } else if cfg.verify_keys_on_startup {
        startup::verify_keys(&codec, &mapping.handles()).await?;
    }

    // -----------------------------------------------------------------------
    // 5. HTTP server
    // -----------------------------------------------------------------------
    let state = AppState::new(
        codec,
        mapping,
        cfg.object_path_header.clone(),
        cfg.retry_policy(),
        cfg.max_object_bytes,
    )
    .with_encryption_enabled(!cfg.encryption_disabled);
    let router = server::router::build(state);

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.listen_port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("sealer stopped");
    telemetry::shutdown_telemetry();
    Ok(())
}

/// Construct only the backends whose schemes appear in the mapping.
async fn build_kms_clients(cfg: &Config, mapping: &KeyMapping) -> Result<KmsClients> {
    let handles = mapping.handles();
    let uses = |scheme: KmsScheme| handles.iter().any(|h| h.scheme() == scheme);
    let mut clients = KmsClients::new();

    if uses(KmsScheme::Gcp) {
        let credentials = match &cfg.gcp_access_token {
            Some(token) => GcpCredentials::AccessToken(token.trim().to_owned()),
            None => GcpCredentials::MetadataServer,
        };
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build Cloud KMS HTTP client")?;
        clients = clients.with_gcp(GcpKmsWrapper::new(http, &cfg.gcp_kms_endpoint, credentials));
        info!(endpoint = %cfg.gcp_kms_endpoint, "Cloud KMS backend configured");
    }

    if uses(KmsScheme::Aws) {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        clients = clients.with_aws(AwsKmsWrapper::new(aws_sdk_kms::Client::new(&sdk_config)));
        info!("AWS KMS backend configured");
    }

    if uses(KmsScheme::Local) {
        let seed = cfg.local_kms_seed()?;
        let mut local = LocalKmsWrapper::new();
        for handle in handles.iter().filter(|h| h.scheme() == KmsScheme::Local) {
            local = local.with_derived_key(&seed, (*handle).clone())?;
        }
        clients = clients.with_local(local);
        warn!("local KMS backend configured: master keys are derived in-process");
    }

    Ok(clients)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
