//! Configuration loading and validation for the sealing service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use envelope::kms::local::MIN_SEED_LEN;
use envelope::kms::KmsScheme;
use envelope::{AeadAlgorithm, CodecOptions};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::keymap::KeyMapping;
use crate::retry::RetryPolicy;

/// Validated sealing service configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Bucket → master key mapping, e.g. `*:projects/p/.../cryptoKeys/k`. **Required.**
    pub kms_bucket_key_mapping: String,

    /// AEAD used for new envelopes: `aes-256-gcm` or `aes-256-gcm-siv`.
    #[serde(default)]
    pub aead_algorithm: AeadAlgorithm,

    /// Upper bound on a single KMS wrap/unwrap call, in milliseconds.
    #[serde(default = "default_kms_timeout_ms")]
    pub kms_timeout_ms: u64,

    /// Total attempts for an operation that fails with a transient KMS error.
    #[serde(default = "default_kms_max_attempts")]
    pub kms_max_attempts: u32,

    /// Backoff before the first retry, doubled for each subsequent one.
    #[serde(default = "default_kms_retry_base_ms")]
    pub kms_retry_base_ms: u64,

    /// Port the HTTP server listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// HTTP header carrying the full object path of each request.
    #[serde(default = "default_object_path_header")]
    pub object_path_header: String,

    /// Largest object body accepted for sealing or opening.
    #[serde(default = "default_max_object_bytes")]
    pub max_object_bytes: usize,

    /// Pass bodies through unchanged instead of sealing them.
    #[serde(default)]
    pub encryption_disabled: bool,

    /// Exercise every mapped key with a seal/open round trip before serving.
    #[serde(default = "default_true")]
    pub verify_keys_on_startup: bool,

    /// Cloud KMS REST endpoint.
    #[serde(default = "default_gcp_kms_endpoint")]
    pub gcp_kms_endpoint: String,

    /// Fixed OAuth2 token for Cloud KMS. Falls back to the metadata server.
    #[serde(default)]
    pub gcp_access_token: Option<String>,

    /// Base64 seed for `local-kms://` master keys. Development only.
    #[serde(default)]
    pub local_kms_seed: Option<String>,

    /// OTLP/gRPC endpoint for span export. Logs only when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_kms_timeout_ms() -> u64 {
    10_000
}
fn default_kms_max_attempts() -> u32 {
    3
}
fn default_kms_retry_base_ms() -> u64 {
    100
}
fn default_listen_port() -> u16 {
    9080
}
fn default_object_path_header() -> String {
    "X-Object-Path".into()
}
fn default_max_object_bytes() -> usize {
    256 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_gcp_kms_endpoint() -> String {
    envelope::kms::gcp::DEFAULT_ENDPOINT.into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.kms_bucket_key_mapping, "KMS_BUCKET_KEY_MAPPING")?;
        let mapping = self.key_mapping()?;

        HeaderName::from_bytes(self.object_path_header.as_bytes())
            .with_context(|| format!("OBJECT_PATH_HEADER {:?} is not a valid header name", self.object_path_header))?;

        if self.kms_timeout_ms == 0 {
            anyhow::bail!("KMS_TIMEOUT_MS must be > 0");
        }
        if self.kms_max_attempts == 0 {
            anyhow::bail!("KMS_MAX_ATTEMPTS must be >= 1");
        }
        if self.max_object_bytes == 0 {
            anyhow::bail!("MAX_OBJECT_BYTES must be > 0");
        }
        if self.gcp_access_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            anyhow::bail!("GCP_ACCESS_TOKEN must not be empty when set");
        }
        if mapping.handles().iter().any(|h| h.scheme() == KmsScheme::Local) {
            self.local_kms_seed()?;
        }
        Ok(())
    }

    /// Parsed bucket → key mapping.
    pub fn key_mapping(&self) -> Result<KeyMapping> {
        self.kms_bucket_key_mapping
            .parse()
            .context("KMS_BUCKET_KEY_MAPPING is invalid")
    }

    pub fn codec_options(&self) -> CodecOptions {
        CodecOptions {
            algorithm: self.aead_algorithm,
            kms_timeout: Duration::from_millis(self.kms_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.kms_max_attempts,
            base_delay: Duration::from_millis(self.kms_retry_base_ms),
        }
    }

    /// Decoded `LOCAL_KMS_SEED`.
    pub fn local_kms_seed(&self) -> Result<Zeroizing<Vec<u8>>> {
        let encoded = self
            .local_kms_seed
            .as_deref()
            .context("LOCAL_KMS_SEED is required when local-kms:// keys are mapped")?;
        let seed = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .context("LOCAL_KMS_SEED is not valid base64")?,
        );
        if seed.len() < MIN_SEED_LEN {
            anyhow::bail!("LOCAL_KMS_SEED must decode to at least {MIN_SEED_LEN} bytes");
        }
        Ok(seed)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("kms_bucket_key_mapping", &self.kms_bucket_key_mapping)
            .field("aead_algorithm", &self.aead_algorithm)
            .field("kms_timeout_ms", &self.kms_timeout_ms)
            .field("kms_max_attempts", &self.kms_max_attempts)
            .field("kms_retry_base_ms", &self.kms_retry_base_ms)
            .field("listen_port", &self.listen_port)
            .field("object_path_header", &self.object_path_header)
            .field("max_object_bytes", &self.max_object_bytes)
            .field("encryption_disabled", &self.encryption_disabled)
            .field("verify_keys_on_startup", &self.verify_keys_on_startup)
            .field("gcp_kms_endpoint", &self.gcp_kms_endpoint)
            .field("gcp_access_token", &self.gcp_access_token.as_ref().map(|_| "[REDACTED]"))
            .field("local_kms_seed", &self.local_kms_seed.as_ref().map(|_| "[REDACTED]"))
            .field("otel_exporter_otlp_endpoint", &self.otel_exporter_otlp_endpoint)
            .field("log_level", &self.log_level)
            .finish()
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            kms_bucket_key_mapping: "*:projects/p/locations/global/keyRings/r/cryptoKeys/k".into(),
            aead_algorithm: AeadAlgorithm::default(),
            kms_timeout_ms: default_kms_timeout_ms(),
            kms_max_attempts: default_kms_max_attempts(),
            kms_retry_base_ms: default_kms_retry_base_ms(),
            listen_port: default_listen_port(),
            object_path_header: default_object_path_header(),
            max_object_bytes: default_max_object_bytes(),
            encryption_disabled: false,
            verify_keys_on_startup: default_true(),
            gcp_kms_endpoint: default_gcp_kms_endpoint(),
            gcp_access_token: None,
            local_kms_seed: None,
            otel_exporter_otlp_endpoint: None,
            log_level: default_log_level(),
        }
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(AeadAlgorithm::default(), AeadAlgorithm::Aes256Gcm);
        assert_eq!(default_kms_timeout_ms(), 10_000);
        assert_eq!(default_kms_max_attempts(), 3);
        assert_eq!(default_kms_retry_base_ms(), 100);
        assert_eq!(default_listen_port(), 9080);
        assert_eq!(default_object_path_header(), "X-Object-Path");
        assert_eq!(default_max_object_bytes(), 268_435_456);
        assert_eq!(default_gcp_kms_endpoint(), "https://cloudkms.googleapis.com");
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn valid_config_passes() {
        let cfg = valid();
        cfg.validate().unwrap();
        assert_eq!(cfg.codec_options(), CodecOptions::default());
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn validate_rejects_empty_mapping() {
        let cfg = Config {
            kms_bucket_key_mapping: "  ".into(),
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_malformed_mapping() {
        let cfg = Config {
            kms_bucket_key_mapping: "bucket-without-key".into(),
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    fn load(algorithm: Option<&str>) -> Result<Config, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_override("kms_bucket_key_mapping", "*:local-kms://dev")?;
        if let Some(algorithm) = algorithm {
            builder = builder.set_override("aead_algorithm", algorithm)?;
        }
        builder.build()?.try_deserialize()
    }

    #[test]
    fn algorithm_deserializes_from_its_name() {
        assert_eq!(load(None).unwrap().aead_algorithm, AeadAlgorithm::Aes256Gcm);
        let cfg = load(Some("aes-256-gcm-siv")).unwrap();
        assert_eq!(cfg.aead_algorithm, AeadAlgorithm::Aes256GcmSiv);
        assert_eq!(cfg.codec_options().algorithm, AeadAlgorithm::Aes256GcmSiv);
    }

    #[test]
    fn unknown_algorithm_fails_to_load() {
        assert!(load(Some("chacha20-poly1305")).is_err());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let cfg = Config {
            kms_max_attempts: 0,
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_header_name() {
        let cfg = Config {
            object_path_header: "X Object Path".into(),
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn local_keys_require_a_seed() {
        let mut cfg = Config {
            kms_bucket_key_mapping: "*:local-kms://dev".into(),
            ..valid()
        };
        assert!(cfg.validate().is_err());

        cfg.local_kms_seed = Some(STANDARD.encode([1u8; 16]));
        assert!(cfg.validate().is_err());

        cfg.local_kms_seed = Some(STANDARD.encode([1u8; 32]));
        cfg.validate().unwrap();
        assert_eq!(cfg.local_kms_seed().unwrap().len(), 32);
    }

    #[test]
    fn debug_redacts_secrets() {
        let cfg = Config {
            gcp_access_token: Some("ya29.secret".into()),
            local_kms_seed: Some("c2VlZA==".into()),
            ..valid()
        };
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("ya29"));
        assert!(!dbg.contains("c2VlZA"));
    }
}
