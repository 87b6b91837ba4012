//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use envelope::format::MAX_ENVELOPE_OVERHEAD;
use envelope::EnvelopeCodec;

use crate::keymap::KeyMapping;
use crate::retry::RetryPolicy;

/// Application state shared across all request handlers.
///
/// All fields are cheaply cloneable (`Arc`-wrapped or `Copy`) so that Axum
/// can clone the state for each request without copying expensive data.
#[derive(Clone)]
pub struct AppState {
    /// Seals and opens envelopes against the configured KMS backends.
    pub codec: Arc<EnvelopeCodec>,
    /// Resolves each object path to its master key.
    pub key_mapping: Arc<KeyMapping>,
    /// Name of the HTTP header carrying the object path.
    pub object_path_header: Arc<String>,
    /// Retry policy for transient KMS failures.
    pub retry: RetryPolicy,
    /// `false` passes bodies through unchanged.
    pub encryption_enabled: bool,
    /// Largest plaintext accepted by `/seal`, in bytes.
    pub max_object_bytes: usize,
}

impl AppState {
    /// Create a new [`AppState`] with encryption enabled.
    pub fn new(
        codec: EnvelopeCodec,
        key_mapping: KeyMapping,
        object_path_header: String,
        retry: RetryPolicy,
        max_object_bytes: usize,
    ) -> Self {
        Self {
            codec: Arc::new(codec),
            key_mapping: Arc::new(key_mapping),
            object_path_header: Arc::new(object_path_header),
            retry,
            encryption_enabled: true,
            max_object_bytes,
        }
    }

    pub fn with_encryption_enabled(mut self, enabled: bool) -> Self {
        self.encryption_enabled = enabled;
        self
    }

    /// Largest envelope accepted by `/open`: any sealed object that passed
    /// the `/seal` limit must fit.
    pub fn max_envelope_bytes(&self) -> usize {
        self.max_object_bytes.saturating_add(MAX_ENVELOPE_OVERHEAD)
    }
}

#[cfg(test)]
impl AppState {
    /// State backed by an in-process KMS holding one global key,
    /// `local-kms://test`.
    pub fn for_tests() -> Self {
        use envelope::kms::LocalKmsWrapper;
        use envelope::{CodecOptions, MasterKeyHandle};

        let key = MasterKeyHandle::parse("local-kms://test").unwrap();
        let kms = LocalKmsWrapper::new().with_random_key(key.clone());
        Self::new(
            EnvelopeCodec::new(Arc::new(kms), CodecOptions::default()),
            KeyMapping::global(key),
            "X-Object-Path".into(),
            RetryPolicy::default(),
            1024 * 1024,
        )
    }
}
