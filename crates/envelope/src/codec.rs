//! [`EnvelopeCodec`]: seal and open object payloads.
//!
//! # Seal
//!
//! 1. Derive associated data from the destination path.
//! 2. Generate a fresh DEK and nonce.
//! 3. AEAD-encrypt the payload.
//! 4. Wrap the DEK via the KMS.
//! 5. Assemble the [`Envelope`]. The DEK is zeroized when it goes out of scope.
//!
//! # Open
//!
//! 1. Parse the envelope bytes (structural failures never reach the KMS).
//! 2. Derive associated data from the caller-supplied path.
//! 3. Unwrap the DEK via the KMS.
//! 4. AEAD-decrypt; a tag mismatch is an integrity failure.
//!
//! Both operations are single-shot and hold no state between calls, so one
//! codec can serve any number of concurrent workers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::binding::AssociatedData;
use crate::cipher::{self, AeadAlgorithm};
use crate::dek::{generate_nonce, DataEncryptionKey};
use crate::error::EnvelopeError;
use crate::format::Envelope;
use crate::kms::{KeyWrapper, KmsError, MasterKeyHandle};

/// Default bound on a single KMS round trip.
pub const DEFAULT_KMS_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-deployment codec settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    /// AEAD primitive used for payloads.
    pub algorithm: AeadAlgorithm,

    /// Bound on each wrap/unwrap call. Expiry surfaces as `KmsUnavailable`.
    pub kms_timeout: Duration,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            algorithm: AeadAlgorithm::default(),
            kms_timeout: DEFAULT_KMS_TIMEOUT,
        }
    }
}

/// Seals and opens envelopes using a shared [`KeyWrapper`].
#[derive(Clone)]
pub struct EnvelopeCodec {
    wrapper: Arc<dyn KeyWrapper>,
    options: CodecOptions,
}

impl EnvelopeCodec {
    pub fn new(wrapper: Arc<dyn KeyWrapper>, options: CodecOptions) -> Self {
        Self { wrapper, options }
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    /// Encrypt `plaintext` for storage at `object_path` under `master_key`.
    ///
    /// Either a complete envelope is returned or nothing is: no partial state
    /// is observable on failure.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::InvalidObjectIdentity`] for an empty path.
    /// - `KmsUnavailable` / `KmsAccessDenied` / `KmsKeyNotFound` from the wrap.
    #[instrument(
        name = "envelope.seal",
        skip_all,
        fields(object_path = %object_path, key = %master_key, plaintext_len = plaintext.len())
    )]
    pub async fn seal(
        &self,
        master_key: &MasterKeyHandle,
        object_path: &str,
        plaintext: &[u8],
    ) -> Result<Envelope, EnvelopeError> {
        let aad = AssociatedData::derive(object_path)?;
        let dek = DataEncryptionKey::generate();
        let nonce = generate_nonce();

        let (ciphertext, tag) = cipher::encrypt(
            self.options.algorithm,
            dek.as_bytes(),
            &nonce,
            plaintext,
            aad.as_bytes(),
        )?;
        let wrapped_dek = self
            .bounded("wrap", self.wrapper.wrap(master_key, dek.as_bytes()))
            .await?;
        drop(dek);

        debug!(wrapped_len = wrapped_dek.len(), "sealed");
        Ok(Envelope {
            wrapped_dek,
            nonce,
            ciphertext,
            tag,
        })
    }

    /// [`seal`](Self::seal) and serialise to the at-rest layout.
    pub async fn seal_to_bytes(
        &self,
        master_key: &MasterKeyHandle,
        object_path: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EnvelopeError> {
        Ok(self.seal(master_key, object_path, plaintext).await?.to_bytes())
    }

    /// Parse `envelope_bytes` and decrypt them for `object_path`.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::MalformedEnvelope`] for structurally invalid bytes,
    ///   raised before any KMS call.
    /// - [`EnvelopeError::Integrity`] if the KMS rejects the wrapped key or the
    ///   payload tag does not verify for this path.
    /// - KMS availability/authorisation errors from the unwrap.
    pub async fn open(
        &self,
        master_key: &MasterKeyHandle,
        object_path: &str,
        envelope_bytes: &[u8],
    ) -> Result<Vec<u8>, EnvelopeError> {
        let envelope = Envelope::from_bytes(envelope_bytes)?;
        self.open_envelope(master_key, object_path, &envelope).await
    }

    /// Decrypt an already parsed envelope for `object_path`.
    #[instrument(
        name = "envelope.open",
        skip_all,
        fields(object_path = %object_path, key = %master_key, ciphertext_len = envelope.ciphertext.len())
    )]
    pub async fn open_envelope(
        &self,
        master_key: &MasterKeyHandle,
        object_path: &str,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, EnvelopeError> {
        let aad = AssociatedData::derive(object_path)?;
        let material = self
            .bounded("unwrap", self.wrapper.unwrap(master_key, &envelope.wrapped_dek))
            .await?;
        let dek = DataEncryptionKey::from_unwrapped(&material)?;
        drop(material);

        let plaintext = cipher::decrypt(
            self.options.algorithm,
            dek.as_bytes(),
            &envelope.nonce,
            &envelope.ciphertext,
            &envelope.tag,
            aad.as_bytes(),
        )?;
        debug!(plaintext_len = plaintext.len(), "opened");
        Ok(plaintext)
    }

    /// Run a KMS call under the configured timeout.
    async fn bounded<T>(
        &self,
        op: &str,
        call: impl Future<Output = Result<T, KmsError>>,
    ) -> Result<T, EnvelopeError> {
        match tokio::time::timeout(self.options.kms_timeout, call).await {
            Ok(result) => result.map_err(EnvelopeError::from),
            Err(_) => Err(EnvelopeError::KmsUnavailable(format!(
                "KMS {op} timed out after {:?}",
                self.options.kms_timeout
            ))),
        }
    }
}

impl std::fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
