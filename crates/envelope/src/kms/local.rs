//! In-process KMS stand-in for development deployments and tests.
//!
//! Master keys are held in memory and registered up front, either random or
//! derived from a seed with HMAC-SHA256 over the handle URI. Wrapped DEKs are
//! `nonce || ciphertext || tag` under AES-256-GCM with the handle URI as
//! associated data, so a blob wrapped under one handle never unwraps under
//! another.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use super::{wrapped_from_response, KeyWrapper, KmsError, MasterKeyHandle, WrappedDek};
use crate::cipher::{self, AeadAlgorithm, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::dek::{generate_nonce, DataEncryptionKey};

/// Minimum seed length accepted by [`LocalKmsWrapper::with_derived_key`].
pub const MIN_SEED_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalKmsError {
    #[error("local KMS seed must be at least {MIN_SEED_LEN} bytes, got {0}")]
    SeedTooShort(usize),
}

type MasterKey = Zeroizing<[u8; KEY_LEN]>;

/// Read-only set of in-memory master keys.
#[derive(Clone, Default)]
pub struct LocalKmsWrapper {
    keys: Arc<HashMap<MasterKeyHandle, MasterKey>>,
}

impl LocalKmsWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` with a freshly generated random master key.
    pub fn with_random_key(mut self, handle: MasterKeyHandle) -> Self {
        let generated = DataEncryptionKey::generate();
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(generated.as_bytes());
        Arc::make_mut(&mut self.keys).insert(handle, key);
        self
    }

    /// Register `handle` with a master key derived from `seed`.
    ///
    /// The same seed and handle always yield the same key, so separate
    /// processes sharing a seed can open each other's envelopes.
    ///
    /// # Errors
    ///
    /// Returns [`LocalKmsError::SeedTooShort`] if `seed` is shorter than
    /// [`MIN_SEED_LEN`].
    pub fn with_derived_key(
        mut self,
        seed: &[u8],
        handle: MasterKeyHandle,
    ) -> Result<Self, LocalKmsError> {
        if seed.len() < MIN_SEED_LEN {
            return Err(LocalKmsError::SeedTooShort(seed.len()));
        }
        let mut mac = Hmac::<Sha256>::new_from_slice(seed)
            .map_err(|_| LocalKmsError::SeedTooShort(seed.len()))?;
        mac.update(handle.as_str().as_bytes());
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&mac.finalize().into_bytes());
        Arc::make_mut(&mut self.keys).insert(handle, key);
        Ok(self)
    }

    pub fn contains(&self, handle: &MasterKeyHandle) -> bool {
        self.keys.contains_key(handle)
    }

    fn master_key(&self, handle: &MasterKeyHandle) -> Result<&MasterKey, KmsError> {
        self.keys
            .get(handle)
            .ok_or_else(|| KmsError::KeyNotFound(format!("no local master key for {handle}")))
    }
}

impl std::fmt::Debug for LocalKmsWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKmsWrapper")
            .field("keys", &self.keys.len())
            .finish()
    }
}

#[async_trait]
impl KeyWrapper for LocalKmsWrapper {
    async fn wrap(&self, master_key: &MasterKeyHandle, dek: &[u8]) -> Result<WrappedDek, KmsError> {
        let key = self.master_key(master_key)?;
        let nonce = generate_nonce();
        let (ciphertext, tag) = cipher::encrypt(
            AeadAlgorithm::Aes256Gcm,
            key.as_slice(),
            &nonce,
            dek,
            master_key.as_str().as_bytes(),
        )
        .map_err(|e| KmsError::Unavailable(format!("local wrap failed: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        blob.extend_from_slice(&tag);
        wrapped_from_response(blob)
    }

    async fn unwrap(
        &self,
        master_key: &MasterKeyHandle,
        wrapped: &WrappedDek,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let key = self.master_key(master_key)?;
        let blob = wrapped.as_bytes();
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(KmsError::Integrity(format!(
                "wrapped key of {} bytes is too short",
                blob.len()
            )));
        }
        let (nonce, rest) = blob.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
        cipher::decrypt(
            AeadAlgorithm::Aes256Gcm,
            key.as_slice(),
            nonce,
            ciphertext,
            tag,
            master_key.as_str().as_bytes(),
        )
        .map(Zeroizing::new)
        .map_err(|_| KmsError::Integrity(format!("wrapped key does not verify under {master_key}")))
    }
}
