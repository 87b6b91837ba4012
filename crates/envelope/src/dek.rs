//! Per-object Data Encryption Keys.

use aes_gcm::aead::{rand_core::RngCore, OsRng};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher::{KEY_LEN, NONCE_LEN};
use crate::error::{EnvelopeError, IntegrityFailure};

/// A 256-bit DEK that exists only for the duration of one seal or open.
///
/// The key bytes are overwritten with zeroes when this value is dropped, so
/// every exit path (success, error, timeout cancellation) clears them.
/// Keys are written directly into the struct rather than through a local
/// array. Moves of the returned value are still plain copies the compiler
/// may leave on the stack; `zeroize` cannot reach those.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataEncryptionKey {
    bytes: [u8; KEY_LEN],
}

impl DataEncryptionKey {
    /// Generate a fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = Self { bytes: [0u8; KEY_LEN] };
        OsRng.fill_bytes(&mut key.bytes);
        key
    }

    /// Reconstitute a key returned by a KMS unwrap.
    ///
    /// # Errors
    ///
    /// Returns a KMS integrity failure if the material is not [`KEY_LEN`]
    /// bytes; a wrong-length DEK means the wrapped blob or master key is wrong.
    pub fn from_unwrapped(material: &[u8]) -> Result<Self, EnvelopeError> {
        if material.len() != KEY_LEN {
            return Err(EnvelopeError::Integrity(IntegrityFailure::KmsIntegrity(
                format!(
                    "unwrapped key has invalid length: expected {KEY_LEN} bytes, got {}",
                    material.len()
                ),
            )));
        }
        let mut key = Self { bytes: [0u8; KEY_LEN] };
        key.bytes.copy_from_slice(material);
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for DataEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material, even in debug builds.
        f.write_str("DataEncryptionKey([REDACTED])")
    }
}

/// Generate a fresh random nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}
