//! Detached-tag AEAD encryption of object payloads.
//!
//! Two primitives are supported, selected per deployment. Both take a 256-bit
//! key, a 96-bit nonce and produce a 128-bit tag:
//!
//! - **AES-256-GCM** (default). Nonces must never repeat under one key; the
//!   codec guarantees this by generating a fresh DEK and nonce per seal.
//! - **AES-256-GCM-SIV** (RFC 8452). Nonce-misuse-resistant; a repeated nonce
//!   only leaks plaintext equality.
//!
//! The associated data is authenticated but not encrypted. Tag verification is
//! the only place a path-binding mismatch is detected.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit, Nonce, Tag},
    Aes256Gcm,
};
use aes_gcm_siv::Aes256GcmSiv;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of a nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of an authentication tag (16 bytes = 128 bits).
pub const TAG_LEN: usize = 16;

/// AEAD primitive used for payload encryption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "aes-256-gcm-siv")]
    Aes256GcmSiv,
}

impl AeadAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            AeadAlgorithm::Aes256Gcm => "aes-256-gcm",
            AeadAlgorithm::Aes256GcmSiv => "aes-256-gcm-siv",
        }
    }
}

impl std::fmt::Display for AeadAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AeadAlgorithm {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-256-gcm" => Ok(AeadAlgorithm::Aes256Gcm),
            "aes-256-gcm-siv" => Ok(AeadAlgorithm::Aes256GcmSiv),
            other => Err(CipherError::UnknownAlgorithm(other.to_owned())),
        }
    }
}

/// Errors produced by the cipher layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The nonce is the wrong length (must be [`NONCE_LEN`] bytes).
    #[error("invalid nonce length: expected {NONCE_LEN} bytes, got {0}")]
    InvalidNonceLength(usize),

    /// The tag is the wrong length (must be [`TAG_LEN`] bytes).
    #[error("invalid tag length: expected {TAG_LEN} bytes, got {0}")]
    InvalidTagLength(usize),

    /// Tag verification failed.
    #[error("authentication failed")]
    AuthenticationFailure,

    /// Encryption failed inside the primitive (unreachable with valid inputs).
    #[error("aead operation failed")]
    AeadFailure,

    /// The algorithm name is not recognised.
    #[error("unknown AEAD algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// Encrypt `plaintext` under `key` and `nonce`, authenticating `associated_data`.
///
/// Returns the ciphertext (same length as the plaintext) and the detached tag.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] or [`CipherError::InvalidNonceLength`]
/// for wrongly sized inputs.
pub fn encrypt(
    algorithm: AeadAlgorithm,
    key: &[u8],
    nonce: &[u8],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN]), CipherError> {
    check_lengths(key, nonce)?;
    let mut buffer = plaintext.to_vec();
    let tag = match algorithm {
        AeadAlgorithm::Aes256Gcm => {
            seal_in_place::<Aes256Gcm>(key, nonce, associated_data, &mut buffer)?
        }
        AeadAlgorithm::Aes256GcmSiv => {
            seal_in_place::<Aes256GcmSiv>(key, nonce, associated_data, &mut buffer)?
        }
    };
    Ok((buffer, tag))
}

/// Decrypt `ciphertext` and verify `tag` against `associated_data`.
///
/// # Errors
///
/// Returns [`CipherError::InvalidNonceLength`] / [`CipherError::InvalidTagLength`]
/// for structurally wrong inputs, and [`CipherError::AuthenticationFailure`] if
/// the tag does not verify (tampering, wrong key, or different associated data).
pub fn decrypt(
    algorithm: AeadAlgorithm,
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, CipherError> {
    check_lengths(key, nonce)?;
    if tag.len() != TAG_LEN {
        return Err(CipherError::InvalidTagLength(tag.len()));
    }
    let mut buffer = ciphertext.to_vec();
    match algorithm {
        AeadAlgorithm::Aes256Gcm => {
            open_in_place::<Aes256Gcm>(key, nonce, associated_data, &mut buffer, tag)?
        }
        AeadAlgorithm::Aes256GcmSiv => {
            open_in_place::<Aes256GcmSiv>(key, nonce, associated_data, &mut buffer, tag)?
        }
    }
    Ok(buffer)
}

fn check_lengths(key: &[u8], nonce: &[u8]) -> Result<(), CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength(key.len()));
    }
    if nonce.len() != NONCE_LEN {
        return Err(CipherError::InvalidNonceLength(nonce.len()));
    }
    Ok(())
}

fn seal_in_place<C: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    associated_data: &[u8],
    buffer: &mut Vec<u8>,
) -> Result<[u8; TAG_LEN], CipherError> {
    let cipher = C::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<C>::from_slice(nonce), associated_data, buffer)
        .map_err(|_| CipherError::AeadFailure)?;
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&tag);
    Ok(out)
}

fn open_in_place<C: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    associated_data: &[u8],
    buffer: &mut Vec<u8>,
    tag: &[u8],
) -> Result<(), CipherError> {
    let cipher = C::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
    cipher
        .decrypt_in_place_detached(
            Nonce::<C>::from_slice(nonce),
            associated_data,
            buffer,
            Tag::<C>::from_slice(tag),
        )
        .map_err(|_| CipherError::AuthenticationFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes_gcm::aead::{rand_core::RngCore, OsRng};

    fn random_key() -> Vec<u8> {
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }

    fn random_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }

    const BOTH: [AeadAlgorithm; 2] = [AeadAlgorithm::Aes256Gcm, AeadAlgorithm::Aes256GcmSiv];

    #[test]
    fn encrypt_decrypt_round_trip() {
        for alg in BOTH {
            let key = random_key();
            let nonce = random_nonce();
            let (ct, tag) = encrypt(alg, &key, &nonce, b"checkpoint shard", b"gs://b/o").unwrap();
            assert_eq!(ct.len(), b"checkpoint shard".len());
            let pt = decrypt(alg, &key, &nonce, &ct, &tag, b"gs://b/o").unwrap();
            assert_eq!(pt, b"checkpoint shard");
        }
    }

    #[test]
    fn empty_plaintext_round_trip() {
        let key = random_key();
        let nonce = random_nonce();
        let (ct, tag) = encrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"", b"gs://b/o").unwrap();
        assert!(ct.is_empty());
        let pt = decrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, &ct, &tag, b"gs://b/o").unwrap();
        assert!(pt.is_empty());
    }

    #[test]
    fn different_associated_data_fails_auth() {
        for alg in BOTH {
            let key = random_key();
            let nonce = random_nonce();
            let (ct, tag) = encrypt(alg, &key, &nonce, b"secret", b"gs://b/one").unwrap();
            let err = decrypt(alg, &key, &nonce, &ct, &tag, b"gs://b/two").unwrap_err();
            assert_eq!(err, CipherError::AuthenticationFailure);
        }
    }

    #[test]
    fn wrong_key_fails_auth() {
        let nonce = random_nonce();
        let (ct, tag) = encrypt(AeadAlgorithm::Aes256Gcm, &random_key(), &nonce, b"x", b"p").unwrap();
        let err = decrypt(AeadAlgorithm::Aes256Gcm, &random_key(), &nonce, &ct, &tag, b"p");
        assert_eq!(err.unwrap_err(), CipherError::AuthenticationFailure);
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let key = random_key();
        let nonce = random_nonce();
        let (mut ct, tag) = encrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"tamper me", b"p").unwrap();
        ct[0] ^= 0x01;
        let err = decrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, &ct, &tag, b"p");
        assert_eq!(err.unwrap_err(), CipherError::AuthenticationFailure);
    }

    #[test]
    fn tampered_tag_fails_auth() {
        let key = random_key();
        let nonce = random_nonce();
        let (ct, mut tag) = encrypt(AeadAlgorithm::Aes256GcmSiv, &key, &nonce, b"abc", b"p").unwrap();
        tag[TAG_LEN - 1] ^= 0x80;
        let err = decrypt(AeadAlgorithm::Aes256GcmSiv, &key, &nonce, &ct, &tag, b"p");
        assert_eq!(err.unwrap_err(), CipherError::AuthenticationFailure);
    }

    #[test]
    fn wrong_nonce_length_is_structural() {
        let key = random_key();
        let err = encrypt(AeadAlgorithm::Aes256Gcm, &key, &[0u8; 8], b"x", b"p").unwrap_err();
        assert_eq!(err, CipherError::InvalidNonceLength(8));
    }

    #[test]
    fn wrong_tag_length_is_structural() {
        let key = random_key();
        let nonce = random_nonce();
        let (ct, _) = encrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"x", b"p").unwrap();
        let err = decrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, &ct, &[0u8; 12], b"p");
        assert_eq!(err.unwrap_err(), CipherError::InvalidTagLength(12));
    }

    #[test]
    fn invalid_key_length_rejected() {
        let nonce = random_nonce();
        let err = encrypt(AeadAlgorithm::Aes256Gcm, &[0u8; 16], &nonce, b"x", b"p").unwrap_err();
        assert_eq!(err, CipherError::InvalidKeyLength(16));
    }

    #[test]
    fn algorithms_are_not_interchangeable() {
        let key = random_key();
        let nonce = random_nonce();
        let (ct, tag) = encrypt(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"x", b"p").unwrap();
        assert!(decrypt(AeadAlgorithm::Aes256GcmSiv, &key, &nonce, &ct, &tag, b"p").is_err());
    }

    #[test]
    fn algorithm_names_parse() {
        assert_eq!("aes-256-gcm".parse::<AeadAlgorithm>().unwrap(), AeadAlgorithm::Aes256Gcm);
        assert_eq!(
            "aes-256-gcm-siv".parse::<AeadAlgorithm>().unwrap(),
            AeadAlgorithm::Aes256GcmSiv
        );
        assert!("chacha20".parse::<AeadAlgorithm>().is_err());
        assert_eq!(AeadAlgorithm::default(), AeadAlgorithm::Aes256Gcm);
    }
}
