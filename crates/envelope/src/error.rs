//! Error taxonomy of the encryption core.
//!
//! The core never recovers from any of these; every failure is returned to the
//! caller as a typed [`EnvelopeError`]. [`ErrorKind`] gives the stable name used
//! in log fields and by the service layer to pick a status code.

use thiserror::Error;

use crate::cipher::CipherError;
use crate::kms::KmsError;

/// Why an integrity check failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityFailure {
    /// The AEAD tag did not verify against the supplied associated data.
    ///
    /// Covers payload tampering, a path-binding mismatch, and a wrong DEK.
    #[error("payload authentication failed")]
    AuthenticationFailure,

    /// The KMS refused to unwrap the DEK, or returned unusable key material.
    #[error("wrapped key rejected: {0}")]
    KmsIntegrity(String),
}

/// Errors produced by seal and open.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// KMS transport failure or timeout. Safe to retry.
    #[error("KMS unavailable: {0}")]
    KmsUnavailable(String),

    /// The caller's credentials may not use the master key.
    #[error("KMS access denied: {0}")]
    KmsAccessDenied(String),

    /// The master key handle does not name a usable key.
    #[error("KMS key not found: {0}")]
    KmsKeyNotFound(String),

    /// Tampering, path mismatch, or wrong master key.
    #[error("envelope integrity check failed: {0}")]
    Integrity(#[source] IntegrityFailure),

    /// The envelope bytes do not have the expected structure.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The object path cannot be used as associated data.
    #[error("invalid object identity: {0}")]
    InvalidObjectIdentity(String),

    /// Unexpected failure inside the cipher layer.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable, machine-readable classification of an [`EnvelopeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    KmsUnavailable,
    KmsAccessDenied,
    KmsKeyNotFound,
    KmsIntegrity,
    AuthenticationFailure,
    MalformedEnvelope,
    InvalidObjectIdentity,
    Internal,
}

impl ErrorKind {
    /// Snake-case name used in structured log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::KmsUnavailable => "kms_unavailable",
            ErrorKind::KmsAccessDenied => "kms_access_denied",
            ErrorKind::KmsKeyNotFound => "kms_key_not_found",
            ErrorKind::KmsIntegrity => "kms_integrity",
            ErrorKind::AuthenticationFailure => "authentication_failure",
            ErrorKind::MalformedEnvelope => "malformed_envelope",
            ErrorKind::InvalidObjectIdentity => "invalid_object_identity",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EnvelopeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnvelopeError::KmsUnavailable(_) => ErrorKind::KmsUnavailable,
            EnvelopeError::KmsAccessDenied(_) => ErrorKind::KmsAccessDenied,
            EnvelopeError::KmsKeyNotFound(_) => ErrorKind::KmsKeyNotFound,
            EnvelopeError::Integrity(IntegrityFailure::KmsIntegrity(_)) => ErrorKind::KmsIntegrity,
            EnvelopeError::Integrity(IntegrityFailure::AuthenticationFailure) => {
                ErrorKind::AuthenticationFailure
            }
            EnvelopeError::MalformedEnvelope(_) => ErrorKind::MalformedEnvelope,
            EnvelopeError::InvalidObjectIdentity(_) => ErrorKind::InvalidObjectIdentity,
            EnvelopeError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only transient KMS failures may be retried; everything else is
    /// deterministic for the same inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EnvelopeError::KmsUnavailable(_))
    }

    /// Returns `true` for failures that indicate tampering, a path-binding
    /// mismatch, or a wrong key.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, EnvelopeError::Integrity(_))
    }
}

impl From<KmsError> for EnvelopeError {
    fn from(e: KmsError) -> Self {
        match e {
            KmsError::Unavailable(m) => EnvelopeError::KmsUnavailable(m),
            KmsError::AccessDenied(m) => EnvelopeError::KmsAccessDenied(m),
            KmsError::KeyNotFound(m) => EnvelopeError::KmsKeyNotFound(m),
            KmsError::Integrity(m) => EnvelopeError::Integrity(IntegrityFailure::KmsIntegrity(m)),
        }
    }
}

impl From<CipherError> for EnvelopeError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::AuthenticationFailure => {
                EnvelopeError::Integrity(IntegrityFailure::AuthenticationFailure)
            }
            CipherError::InvalidNonceLength(_) | CipherError::InvalidTagLength(_) => {
                EnvelopeError::MalformedEnvelope(e.to_string())
            }
            CipherError::InvalidKeyLength(_)
            | CipherError::AeadFailure
            | CipherError::UnknownAlgorithm(_) => {
                EnvelopeError::Internal(e.to_string())
            }
        }
    }
}
