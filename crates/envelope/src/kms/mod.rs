//! Key wrapping via a remote Key Management Service.
//!
//! A [`KeyWrapper`] encrypts ("wraps") and decrypts ("unwraps") DEKs under a
//! KMS-resident master key named by a [`MasterKeyHandle`]. The master key
//! never leaves the KMS; only wrapped DEKs are persisted.
//!
//! Backends:
//! - [`GcpKmsWrapper`]: Google Cloud KMS (`gcp-kms://projects/...`).
//! - [`AwsKmsWrapper`]: AWS KMS (`aws-kms://arn:aws:kms:...`).
//! - [`LocalKmsWrapper`]: in-process master keys (`local-kms://name`).
//!
//! [`KmsClients`] bundles the configured backends and dispatches by scheme.
//! Every call is a network round trip (or its local equivalent); unwrapped
//! DEKs are never cached across calls.

pub mod aws;
pub mod clients;
pub mod gcp;
pub mod local;

pub use aws::AwsKmsWrapper;
pub use clients::KmsClients;
pub use gcp::{GcpCredentials, GcpKmsWrapper};
pub use local::LocalKmsWrapper;

use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

/// Upper bound on a wrapped DEK. Real KMS ciphertexts for a 32-byte key are a
/// few hundred bytes at most.
pub const MAX_WRAPPED_DEK_LEN: usize = 8 * 1024;

/// Errors returned by a [`KeyWrapper`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KmsError {
    /// Transport failure, timeout, throttling or a KMS-side internal error.
    #[error("KMS unavailable: {0}")]
    Unavailable(String),

    /// The caller is not authorised to use the key, or the key is disabled.
    #[error("KMS access denied: {0}")]
    AccessDenied(String),

    /// The handle does not name an existing key.
    #[error("KMS key not found: {0}")]
    KeyNotFound(String),

    /// The KMS reports the wrapped blob is invalid for this key.
    #[error("KMS integrity error: {0}")]
    Integrity(String),
}

impl KmsError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, KmsError::Unavailable(_))
    }
}

/// Key management scheme named by a [`MasterKeyHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KmsScheme {
    Gcp,
    Aws,
    Local,
}

impl KmsScheme {
    pub fn prefix(self) -> &'static str {
        match self {
            KmsScheme::Gcp => "gcp-kms",
            KmsScheme::Aws => "aws-kms",
            KmsScheme::Local => "local-kms",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "gcp-kms" => Some(KmsScheme::Gcp),
            "aws-kms" => Some(KmsScheme::Aws),
            "local-kms" => Some(KmsScheme::Local),
            _ => None,
        }
    }
}

/// Errors from parsing a [`MasterKeyHandle`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("master key handle must not be empty")]
    Empty,

    #[error("unsupported KMS scheme {0:?}; expected gcp-kms, aws-kms or local-kms")]
    UnknownScheme(String),

    #[error("master key handle {0:?} has no key resource after the scheme")]
    MissingResource(String),
}

/// URI naming a KMS master key, e.g.
/// `gcp-kms://projects/p/locations/global/keyRings/r/cryptoKeys/k`.
///
/// Immutable and supplied by configuration. A bare resource name without a
/// scheme is taken to be a Cloud KMS key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MasterKeyHandle {
    uri: String,
    scheme: KmsScheme,
    resource_start: usize,
}

impl MasterKeyHandle {
    /// Parse and validate a handle.
    ///
    /// # Errors
    ///
    /// Returns a [`HandleError`] if the string is empty, names an unknown
    /// scheme, or has nothing after `scheme://`.
    pub fn parse(s: &str) -> Result<Self, HandleError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(HandleError::Empty);
        }
        let (scheme, resource) = match s.split_once("://") {
            Some((prefix, resource)) => {
                let scheme = KmsScheme::from_prefix(prefix)
                    .ok_or_else(|| HandleError::UnknownScheme(prefix.to_owned()))?;
                (scheme, resource)
            }
            None => (KmsScheme::Gcp, s),
        };
        if resource.is_empty() {
            return Err(HandleError::MissingResource(s.to_owned()));
        }
        let uri = format!("{}://{}", scheme.prefix(), resource);
        Ok(Self {
            resource_start: scheme.prefix().len() + 3,
            uri,
            scheme,
        })
    }

    pub fn scheme(&self) -> KmsScheme {
        self.scheme
    }

    /// The key resource without the scheme, as the KMS API expects it.
    pub fn resource(&self) -> &str {
        &self.uri[self.resource_start..]
    }

    pub fn as_str(&self) -> &str {
        &self.uri
    }
}

impl std::fmt::Display for MasterKeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri)
    }
}

impl std::str::FromStr for MasterKeyHandle {
    type Err = HandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Errors from constructing a [`WrappedDek`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WrappedDekError {
    #[error("wrapped key must not be empty")]
    Empty,

    #[error("wrapped key of {0} bytes exceeds the {MAX_WRAPPED_DEK_LEN}-byte limit")]
    TooLong(usize),
}

/// A DEK encrypted under a master key. Safe to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedDek(Vec<u8>);

impl WrappedDek {
    /// # Errors
    ///
    /// Returns [`WrappedDekError`] if `bytes` is empty or longer than
    /// [`MAX_WRAPPED_DEK_LEN`].
    pub fn new(bytes: Vec<u8>) -> Result<Self, WrappedDekError> {
        if bytes.is_empty() {
            return Err(WrappedDekError::Empty);
        }
        if bytes.len() > MAX_WRAPPED_DEK_LEN {
            return Err(WrappedDekError::TooLong(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Wraps and unwraps DEKs under a master key.
///
/// Implementations must be safe to share across worker tasks; wrap and unwrap
/// are idempotent, so [`KmsError::Unavailable`] may be retried by the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyWrapper: Send + Sync {
    /// Encrypt `dek` under `master_key`.
    async fn wrap(&self, master_key: &MasterKeyHandle, dek: &[u8]) -> Result<WrappedDek, KmsError>;

    /// Decrypt `wrapped` under `master_key`.
    ///
    /// The returned key material is zeroized on drop.
    async fn unwrap(
        &self,
        master_key: &MasterKeyHandle,
        wrapped: &WrappedDek,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError>;
}

/// Convert a KMS response body into a [`WrappedDek`], treating an unusable
/// blob as an unavailable response rather than a security failure.
pub(crate) fn wrapped_from_response(bytes: Vec<u8>) -> Result<WrappedDek, KmsError> {
    WrappedDek::new(bytes).map_err(|e| KmsError::Unavailable(format!("unusable wrap response: {e}")))
}
