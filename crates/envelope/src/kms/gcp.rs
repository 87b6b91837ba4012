//! Google Cloud KMS key wrapping over the REST API.
//!
//! ```text
//! POST {endpoint}/v1/{key}:encrypt   {"plaintext": b64}  -> {"ciphertext": b64}
//! POST {endpoint}/v1/{key}:decrypt   {"ciphertext": b64} -> {"plaintext": b64}
//! ```
//!
//! Requests carry an OAuth2 bearer token from ambient credentials: either a
//! token supplied by the deployment, or the GCE/GKE metadata server.
//!
//! The base64 DEK strings this module builds and parses are held in
//! [`Zeroizing`] buffers. The request body reqwest serializes for `:encrypt`
//! and the response body it buffers for `:decrypt` are not: those copies of
//! the DEK live in reqwest/hyper allocations and are freed without being
//! cleared.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

use super::{wrapped_from_response, KeyWrapper, KmsError, MasterKeyHandle, WrappedDek};

/// Default Cloud KMS endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://cloudkms.googleapis.com";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh cached metadata tokens this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Where bearer tokens come from.
#[derive(Clone)]
pub enum GcpCredentials {
    /// A fixed access token, e.g. from `gcloud auth print-access-token`.
    AccessToken(String),
    /// The instance metadata server's default service account.
    MetadataServer,
}

impl std::fmt::Debug for GcpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GcpCredentials::AccessToken(_) => f.write_str("AccessToken([REDACTED])"),
            GcpCredentials::MetadataServer => f.write_str("MetadataServer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Encrypt,
    Decrypt,
}

impl Op {
    fn verb(self) -> &'static str {
        match self {
            Op::Encrypt => "encrypt",
            Op::Decrypt => "decrypt",
        }
    }
}

#[derive(Serialize)]
struct EncryptRequest<'a> {
    plaintext: &'a str,
}

#[derive(Deserialize)]
struct EncryptResponse {
    ciphertext: String,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    ciphertext: &'a str,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Cloud KMS [`KeyWrapper`].
#[derive(Clone)]
pub struct GcpKmsWrapper {
    http: reqwest::Client,
    endpoint: Arc<str>,
    credentials: GcpCredentials,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl GcpKmsWrapper {
    /// Create a wrapper talking to `endpoint` (normally [`DEFAULT_ENDPOINT`]).
    pub fn new(http: reqwest::Client, endpoint: &str, credentials: GcpCredentials) -> Self {
        Self {
            http,
            endpoint: Arc::from(endpoint.trim_end_matches('/')),
            credentials,
            token: Arc::new(Mutex::new(None)),
        }
    }

    fn url(&self, key: &MasterKeyHandle, op: Op) -> String {
        format!("{}/v1/{}:{}", self.endpoint, key.resource(), op.verb())
    }

    async fn bearer_token(&self) -> Result<String, KmsError> {
        match &self.credentials {
            GcpCredentials::AccessToken(token) => Ok(token.clone()),
            GcpCredentials::MetadataServer => {
                let mut cached = self.token.lock().await;
                if let Some(token) = cached.as_ref() {
                    if Instant::now() < token.refresh_at {
                        return Ok(token.value.clone());
                    }
                }
                let fresh = self.fetch_metadata_token().await?;
                let value = fresh.access_token.clone();
                let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
                *cached = Some(CachedToken {
                    value: fresh.access_token,
                    refresh_at: Instant::now() + lifetime,
                });
                Ok(value)
            }
        }
    }

    async fn fetch_metadata_token(&self) -> Result<MetadataToken, KmsError> {
        let resp = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| KmsError::Unavailable(format!("metadata server unreachable: {e}")))?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(match status {
                404 | 403 => KmsError::AccessDenied(format!(
                    "metadata server has no service account token (HTTP {status})"
                )),
                _ => KmsError::Unavailable(format!("metadata server returned HTTP {status}")),
            });
        }
        resp.json::<MetadataToken>()
            .await
            .map_err(|e| KmsError::Unavailable(format!("unreadable metadata token: {e}")))
    }

    async fn call<Req: Serialize + ?Sized, Resp: serde::de::DeserializeOwned>(
        &self,
        key: &MasterKeyHandle,
        op: Op,
        body: &Req,
    ) -> Result<Resp, KmsError> {
        let token = self.bearer_token().await?;
        let resp = self
            .http
            .post(self.url(key, op))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| KmsError::Unavailable(format!("{} on {key}: {e}", op.verb())))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(classify_status(op, status, key, &detail));
        }
        resp.json::<Resp>()
            .await
            .map_err(|e| KmsError::Unavailable(format!("unreadable {} response: {e}", op.verb())))
    }
}

impl std::fmt::Debug for GcpKmsWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpKmsWrapper")
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials)
            .finish()
    }
}

#[async_trait]
impl KeyWrapper for GcpKmsWrapper {
    async fn wrap(&self, master_key: &MasterKeyHandle, dek: &[u8]) -> Result<WrappedDek, KmsError> {
        // reqwest keeps its own unzeroized copy of the serialized body.
        let plaintext = Zeroizing::new(STANDARD.encode(dek));
        let resp: EncryptResponse = self
            .call(master_key, Op::Encrypt, &EncryptRequest { plaintext: &plaintext })
            .await?;
        let blob = STANDARD
            .decode(resp.ciphertext.as_bytes())
            .map_err(|e| KmsError::Unavailable(format!("undecodable encrypt response: {e}")))?;
        debug!(key = %master_key, wrapped_len = blob.len(), "DEK wrapped");
        wrapped_from_response(blob)
    }

    async fn unwrap(
        &self,
        master_key: &MasterKeyHandle,
        wrapped: &WrappedDek,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let ciphertext = STANDARD.encode(wrapped.as_bytes());
        let resp: DecryptResponse = self
            .call(master_key, Op::Decrypt, &DecryptRequest { ciphertext: &ciphertext })
            .await?;
        let encoded = Zeroizing::new(resp.plaintext);
        STANDARD
            .decode(encoded.as_bytes())
            .map(Zeroizing::new)
            .map_err(|e| KmsError::Unavailable(format!("undecodable decrypt response: {e}")))
    }
}

/// Map a non-2xx Cloud KMS status onto the KMS error taxonomy.
fn classify_status(op: Op, status: u16, key: &MasterKeyHandle, body: &str) -> KmsError {
    let detail = format!("{} on {key}: HTTP {status}", op.verb());
    match status {
        401 | 403 => KmsError::AccessDenied(detail),
        404 => KmsError::KeyNotFound(detail),
        // Disabled or destroyed key versions surface as FAILED_PRECONDITION.
        400 if body.contains("FAILED_PRECONDITION") => KmsError::AccessDenied(detail),
        400 => match op {
            Op::Decrypt => KmsError::Integrity(detail),
            Op::Encrypt => KmsError::KeyNotFound(detail),
        },
        408 | 429 => KmsError::Unavailable(detail),
        s if s >= 500 => KmsError::Unavailable(detail),
        _ => KmsError::AccessDenied(detail),
    }
}
