//! AWS KMS key wrapping (`aws-kms://<key id or ARN>`).

use async_trait::async_trait;
use aws_sdk_kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kms::primitives::Blob;
use tracing::debug;
use zeroize::Zeroizing;

use super::{wrapped_from_response, KeyWrapper, KmsError, MasterKeyHandle, WrappedDek};

/// Wraps DEKs with the AWS KMS `Encrypt` / `Decrypt` APIs.
///
/// Credentials and region come from the ambient AWS configuration used to
/// build the client.
#[derive(Clone, Debug)]
pub struct AwsKmsWrapper {
    client: aws_sdk_kms::Client,
}

impl AwsKmsWrapper {
    pub fn new(client: aws_sdk_kms::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyWrapper for AwsKmsWrapper {
    async fn wrap(&self, master_key: &MasterKeyHandle, dek: &[u8]) -> Result<WrappedDek, KmsError> {
        let resp = self
            .client
            .encrypt()
            .key_id(master_key.resource())
            .plaintext(Blob::new(dek))
            .send()
            .await
            .map_err(|e| classify_sdk_error("Encrypt", master_key, e))?;

        let blob = resp
            .ciphertext_blob()
            .ok_or_else(|| KmsError::Unavailable("KMS Encrypt response contained no ciphertext".into()))?;
        debug!(key = %master_key, wrapped_len = blob.as_ref().len(), "DEK wrapped");
        wrapped_from_response(blob.as_ref().to_vec())
    }

    async fn unwrap(
        &self,
        master_key: &MasterKeyHandle,
        wrapped: &WrappedDek,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let resp = self
            .client
            .decrypt()
            .key_id(master_key.resource())
            .ciphertext_blob(Blob::new(wrapped.as_bytes()))
            .send()
            .await
            .map_err(|e| classify_sdk_error("Decrypt", master_key, e))?;

        let plaintext = resp
            .plaintext()
            .ok_or_else(|| KmsError::Unavailable("KMS Decrypt response contained no plaintext".into()))?;
        Ok(Zeroizing::new(plaintext.as_ref().to_vec()))
    }
}

fn classify_sdk_error<E, R>(op: &str, key: &MasterKeyHandle, err: SdkError<E, R>) -> KmsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            KmsError::Unavailable(format!("{op} on {key}: {}", DisplayErrorContext(&err)))
        }
        SdkError::ServiceError(service) => {
            let detail = format!("{op} on {key}: {}", DisplayErrorContext(&err));
            classify_code(service.err().code(), detail)
        }
        _ => KmsError::AccessDenied(format!("{op} on {key}: {}", DisplayErrorContext(&err))),
    }
}

/// Map an AWS KMS error code onto the KMS error taxonomy.
///
/// Unknown codes are treated as non-retryable.
fn classify_code(code: Option<&str>, detail: String) -> KmsError {
    match code {
        Some("InvalidCiphertextException") | Some("IncorrectKeyException") => {
            KmsError::Integrity(detail)
        }
        Some("NotFoundException") | Some("InvalidArnException") => KmsError::KeyNotFound(detail),
        Some("AccessDeniedException")
        | Some("DisabledException")
        | Some("KMSInvalidStateException")
        | Some("InvalidKeyUsageException")
        | Some("UnrecognizedClientException") => KmsError::AccessDenied(detail),
        Some("DependencyTimeoutException")
        | Some("KMSInternalException")
        | Some("ThrottlingException")
        | Some("LimitExceededException")
        | None => KmsError::Unavailable(detail),
        Some(_) => KmsError::AccessDenied(detail),
    }
}
