//! Bundle of configured KMS backends, dispatched by handle scheme.

use async_trait::async_trait;
use zeroize::Zeroizing;

use super::{
    AwsKmsWrapper, GcpKmsWrapper, KeyWrapper, KmsError, KmsScheme, LocalKmsWrapper,
    MasterKeyHandle, WrappedDek,
};

/// The process-wide KMS capability.
///
/// Built once at startup with whichever backends the deployment uses, then
/// shared read-only by every worker. Cloning is cheap: each backend is
/// already `Arc`-backed.
#[derive(Clone, Debug, Default)]
pub struct KmsClients {
    gcp: Option<GcpKmsWrapper>,
    aws: Option<AwsKmsWrapper>,
    local: Option<LocalKmsWrapper>,
}

impl KmsClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gcp(mut self, gcp: GcpKmsWrapper) -> Self {
        self.gcp = Some(gcp);
        self
    }

    pub fn with_aws(mut self, aws: AwsKmsWrapper) -> Self {
        self.aws = Some(aws);
        self
    }

    pub fn with_local(mut self, local: LocalKmsWrapper) -> Self {
        self.local = Some(local);
        self
    }

    /// Returns `true` if a backend for `scheme` is configured.
    pub fn supports(&self, scheme: KmsScheme) -> bool {
        match scheme {
            KmsScheme::Gcp => self.gcp.is_some(),
            KmsScheme::Aws => self.aws.is_some(),
            KmsScheme::Local => self.local.is_some(),
        }
    }

    fn backend(&self, handle: &MasterKeyHandle) -> Result<&dyn KeyWrapper, KmsError> {
        let backend: Option<&dyn KeyWrapper> = match handle.scheme() {
            KmsScheme::Gcp => self.gcp.as_ref().map(|b| b as &dyn KeyWrapper),
            KmsScheme::Aws => self.aws.as_ref().map(|b| b as &dyn KeyWrapper),
            KmsScheme::Local => self.local.as_ref().map(|b| b as &dyn KeyWrapper),
        };
        backend.ok_or_else(|| {
            KmsError::KeyNotFound(format!(
                "no {} backend configured for {handle}",
                handle.scheme().prefix()
            ))
        })
    }
}

#[async_trait]
impl KeyWrapper for KmsClients {
    async fn wrap(&self, master_key: &MasterKeyHandle, dek: &[u8]) -> Result<WrappedDek, KmsError> {
        self.backend(master_key)?.wrap(master_key, dek).await
    }

    async fn unwrap(
        &self,
        master_key: &MasterKeyHandle,
        wrapped: &WrappedDek,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        self.backend(master_key)?.unwrap(master_key, wrapped).await
    }
}
