//! Associated data derived from an object's storage path.
//!
//! Writer and reader derive the binding independently from the path they
//! already hold, so the core needs no lookup and no state. The path's UTF-8
//! bytes are used verbatim: no trimming, case folding, Unicode normalisation
//! or slash collapsing. `gs://b/a/` and `gs://b/a` are different identities.

use crate::error::EnvelopeError;

/// Canonical associated-data bytes for one object identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssociatedData(Vec<u8>);

impl AssociatedData {
    /// Derive the associated data for `object_path` (e.g. `gs://bucket/key`).
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidObjectIdentity`] if the path is empty.
    pub fn derive(object_path: &str) -> Result<Self, EnvelopeError> {
        if object_path.is_empty() {
            return Err(EnvelopeError::InvalidObjectIdentity(
                "object path must not be empty".into(),
            ));
        }
        Ok(Self(object_path.as_bytes().to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
