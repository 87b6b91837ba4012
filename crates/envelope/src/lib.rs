//! Path-bound envelope encryption for object payloads.
//!
//! Every sealed object carries its own freshly generated Data Encryption Key
//! (DEK), wrapped by a KMS-resident master key. The payload is encrypted with
//! an AEAD cipher whose associated data is the object's full storage path, so
//! an envelope copied to a different path fails authentication on open.
//!
//! # Layers
//!
//! - [`kms`]: the [`KeyWrapper`] seam and its Cloud KMS, AWS KMS and local
//!   backends.
//! - [`cipher`]: detached-tag AEAD encryption (AES-256-GCM / AES-256-GCM-SIV).
//! - [`binding`]: canonical associated data derived from an object path.
//! - [`format`]: the at-rest envelope layout.
//! - [`codec`]: [`EnvelopeCodec`], which composes the above into seal/open.
//!
//! # Security invariants
//!
//! - A plaintext DEK lives only for the duration of one seal/open call and is
//!   zeroized on drop, including on error and timeout paths.
//! - The path used for binding is always the caller's; envelopes carry none.
//! - Structurally invalid envelopes are rejected before any KMS round trip.

pub mod binding;
pub mod cipher;
pub mod codec;
pub mod dek;
pub mod error;
pub mod format;
pub mod kms;

pub use binding::AssociatedData;
pub use cipher::AeadAlgorithm;
pub use codec::{CodecOptions, EnvelopeCodec};
pub use error::{EnvelopeError, ErrorKind, IntegrityFailure};
pub use format::Envelope;
pub use kms::{KeyWrapper, KmsClients, KmsError, MasterKeyHandle, WrappedDek};
