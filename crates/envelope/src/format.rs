//! At-rest envelope layout.
//!
//! ```text
//! +----------------+-------------+-----------+------------+-----------+
//! | u32 BE length  | wrapped DEK | nonce(12) | ciphertext |  tag(16)  |
//! +----------------+-------------+-----------+------------+-----------+
//! ```
//!
//! The envelope deliberately contains no object path. Readers bind the path
//! they requested, so an envelope cannot claim a different identity.

use bytes::{Buf, BufMut};

use crate::cipher::{NONCE_LEN, TAG_LEN};
use crate::error::EnvelopeError;
use crate::kms::{WrappedDek, MAX_WRAPPED_DEK_LEN};

/// Byte length of the wrapped-DEK length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest number of bytes an envelope adds to its plaintext.
///
/// A reader must accept envelopes this much larger than the biggest
/// plaintext a writer accepts.
pub const MAX_ENVELOPE_OVERHEAD: usize =
    LENGTH_PREFIX_LEN + MAX_WRAPPED_DEK_LEN + NONCE_LEN + TAG_LEN;

/// A parsed envelope: everything needed to open an object except the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub wrapped_dek: WrappedDek,
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl Envelope {
    /// Total serialised length.
    pub fn encoded_len(&self) -> usize {
        LENGTH_PREFIX_LEN + self.wrapped_dek.len() + NONCE_LEN + self.ciphertext.len() + TAG_LEN
    }

    /// Serialise to the at-rest byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        // WrappedDek construction caps the length well below u32::MAX.
        out.put_u32(self.wrapped_dek.len() as u32);
        out.put_slice(self.wrapped_dek.as_bytes());
        out.put_slice(&self.nonce);
        out.put_slice(&self.ciphertext);
        out.put_slice(&self.tag);
        out
    }

    /// Parse the at-rest byte layout.
    ///
    /// Purely structural: no cryptographic operation or KMS call is made.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::MalformedEnvelope`] if the length prefix is
    /// truncated, declares an empty or overrunning wrapped DEK, or if too few
    /// bytes remain for the nonce and tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let mut buf = bytes;
        if buf.remaining() < LENGTH_PREFIX_LEN {
            return Err(malformed(format!(
                "truncated length prefix: {} bytes",
                buf.remaining()
            )));
        }
        let wrapped_len = buf.get_u32() as usize;
        if wrapped_len == 0 {
            return Err(malformed("wrapped key length is zero".into()));
        }
        if wrapped_len > buf.remaining() {
            return Err(malformed(format!(
                "wrapped key length {wrapped_len} overruns buffer of {} bytes",
                buf.remaining()
            )));
        }
        let wrapped_dek = WrappedDek::new(buf[..wrapped_len].to_vec())
            .map_err(|e| malformed(e.to_string()))?;
        buf.advance(wrapped_len);

        if buf.remaining() < NONCE_LEN + TAG_LEN {
            return Err(malformed(format!(
                "{} bytes remain after wrapped key; nonce and tag need {}",
                buf.remaining(),
                NONCE_LEN + TAG_LEN
            )));
        }
        let mut nonce = [0u8; NONCE_LEN];
        buf.copy_to_slice(&mut nonce);

        let ciphertext_len = buf.remaining() - TAG_LEN;
        let ciphertext = buf[..ciphertext_len].to_vec();
        buf.advance(ciphertext_len);

        let mut tag = [0u8; TAG_LEN];
        buf.copy_to_slice(&mut tag);

        Ok(Self {
            wrapped_dek,
            nonce,
            ciphertext,
            tag,
        })
    }
}

fn malformed(reason: String) -> EnvelopeError {
    EnvelopeError::MalformedEnvelope(reason)
}
