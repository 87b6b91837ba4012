//! Pre-flight verification of every mapped master key.

use anyhow::{Context, Result};
use envelope::{EnvelopeCodec, MasterKeyHandle};
use tracing::info;

/// Object path the probe envelopes are bound to.
pub const PROBE_PATH: &str = "gs://sealer-startup-check/probe";

const PROBE_PAYLOAD: &[u8] = b"sealer startup key check";

/// Seal and reopen a probe payload under each key.
///
/// # Errors
///
/// Fails on the first key that cannot complete the round trip, naming it.
pub async fn verify_keys(codec: &EnvelopeCodec, keys: &[&MasterKeyHandle]) -> Result<()> {
    for key in keys {
        let sealed = codec
            .seal_to_bytes(key, PROBE_PATH, PROBE_PAYLOAD)
            .await
            .with_context(|| format!("master key {key} failed to seal the startup probe"))?;
        let opened = codec
            .open(key, PROBE_PATH, &sealed)
            .await
            .with_context(|| format!("master key {key} failed to open the startup probe"))?;
        if opened != PROBE_PAYLOAD {
            anyhow::bail!("master key {key} returned a different startup probe payload");
        }
        info!(key = %key, "master key verified");
    }
    Ok(())
}
