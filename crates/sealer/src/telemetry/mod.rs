//! Structured logging and optional OpenTelemetry span export.
//!
//! # Telemetry invariants
//!
//! - **No plaintext, DEK or master key material** may appear in any span
//!   attribute or log field. Object paths, key handles and error kinds may.
//! - Log level is configurable via `RUST_LOG`, falling back to `LOG_LEVEL`
//!   (default: `info`).

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
