//! Axum HTTP server, routing, and middleware.
//!
//! # Responsibilities
//! - Define the Axum router with the seal/open/health routes and shared middleware.
//! - Inject shared application state (`AppState`) into handlers.
//! - Translate envelope errors into HTTP statuses for the intercepting proxy.

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
