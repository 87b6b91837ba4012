//! Error and protocol types shared by the sealing service and its clients.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
