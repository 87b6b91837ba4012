//! Request deadline shared by every route.

use std::time::Duration;

/// Default per-request timeout applied to all routes.
///
/// Must cover every KMS attempt plus backoff for one request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
