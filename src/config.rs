//! Client tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts applied to device exchanges.
///
/// Serde-derived so callers that persist settings can embed it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Deadline for a single command/response exchange.
    pub request_timeout: Duration,
    /// Deadline for the complete multi-fragment log transfer.
    pub log_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            log_timeout: Duration::from_secs(10),
        }
    }
}
