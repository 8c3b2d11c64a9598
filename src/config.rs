//! Session tunables.

use std::time::Duration;

/// Configuration snapshotted at session start.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Size of the port-prediction window. The predicted set is
    /// `{anchor, anchor+1, ..., anchor+N-1}`.
    pub port_predictions: u16,
    /// Punch attempts (burst + listen) per ConnectTo.
    pub max_punch_attempts: u32,
    /// Sleep between punch attempts. Zero means back-to-back bursts.
    pub retry_delay: Duration,
    /// Connector's inbound wait budget, both per punch attempt and per
    /// outer-loop receive.
    pub max_response_wait: Duration,
    /// Connector's bound on outer-loop iterations spent waiting for the
    /// server's introduction.
    pub max_server_response_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_predictions: 8,
            max_punch_attempts: 8,
            retry_delay: Duration::from_millis(1000),
            max_response_wait: Duration::from_millis(5000),
            max_server_response_attempts: 20,
        }
    }
}
