//! Relay configuration

use std::time::Duration;

/// Slow-consumer policy for the viewer fan-out
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Packets buffered per viewer before it counts as too slow
    ///
    /// At 30fps video plus audio, 256 packets is roughly four seconds.
    pub viewer_queue_capacity: usize,

    /// Deadline for writing a single packet to a viewer socket
    pub write_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            viewer_queue_capacity: 256,
            write_timeout: Duration::from_millis(250),
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn viewer_queue_capacity(mut self, capacity: usize) -> Self {
        self.viewer_queue_capacity = capacity.max(1);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}
