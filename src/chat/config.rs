//! Chat room limits

/// Chat room configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Longest accepted message, in characters
    pub max_message_length: usize,

    /// Events buffered per client before it is treated as dead
    pub client_queue_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 400,
            client_queue_capacity: 64,
        }
    }
}

impl ChatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_message_length(mut self, max: usize) -> Self {
        self.max_message_length = max.max(1);
        self
    }

    pub fn client_queue_capacity(mut self, capacity: usize) -> Self {
        self.client_queue_capacity = capacity.max(1);
        self
    }
}
