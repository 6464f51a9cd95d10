//! Batcher configuration options

use std::time::Duration;

/// Configuration for the request batcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatcherConfig {
    /// How long a batch stays open for joiners after its first request
    pub batch_delay: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_delay: Duration::from_millis(50),
        }
    }
}

impl BatcherConfig {
    /// Set the coalescing window
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }
}
