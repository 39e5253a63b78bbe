use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Option<Duration>,
    pub backoff_multiplier: u32,
}

impl RetryConfig {
    pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;

    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: None,
            backoff_multiplier: Self::DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after a failure that was preceded by `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let grown = current
            .checked_mul(self.backoff_multiplier)
            .unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(cap) => grown.min(cap),
            None => grown,
        }
    }
}
