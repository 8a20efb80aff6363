use std::time::Duration;

/// How a host session finds and watches its card.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Index into the reader list.
    pub reader_index: usize,
    /// Upper bound of a single presence/absence wait.
    pub poll_interval: Duration,
    /// Block until a card is inserted instead of giving up on an empty reader.
    pub wait_for_card: bool,
}

impl SessionConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

    pub fn with_reader_index(mut self, index: usize) -> Self {
        self.reader_index = index;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_wait_for_card(mut self, wait: bool) -> Self {
        self.wait_for_card = wait;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reader_index: 0,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            wait_for_card: true,
        }
    }
}
