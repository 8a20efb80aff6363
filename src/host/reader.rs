//! Reader abstraction: what a session needs from a card terminal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::TransportError;

/// An open channel to a card.
pub trait Channel: Send {
    /// Send a raw command envelope, return `data SW1 SW2`.
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// A card terminal.
pub trait Terminal: Send + 'static {
    type Channel: Channel + 'static;

    fn name(&self) -> &str;

    fn is_card_present(&self) -> Result<bool, TransportError>;

    /// Block for at most `timeout`; returns whether a card is present.
    fn wait_for_card_present(&self, timeout: Duration) -> Result<bool, TransportError>;

    /// Block for at most `timeout`; returns whether the reader is empty.
    fn wait_for_card_absent(&self, timeout: Duration) -> Result<bool, TransportError>;

    fn connect(&self) -> Result<Self::Channel, TransportError>;
}

/// Enumerates the terminals attached to the host.
pub trait ReaderProvider: Send + 'static {
    type Terminal: Terminal;

    fn readers(&self) -> Result<Vec<Self::Terminal>, TransportError>;
}

/// Cooperative cancellation flag checked between polls.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_shared_between_clones() {
        let signal = StopSignal::new();
        let other = signal.clone();
        assert!(!other.is_stopped());
        signal.stop();
        assert!(other.is_stopped());
    }
}
