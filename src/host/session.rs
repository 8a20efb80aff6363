use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Channel, ReaderProvider, SessionError, StopSignal, Terminal};
use crate::apdu::{Command, Response, WALLET_AID};
use crate::codec::{StatusWord, decode_balance};
use crate::config::SessionConfig;

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    /// The card left the reader; the channel has been released.
    Removed,
    /// Closed by the host.
    Disconnected,
}

/// Pick the terminal at `index`.
pub fn discover<P: ReaderProvider>(
    provider: &P,
    index: usize,
) -> Result<P::Terminal, SessionError> {
    let readers = provider.readers()?;
    debug!(count = readers.len(), "readers listed");

    let available = readers.len();
    let reader = readers
        .into_iter()
        .nth(index)
        .ok_or(SessionError::NoReaderFound { index, available })?;
    debug!(reader = reader.name(), "reader found");
    Ok(reader)
}

/// A connected session with the wallet applet on one card.
///
/// The session owns the channel exclusively; it is not meant to be shared
/// between call sites.
pub struct Session<T: Terminal> {
    terminal: T,
    channel: Option<T::Channel>,
    state: SessionState,
    poll_interval: Duration,
}

/// Public API
impl<T: Terminal> Session<T> {
    /// Connect to the card in `terminal` and select the wallet applet.
    ///
    /// With `config.wait_for_card` the reader is polled, one bounded wait at a
    /// time, until a card shows up or `stop` is raised. Returns `Ok(None)`
    /// when no card is present (and not waiting) or when stopped.
    pub fn connect(
        terminal: T,
        config: &SessionConfig,
        stop: &StopSignal,
    ) -> Result<Option<Self>, SessionError> {
        if config.wait_for_card {
            debug!(reader = terminal.name(), "waiting for card");
            loop {
                if stop.is_stopped() {
                    return Ok(None);
                }
                if terminal.wait_for_card_present(config.poll_interval)?
                    && terminal.is_card_present()?
                {
                    info!(reader = terminal.name(), "card inserted");
                    break;
                }
            }
        } else if !terminal.is_card_present()? {
            debug!(reader = terminal.name(), "card is not inserted");
            return Ok(None);
        }

        let channel = terminal.connect()?;
        let mut session = Session {
            terminal,
            channel: Some(channel),
            state: SessionState::Connected,
            poll_interval: config.poll_interval,
        };

        let response = session.exchange(&Command::select(WALLET_AID))?;
        if !response.is_success() {
            warn!(status = %response.status, "wallet applet not found on card");
            session.release(SessionState::Disconnected);
            return Err(SessionError::ServiceNotFound(response.status));
        }

        info!(reader = session.reader_name(), "wallet selected");
        Ok(Some(session))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn reader_name(&self) -> &str {
        self.terminal.name()
    }

    pub fn get_balance(&mut self) -> Result<i16, SessionError> {
        let data = self.expect_success("get_balance", &Command::get_balance(), 0)?;
        Ok(decode_balance(&data)?)
    }

    pub fn credit(&mut self, amount: i16) -> Result<(), SessionError> {
        self.expect_success("credit", &Command::credit(amount), amount)?;
        Ok(())
    }

    pub fn debit(&mut self, amount: i16) -> Result<(), SessionError> {
        self.expect_success("debit", &Command::debit(amount), amount)?;
        Ok(())
    }

    pub fn toggle_debug(&mut self) -> Result<(), SessionError> {
        self.expect_success("toggle_debug", &Command::toggle_debug(), 0)?;
        Ok(())
    }

    /// Whether the card is still in the reader.
    pub fn is_card_present(&self) -> Result<bool, SessionError> {
        if self.state != SessionState::Connected {
            return Ok(false);
        }
        Ok(self.terminal.is_card_present()?)
    }

    /// One non-blocking removal check; moves to `Removed` if the card is gone.
    pub fn poll_removal(&mut self) -> Result<bool, SessionError> {
        if self.state != SessionState::Connected {
            return Ok(self.state == SessionState::Removed);
        }
        if self.terminal.is_card_present()? {
            return Ok(false);
        }
        info!(reader = self.reader_name(), "card removed");
        self.release(SessionState::Removed);
        Ok(true)
    }

    /// Block until the card is removed or `stop` is raised.
    pub fn wait_for_removal(&mut self, stop: &StopSignal) -> Result<(), SessionError> {
        debug!(reader = self.reader_name(), "waiting for card removal");
        while self.state == SessionState::Connected && !stop.is_stopped() {
            self.terminal.wait_for_card_absent(self.poll_interval)?;
            self.poll_removal()?;
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.state == SessionState::Connected {
            debug!(reader = self.reader_name(), "disconnecting");
            self.release(SessionState::Disconnected);
        }
    }
}

/// Private API
impl<T: Terminal> Session<T> {
    fn release(&mut self, state: SessionState) {
        self.channel = None;
        self.state = state;
    }

    fn exchange(&mut self, command: &Command) -> Result<Response, SessionError> {
        let channel = self.channel.as_mut().ok_or(SessionError::Disconnected)?;
        let raw = channel.transmit(&command.to_bytes()?)?;
        Ok(Response::parse(&raw)?)
    }

    /// Exchange `command` and translate the status word into a domain error.
    fn expect_success(
        &mut self,
        operation: &'static str,
        command: &Command,
        amount: i16,
    ) -> Result<Vec<u8>, SessionError> {
        let response = self.exchange(command)?;
        match response.status {
            StatusWord::SUCCESS => Ok(response.data),
            StatusWord::NEGATIVE_BALANCE => Err(SessionError::NegativeBalance(amount)),
            StatusWord::INVALID_AMOUNT => Err(SessionError::InvalidAmount(amount)),
            status => Err(SessionError::UnexpectedStatus { operation, status }),
        }
    }
}

impl<T: Terminal> Drop for Session<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
