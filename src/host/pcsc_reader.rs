//! PC/SC reader backend.

use std::ffi::CString;
use std::time::Duration;

use pcsc::{Card, Context, Error, MAX_BUFFER_SIZE, Protocols, ReaderState, Scope, ShareMode, State};
use tracing::debug;

use super::{Channel, ReaderProvider, Terminal, TransportError};

/// Readers known to the PC/SC resource manager.
pub struct PcscReaders {
    ctx: Context,
}

impl PcscReaders {
    pub fn establish() -> Result<Self, TransportError> {
        let ctx = Context::establish(Scope::User)?;
        Ok(Self { ctx })
    }
}

impl ReaderProvider for PcscReaders {
    type Terminal = PcscReader;

    fn readers(&self) -> Result<Vec<PcscReader>, TransportError> {
        let names = match self.ctx.list_readers_owned() {
            Ok(names) => names,
            Err(Error::NoReadersAvailable) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(names
            .into_iter()
            .map(|name| PcscReader {
                display: name.to_string_lossy().into_owned(),
                name,
                ctx: self.ctx.clone(),
            })
            .collect())
    }
}

pub struct PcscReader {
    ctx: Context,
    name: CString,
    display: String,
}

impl PcscReader {
    fn current_state(&self) -> Result<ReaderState, TransportError> {
        let mut states = [ReaderState::new(self.name.clone(), State::UNAWARE)];
        self.ctx.get_status_change(Duration::ZERO, &mut states)?;
        let [state] = states;
        Ok(state)
    }

    fn wait_until(&self, present: bool, timeout: Duration) -> Result<bool, TransportError> {
        let mut state = self.current_state()?;
        if state.event_state().contains(State::PRESENT) == present {
            return Ok(true);
        }

        state.sync_current_state();
        let mut states = [state];
        match self.ctx.get_status_change(timeout, &mut states) {
            Ok(()) => {}
            Err(Error::Timeout) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        Ok(states[0].event_state().contains(State::PRESENT) == present)
    }
}

impl Terminal for PcscReader {
    type Channel = PcscChannel;

    fn name(&self) -> &str {
        &self.display
    }

    fn is_card_present(&self) -> Result<bool, TransportError> {
        Ok(self.current_state()?.event_state().contains(State::PRESENT))
    }

    fn wait_for_card_present(&self, timeout: Duration) -> Result<bool, TransportError> {
        self.wait_until(true, timeout)
    }

    fn wait_for_card_absent(&self, timeout: Duration) -> Result<bool, TransportError> {
        self.wait_until(false, timeout)
    }

    fn connect(&self) -> Result<PcscChannel, TransportError> {
        let card = match self.ctx.connect(&self.name, ShareMode::Shared, Protocols::T1) {
            Ok(card) => card,
            Err(Error::NoSmartcard) => return Err(TransportError::NoCard),
            Err(e) => return Err(e.into()),
        };
        debug!(reader = %self.display, "connected with T=1");
        Ok(PcscChannel { card })
    }
}

pub struct PcscChannel {
    card: Card,
}

impl Channel for PcscChannel {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut buffer = [0u8; MAX_BUFFER_SIZE];
        match self.card.transmit(command, &mut buffer) {
            Ok(response) => Ok(response.to_vec()),
            Err(Error::RemovedCard) => Err(TransportError::CardRemoved),
            Err(e) => Err(e.into()),
        }
    }
}
