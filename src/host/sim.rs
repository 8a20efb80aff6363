//! In-process card reader with a simulated card, for tests and demos.
//!
//! The simulated card plays the role of the card runtime: it routes SELECT
//! by AID to its installed applet and forwards every other command to the
//! selected applet.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use super::{Channel, ReaderProvider, Terminal, TransportError};
use crate::apdu::{Command, Response, SELECT_CLA, WALLET_AID, ins};
use crate::applet::Applet;
use crate::codec::StatusWord;

/// A card with at most one installed applet.
#[derive(Debug)]
pub struct SimulatedCard {
    aid: Vec<u8>,
    applet: Option<Applet>,
    selected: bool,
}

impl SimulatedCard {
    /// A card with a freshly installed wallet applet.
    pub fn with_wallet() -> Self {
        Self {
            aid: WALLET_AID.to_vec(),
            applet: Some(Applet::install()),
            selected: false,
        }
    }

    /// A card with nothing installed.
    pub fn blank() -> Self {
        Self {
            aid: Vec::new(),
            applet: None,
            selected: false,
        }
    }

    pub fn applet(&self) -> Option<&Applet> {
        self.applet.as_ref()
    }

    pub fn transmit(&mut self, bytes: &[u8]) -> Vec<u8> {
        let command = match Command::parse(bytes) {
            Ok(command) => command,
            Err(_) => return Response::status(StatusWord::WRONG_LENGTH).to_bytes(),
        };

        if command.class == SELECT_CLA && command.instruction == ins::SELECT {
            return self.select(&command).to_bytes();
        }

        match self.applet.as_mut() {
            Some(applet) if self.selected => applet.transmit(bytes),
            _ => Response::status(StatusWord::UNKNOWN).to_bytes(),
        }
    }

    fn select(&mut self, command: &Command) -> Response {
        self.selected = false;
        let Some(applet) = self.applet.as_mut() else {
            return Response::status(StatusWord::FILE_NOT_FOUND);
        };
        if command.data != self.aid || !applet.select() {
            return Response::status(StatusWord::FILE_NOT_FOUND);
        }
        self.selected = true;
        applet.process(command)
    }

    /// Power loss deselects the applet; the ledger survives.
    fn reset(&mut self) {
        self.selected = false;
    }
}

#[derive(Debug, Default)]
struct Slot {
    card: Option<SimulatedCard>,
    /// Bumped on every insertion so channels to a previous insertion go stale.
    insertion: u64,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    changed: Condvar,
}

/// A reader whose slot can be filled and emptied from any thread.
#[derive(Debug, Clone)]
pub struct SimulatedReader {
    name: Arc<str>,
    shared: Arc<Shared>,
}

impl SimulatedReader {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            shared: Arc::default(),
        }
    }

    pub fn with_card(name: &str, card: SimulatedCard) -> Self {
        let reader = Self::new(name);
        reader.insert(card);
        reader
    }

    /// Insert `card`, replacing any card already in the slot.
    pub fn insert(&self, mut card: SimulatedCard) {
        card.reset();
        let mut slot = self.shared.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.card = Some(card);
        slot.insertion += 1;
        debug!(reader = %self.name, "simulated card inserted");
        self.shared.changed.notify_all();
    }

    /// Take the card out of the slot.
    pub fn remove(&self) -> Option<SimulatedCard> {
        let mut slot = self.shared.slot.lock().unwrap_or_else(|e| e.into_inner());
        let card = slot.card.take();
        debug!(reader = %self.name, "simulated card removed");
        self.shared.changed.notify_all();
        card
    }

    fn lock(&self) -> Result<MutexGuard<'_, Slot>, TransportError> {
        self.shared
            .slot
            .lock()
            .map_err(|_| TransportError::Reader(format!("{}: slot lock poisoned", self.name)))
    }

    fn wait_until(&self, present: bool, timeout: Duration) -> Result<bool, TransportError> {
        let slot = self.lock()?;
        let (slot, _) = self
            .shared
            .changed
            .wait_timeout_while(slot, timeout, |slot| slot.card.is_some() != present)
            .map_err(|_| TransportError::Reader(format!("{}: slot lock poisoned", self.name)))?;
        Ok(slot.card.is_some() == present)
    }
}

impl Terminal for SimulatedReader {
    type Channel = SimulatedChannel;

    fn name(&self) -> &str {
        &self.name
    }

    fn is_card_present(&self) -> Result<bool, TransportError> {
        Ok(self.lock()?.card.is_some())
    }

    fn wait_for_card_present(&self, timeout: Duration) -> Result<bool, TransportError> {
        self.wait_until(true, timeout)
    }

    fn wait_for_card_absent(&self, timeout: Duration) -> Result<bool, TransportError> {
        self.wait_until(false, timeout)
    }

    fn connect(&self) -> Result<SimulatedChannel, TransportError> {
        let slot = self.lock()?;
        if slot.card.is_none() {
            return Err(TransportError::NoCard);
        }
        Ok(SimulatedChannel {
            reader: self.clone(),
            insertion: slot.insertion,
        })
    }
}

/// Channel bound to one insertion of a card.
#[derive(Debug)]
pub struct SimulatedChannel {
    reader: SimulatedReader,
    insertion: u64,
}

impl Channel for SimulatedChannel {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut slot = self.reader.lock()?;
        if slot.insertion != self.insertion {
            return Err(TransportError::CardRemoved);
        }
        let card = slot.card.as_mut().ok_or(TransportError::CardRemoved)?;
        Ok(card.transmit(command))
    }
}

/// A fixed set of simulated readers.
#[derive(Debug, Clone, Default)]
pub struct SimulatedReaders {
    readers: Vec<SimulatedReader>,
}

impl SimulatedReaders {
    /// `count` empty readers named `Simulated Reader <i>`.
    pub fn new(count: usize) -> Self {
        Self {
            readers: (0..count)
                .map(|i| SimulatedReader::new(&format!("Simulated Reader {i}")))
                .collect(),
        }
    }

    /// One reader holding a fresh wallet card.
    pub fn with_wallet_card() -> Self {
        let readers = Self::new(1);
        readers.readers[0].insert(SimulatedCard::with_wallet());
        readers
    }

    pub fn reader(&self, index: usize) -> Option<&SimulatedReader> {
        self.readers.get(index)
    }
}

impl ReaderProvider for SimulatedReaders {
    type Terminal = SimulatedReader;

    fn readers(&self) -> Result<Vec<SimulatedReader>, TransportError> {
        Ok(self.readers.clone())
    }
}
