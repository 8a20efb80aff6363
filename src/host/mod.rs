//! Host side: readers, the wallet session, and the background service.

mod error;
pub use error::{SessionError, TransportError};

mod reader;
pub use reader::{Channel, ReaderProvider, StopSignal, Terminal};

mod session;
pub use session::{Session, SessionState, discover};

mod sim;
pub use sim::{SimulatedCard, SimulatedChannel, SimulatedReader, SimulatedReaders};

#[cfg(feature = "pcsc")]
mod pcsc_reader;
#[cfg(feature = "pcsc")]
pub use pcsc_reader::{PcscChannel, PcscReader, PcscReaders};

pub mod service;
pub use service::{CardState, ServiceError, WalletHandle, WalletService};
