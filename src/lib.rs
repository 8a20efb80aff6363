//! A stored-value wallet split between a card-resident applet and a host.
//!
//! The [`applet`] module holds the balance and answers command envelopes;
//! the [`host`] module finds a reader, selects the applet and drives it.
//! Both sides share the envelope layout in [`apdu`] and the payload and
//! status-word vocabulary in [`codec`].

pub mod apdu;
pub mod applet;
pub mod codec;
pub mod config;
pub mod host;
pub mod script;

pub use apdu::{Command, Response, WALLET_AID};
pub use applet::{Applet, Ledger};
pub use codec::StatusWord;
pub use config::SessionConfig;
pub use host::{Session, WalletHandle, WalletService};
