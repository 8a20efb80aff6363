//! Error types for the host side.

use thiserror::Error;

use crate::apdu::ApduError;
use crate::codec::{CodecError, StatusWord};

/// Failures of the reader or of the channel to the card.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no card in reader")]
    NoCard,

    #[error("card removed")]
    CardRemoved,

    #[error("reader failure: {0}")]
    Reader(String),

    #[error("malformed response: {0}")]
    Malformed(#[from] ApduError),

    #[cfg(feature = "pcsc")]
    #[error("pc/sc: {0}")]
    Pcsc(#[from] pcsc::Error),
}

/// Error returned by [`Session`](super::Session) operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no reader at index {index} ({available} available)")]
    NoReaderFound { index: usize, available: usize },

    #[error("card does not contain the wallet applet (status {0})")]
    ServiceNotFound(StatusWord),

    #[error("invalid transaction amount {0}")]
    InvalidAmount(i16),

    #[error("insufficient funds for debit of {0}")]
    NegativeBalance(i16),

    #[error("{operation} failed with status {status}")]
    UnexpectedStatus {
        operation: &'static str,
        status: StatusWord,
    },

    #[error("session is not connected")]
    Disconnected,

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("bad payload: {0}")]
    Codec(#[from] CodecError),
}

impl From<ApduError> for SessionError {
    fn from(e: ApduError) -> Self {
        SessionError::Transport(e.into())
    }
}
