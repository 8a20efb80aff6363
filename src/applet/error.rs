//! Error types for command processing on the card.

use thiserror::Error;

use crate::codec::{CodecError, StatusWord};

/// Ledger invariant violations. The balance is untouched when one is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid transaction amount {0}")]
    InvalidAmount(i16),

    #[error("insufficient funds: balance {balance}, requested {amount}")]
    NegativeBalance { balance: i16, amount: i16 },
}

/// Top-level error returned by [`Applet::process`](super::Applet::process).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AppletError {
    #[error("class {0:#04X} not supported")]
    ClassNotSupported(u8),

    #[error("instruction {0:#04X} not supported")]
    InstructionNotSupported(u8),

    #[error("wrong length: {0}")]
    WrongLength(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<CodecError> for AppletError {
    fn from(e: CodecError) -> Self {
        AppletError::WrongLength(e.to_string())
    }
}

impl AppletError {
    /// The status word this error is reported with.
    pub fn status_word(&self) -> StatusWord {
        match self {
            AppletError::ClassNotSupported(_) => StatusWord::CLASS_NOT_SUPPORTED,
            AppletError::InstructionNotSupported(_) => StatusWord::INSTRUCTION_NOT_SUPPORTED,
            AppletError::WrongLength(_) => StatusWord::WRONG_LENGTH,
            AppletError::Ledger(LedgerError::InvalidAmount(_)) => StatusWord::INVALID_AMOUNT,
            AppletError::Ledger(LedgerError::NegativeBalance { .. }) => {
                StatusWord::NEGATIVE_BALANCE
            }
        }
    }
}
