//! Wire vocabulary shared by the applet and the host: amount and balance
//! payloads plus the status words carried by every response.

use std::fmt;
use thiserror::Error;

/// 16-bit status word returned with every response (SW1 SW2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord(u16);

impl StatusWord {
    pub const SUCCESS: StatusWord = StatusWord(0x9000);
    pub const WRONG_LENGTH: StatusWord = StatusWord(0x6700);
    pub const FILE_NOT_FOUND: StatusWord = StatusWord(0x6A82);
    pub const INSTRUCTION_NOT_SUPPORTED: StatusWord = StatusWord(0x6D00);
    pub const CLASS_NOT_SUPPORTED: StatusWord = StatusWord(0x6E00);
    pub const UNKNOWN: StatusWord = StatusWord(0x6F00);
    /// Debit would take the balance below zero.
    pub const NEGATIVE_BALANCE: StatusWord = StatusWord(0xFF85);
    /// Credit of a negative amount.
    pub const INVALID_AMOUNT: StatusWord = StatusWord(0xFF83);

    pub const fn new(value: u16) -> Self {
        StatusWord(value)
    }

    pub const fn from_bytes(sw1: u8, sw2: u8) -> Self {
        StatusWord(u16::from_be_bytes([sw1, sw2]))
    }

    pub const fn value(self) -> u16 {
        self.0
    }

    pub const fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

/// Errors raised while decoding payloads.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("amount payload must be 1 or 2 bytes, got {0}")]
    AmountLength(usize),

    #[error("balance payload must be 2 bytes, got {0}")]
    BalanceLength(usize),
}

/// Encoded amount: one byte for `0..=127`, two big-endian bytes otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountBytes {
    Short([u8; 1]),
    Long([u8; 2]),
}

impl AmountBytes {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            AmountBytes::Short(b) => b,
            AmountBytes::Long(b) => b,
        }
    }
}

pub fn encode_amount(amount: i16) -> AmountBytes {
    if (0..=127).contains(&amount) {
        AmountBytes::Short([amount as u8])
    } else {
        AmountBytes::Long(amount.to_be_bytes())
    }
}

/// Decode an amount by payload length alone, never by instruction.
pub fn decode_amount(bytes: &[u8]) -> Result<i16, CodecError> {
    match *bytes {
        [b] => Ok(i16::from(b as i8)),
        [hi, lo] => Ok(i16::from_be_bytes([hi, lo])),
        _ => Err(CodecError::AmountLength(bytes.len())),
    }
}

pub fn encode_balance(balance: i16) -> [u8; 2] {
    balance.to_be_bytes()
}

pub fn decode_balance(bytes: &[u8]) -> Result<i16, CodecError> {
    match *bytes {
        [hi, lo] => Ok(i16::from_be_bytes([hi, lo])),
        _ => Err(CodecError::BalanceLength(bytes.len())),
    }
}
