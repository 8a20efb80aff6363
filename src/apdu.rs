//! Command and response envelopes (ISO 7816-4 short form).

use thiserror::Error;

use crate::codec::{StatusWord, encode_amount};

/// Class byte of every wallet command.
pub const WALLET_CLA: u8 = 0xB0;

/// Class byte of the select handshake.
pub const SELECT_CLA: u8 = 0x00;

/// Application identifier of the wallet applet.
pub const WALLET_AID: &[u8; 12] = b"FITPAYRULEZ!";

/// Instruction codes.
pub mod ins {
    pub const DEBIT: u8 = 0x30;
    pub const CREDIT: u8 = 0x40;
    pub const GET_BALANCE: u8 = 0x50;
    pub const TOGGLE_DEBUG: u8 = 0x60;
    pub const SELECT: u8 = 0xA4;
}

/// Errors raised while parsing raw envelopes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApduError {
    #[error("envelope too short: {0} bytes")]
    TooShort(usize),

    #[error("declared data length {declared} does not match {actual} trailing bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("extended length envelopes are not supported")]
    ExtendedLength,

    #[error("{0} data bytes do not fit a short envelope")]
    DataTooLong(usize),
}

/// A request envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub class: u8,
    pub instruction: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Number of response bytes the caller can accept, if stated.
    pub le: Option<u16>,
}

impl Command {
    pub fn new(class: u8, instruction: u8, p1: u8, p2: u8) -> Self {
        Self {
            class,
            instruction,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_le(mut self, le: u16) -> Self {
        self.le = Some(le);
        self
    }

    /// SELECT by name.
    pub fn select(aid: &[u8]) -> Self {
        Self::new(SELECT_CLA, ins::SELECT, 0x04, 0x00).with_data(aid)
    }

    pub fn get_balance() -> Self {
        Self::new(WALLET_CLA, ins::GET_BALANCE, 0x00, 0x00).with_le(2)
    }

    pub fn credit(amount: i16) -> Self {
        Self::new(WALLET_CLA, ins::CREDIT, 0x00, 0x00).with_data(encode_amount(amount).as_slice())
    }

    pub fn debit(amount: i16) -> Self {
        Self::new(WALLET_CLA, ins::DEBIT, 0x00, 0x00).with_data(encode_amount(amount).as_slice())
    }

    pub fn toggle_debug() -> Self {
        Self::new(WALLET_CLA, ins::TOGGLE_DEBUG, 0x00, 0x00)
    }

    /// Serialize as `CLA INS P1 P2 [Lc data] [Le]`. `Le = 256` is sent as `0x00`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ApduError> {
        let mut out = Vec::with_capacity(6 + self.data.len());
        out.extend_from_slice(&[self.class, self.instruction, self.p1, self.p2]);
        if !self.data.is_empty() {
            let lc = u8::try_from(self.data.len())
                .map_err(|_| ApduError::DataTooLong(self.data.len()))?;
            out.push(lc);
            out.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            out.push(if le >= 256 { 0 } else { le as u8 });
        }
        Ok(out)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ApduError> {
        let (header, body) = match bytes.split_first_chunk::<4>() {
            Some(split) => split,
            None => return Err(ApduError::TooShort(bytes.len())),
        };
        let [class, instruction, p1, p2] = *header;
        let command = Self::new(class, instruction, p1, p2);

        match *body {
            [] => Ok(command),
            [le] => Ok(command.with_le(decode_le(le))),
            [0, ..] => Err(ApduError::ExtendedLength),
            [lc, ref rest @ ..] => {
                let lc = usize::from(lc);
                if rest.len() == lc {
                    Ok(command.with_data(rest))
                } else if rest.len() == lc + 1 {
                    Ok(command
                        .with_data(&rest[..lc])
                        .with_le(decode_le(rest[lc])))
                } else {
                    Err(ApduError::LengthMismatch {
                        declared: lc,
                        actual: rest.len(),
                    })
                }
            }
        }
    }
}

fn decode_le(le: u8) -> u16 {
    if le == 0 { 256 } else { u16::from(le) }
}

/// A response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusWord,
    pub data: Vec<u8>,
}

impl Response {
    pub fn success(data: impl Into<Vec<u8>>) -> Self {
        Self {
            status: StatusWord::SUCCESS,
            data: data.into(),
        }
    }

    pub fn status(status: StatusWord) -> Self {
        Self {
            status,
            data: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Serialize as `data SW1 SW2`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.status.to_bytes());
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ApduError> {
        match bytes.split_last_chunk::<2>() {
            Some((data, [sw1, sw2])) => Ok(Self {
                status: StatusWord::from_bytes(*sw1, *sw2),
                data: data.to_vec(),
            }),
            None => Err(ApduError::TooShort(bytes.len())),
        }
    }
}
