//! Card-resident wallet applet.
//!
//! The applet validates each command envelope, routes it to the [`Ledger`]
//! and turns the outcome into a status word. Commands are processed one at
//! a time, to completion.

use tracing::{debug, info};

use crate::apdu::{Command, Response, SELECT_CLA, WALLET_CLA, ins};
use crate::codec::{StatusWord, decode_amount, encode_balance};

mod ledger;
pub use ledger::Ledger;

mod error;
pub use error::{AppletError, LedgerError};

/// The wallet applet: one ledger plus the command dispatcher in front of it.
#[derive(Debug, Default)]
pub struct Applet {
    ledger: Ledger,
}

/// Public API
impl Applet {
    /// Install a fresh applet with a zero balance.
    pub fn install() -> Self {
        Self::default()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Called by the card runtime when the applet is selected.
    pub fn select(&mut self) -> bool {
        true
    }

    /// Process a raw envelope and return the raw response.
    pub fn transmit(&mut self, bytes: &[u8]) -> Vec<u8> {
        match Command::parse(bytes) {
            Ok(command) => self.process(&command).to_bytes(),
            Err(e) => {
                info!(reason = %e, "malformed envelope");
                Response::status(StatusWord::WRONG_LENGTH).to_bytes()
            }
        }
    }

    /// Process a single command.
    pub fn process(&mut self, command: &Command) -> Response {
        let result = self.dispatch(command);
        if self.ledger.is_debug() {
            debug!(
                cla = command.class,
                ins = command.instruction,
                data = ?command.data,
                balance = self.ledger.balance(),
                ok = result.is_ok(),
                "command processed"
            );
        }
        match result {
            Ok(data) => Response::success(data),
            Err(e) => {
                info!(ins = command.instruction, reason = %e, "command rejected");
                Response::status(e.status_word())
            }
        }
    }
}

/// Private API
impl Applet {
    fn dispatch(&mut self, command: &Command) -> Result<Vec<u8>, AppletError> {
        if command.class == SELECT_CLA && command.instruction == ins::SELECT {
            return Ok(Vec::new());
        }

        if command.class != WALLET_CLA {
            return Err(AppletError::ClassNotSupported(command.class));
        }

        match command.instruction {
            ins::GET_BALANCE => self.get_balance(command),
            ins::DEBIT => {
                let amount = Self::amount(command)?;
                self.ledger.debit(amount)?;
                Ok(Vec::new())
            }
            ins::CREDIT => {
                let amount = Self::amount(command)?;
                self.ledger.credit(amount)?;
                Ok(Vec::new())
            }
            ins::TOGGLE_DEBUG => {
                self.ledger.toggle_debug();
                Ok(Vec::new())
            }
            other => Err(AppletError::InstructionNotSupported(other)),
        }
    }

    /// Answer `GET_BALANCE`: the caller must accept at least 2 bytes.
    fn get_balance(&self, command: &Command) -> Result<Vec<u8>, AppletError> {
        let le = command.le.unwrap_or(0);
        if le < 2 {
            return Err(AppletError::WrongLength(format!(
                "balance needs 2 response bytes, caller accepts {le}"
            )));
        }
        Ok(encode_balance(self.ledger.balance()).to_vec())
    }

    fn amount(command: &Command) -> Result<i16, AppletError> {
        Ok(decode_amount(&command.data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // test utils

    fn credit(applet: &mut Applet, amount: i16) -> StatusWord {
        applet.process(&Command::credit(amount)).status
    }

    fn debit(applet: &mut Applet, amount: i16) -> StatusWord {
        applet.process(&Command::debit(amount)).status
    }

    fn balance(applet: &mut Applet) -> i16 {
        let response = applet.process(&Command::get_balance());
        assert_eq!(response.status, StatusWord::SUCCESS);
        crate::codec::decode_balance(&response.data).unwrap()
    }

    fn installed() -> Applet {
        let mut applet = Applet::install();
        assert!(applet.select());
        assert_eq!(
            applet.process(&Command::toggle_debug()).status,
            StatusWord::SUCCESS
        );
        applet
    }

    #[test]
    fn initial_balance_is_zero() {
        let mut applet = installed();
        assert_eq!(balance(&mut applet), 0);
    }

    // Scenarios

    #[test]
    fn repeated_credits_accumulate() {
        let mut applet = installed();
        for i in 1..=3 {
            assert_eq!(credit(&mut applet, 5), StatusWord::SUCCESS);
            assert_eq!(balance(&mut applet), 5 * i);
        }
    }

    #[test]
    fn two_byte_debit_after_one_byte_credits() {
        let mut applet = installed();
        assert_eq!(credit(&mut applet, 127), StatusWord::SUCCESS);
        assert_eq!(credit(&mut applet, 127), StatusWord::SUCCESS);
        assert_eq!(debit(&mut applet, 250), StatusWord::SUCCESS);
        assert_eq!(balance(&mut applet), 4);
    }

    #[test]
    fn overdraft_is_rejected_with_negative_balance() {
        let mut applet = installed();
        assert_eq!(credit(&mut applet, 5), StatusWord::SUCCESS);
        assert_eq!(debit(&mut applet, 10), StatusWord::NEGATIVE_BALANCE);
        assert_eq!(balance(&mut applet), 5);
    }

    #[test]
    fn debit_of_full_balance_succeeds() {
        let mut applet = installed();
        credit(&mut applet, 10);
        assert_eq!(debit(&mut applet, 5), StatusWord::SUCCESS);
        assert_eq!(debit(&mut applet, 5), StatusWord::SUCCESS);
        assert_eq!(balance(&mut applet), 0);
    }

    #[test]
    fn negative_credit_is_invalid_amount() {
        let mut applet = installed();
        credit(&mut applet, 7);
        // 0xFF sign-extends to -1
        let command = Command::new(WALLET_CLA, ins::CREDIT, 0, 0).with_data([0xFF]);
        assert_eq!(applet.process(&command).status, StatusWord::INVALID_AMOUNT);
        assert_eq!(credit(&mut applet, -300), StatusWord::INVALID_AMOUNT);
        assert_eq!(balance(&mut applet), 7);
    }

    #[test]
    fn credit_wraps_at_sixteen_bits() {
        let mut applet = installed();
        assert_eq!(credit(&mut applet, i16::MAX), StatusWord::SUCCESS);
        assert_eq!(credit(&mut applet, 1), StatusWord::SUCCESS);
        assert_eq!(balance(&mut applet), i16::MIN);
        // the wrapped balance cannot be spent
        assert_eq!(debit(&mut applet, 1), StatusWord::NEGATIVE_BALANCE);
    }

    #[test]
    fn negative_debit_cannot_push_balance_past_maximum() {
        let mut applet = installed();
        assert_eq!(credit(&mut applet, i16::MAX), StatusWord::SUCCESS);
        assert_eq!(debit(&mut applet, -1), StatusWord::NEGATIVE_BALANCE);
        assert_eq!(balance(&mut applet), i16::MAX);
    }

    #[test]
    fn balance_response_is_two_bytes_big_endian() {
        let mut applet = installed();
        credit(&mut applet, 300);
        let response = applet.process(&Command::get_balance());
        assert_eq!(response.data, vec![0x01, 0x2C]);
        assert_eq!(response.to_bytes(), vec![0x01, 0x2C, 0x90, 0x00]);
    }

    // Envelope validation

    #[test]
    fn foreign_class_is_rejected_for_every_instruction() {
        let mut applet = installed();
        for instruction in [ins::DEBIT, ins::CREDIT, ins::GET_BALANCE, ins::TOGGLE_DEBUG, 0x00] {
            let command = Command::new(0x01, instruction, 0, 0).with_data([0x05]);
            assert_eq!(
                applet.process(&command).status,
                StatusWord::CLASS_NOT_SUPPORTED
            );
        }
        assert_eq!(balance(&mut applet), 0);
    }

    #[test]
    fn select_handshake_is_accepted() {
        let mut applet = installed();
        let response = applet.process(&Command::select(crate::apdu::WALLET_AID));
        assert_eq!(response, Response::success(Vec::new()));
    }

    #[test]
    fn select_instruction_under_wallet_class_is_unknown() {
        let mut applet = installed();
        let command = Command::new(WALLET_CLA, ins::SELECT, 0, 0);
        assert_eq!(
            applet.process(&command).status,
            StatusWord::INSTRUCTION_NOT_SUPPORTED
        );
    }

    #[test]
    fn unknown_instruction_is_rejected() {
        let mut applet = installed();
        let command = Command::new(WALLET_CLA, 0x70, 0, 0);
        assert_eq!(
            applet.process(&command).status,
            StatusWord::INSTRUCTION_NOT_SUPPORTED
        );
    }

    #[test]
    fn amount_payload_must_be_one_or_two_bytes() {
        let mut applet = installed();
        let empty = Command::new(WALLET_CLA, ins::CREDIT, 0, 0);
        let three = Command::new(WALLET_CLA, ins::DEBIT, 0, 0).with_data([0, 0, 1]);
        assert_eq!(applet.process(&empty).status, StatusWord::WRONG_LENGTH);
        assert_eq!(applet.process(&three).status, StatusWord::WRONG_LENGTH);
        assert_eq!(balance(&mut applet), 0);
    }

    #[test]
    fn balance_requires_room_for_two_bytes() {
        let mut applet = installed();
        let no_le = Command::new(WALLET_CLA, ins::GET_BALANCE, 0, 0);
        let short_le = no_le.clone().with_le(1);
        assert_eq!(applet.process(&no_le).status, StatusWord::WRONG_LENGTH);
        assert_eq!(applet.process(&short_le).status, StatusWord::WRONG_LENGTH);
        // Le = 0x00 on the wire means 256
        let raw = applet.transmit(&[0xB0, 0x50, 0x00, 0x00, 0x00]);
        assert_eq!(raw, vec![0x00, 0x00, 0x90, 0x00]);
    }

    #[test]
    fn toggle_debug_needs_no_payload() {
        let mut applet = Applet::install();
        assert_eq!(applet.transmit(&[0xB0, 0x60, 0x00, 0x00]), vec![0x90, 0x00]);
        assert!(applet.ledger().is_debug());
    }

    #[test]
    fn raw_envelopes_are_parsed() {
        let mut applet = installed();
        assert_eq!(
            applet.transmit(&[0xB0, 0x40, 0x00, 0x00, 0x01, 0x05]),
            vec![0x90, 0x00]
        );
        assert_eq!(
            applet.transmit(&[0xB0, 0x30, 0x00, 0x00, 0x01, 0x0A]),
            vec![0xFF, 0x85]
        );
        assert_eq!(applet.transmit(&[0xB0]), vec![0x67, 0x00]);
        assert_eq!(applet.ledger().balance(), 5);
    }
}
