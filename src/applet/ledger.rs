use super::LedgerError;

/// The stored-value balance held on the card.
///
/// A debit never leaves the balance outside `0..=i16::MAX`; a credit wraps
/// on 16-bit overflow.
#[derive(Debug, Default)]
pub struct Ledger {
    balance: i16,
    debug: bool,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self) -> i16 {
        self.balance
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn credit(&mut self, amount: i16) -> Result<(), LedgerError> {
        if amount < 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        self.balance = self.balance.wrapping_add(amount);
        Ok(())
    }

    pub fn debit(&mut self, amount: i16) -> Result<(), LedgerError> {
        // widened so the check itself cannot wrap
        let next = i32::from(self.balance) - i32::from(amount);
        let Ok(next @ 0..) = i16::try_from(next) else {
            return Err(LedgerError::NegativeBalance {
                balance: self.balance,
                amount,
            });
        };
        self.balance = next;
        Ok(())
    }

    pub fn toggle_debug(&mut self) {
        self.debug = !self.debug;
    }
}
