//! Transaction state.

use crate::error::{Error, Result};

/// The possible states of a transaction. The discriminant is the byte stored
/// in the transaction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    /// The transaction is running or was interrupted by a crash.
    Active = 0,
    /// The transaction has been successfully committed.
    Committed = 1,
    /// The transaction has been aborted (rolled back).
    Aborted = 2,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Returns true if the transaction is finished (committed or aborted).
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Active),
            1 => Ok(Self::Committed),
            2 => Ok(Self::Aborted),
            other => Err(Error::CorruptStorage(format!(
                "invalid transaction status byte {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_state() {
        assert!(TransactionState::Active.is_active());
        assert!(!TransactionState::Active.is_finished());

        assert!(TransactionState::Committed.is_committed());
        assert!(TransactionState::Committed.is_finished());

        assert!(TransactionState::Aborted.is_aborted());
        assert!(TransactionState::Aborted.is_finished());
    }

    #[test]
    fn test_status_bytes() -> Result<()> {
        for state in [
            TransactionState::Active,
            TransactionState::Committed,
            TransactionState::Aborted,
        ] {
            assert_eq!(TransactionState::from_byte(state.to_byte())?, state);
        }
        assert_eq!(TransactionState::Committed.to_byte(), 1);
        assert!(TransactionState::from_byte(3).is_err());
        Ok(())
    }
}
