//! Entry-credit balances.
//!
//! Commits are paid for in entry credits. Balances only change through
//! ledger entries, so replaying the entry-credit blocks in order always
//! reproduces the same balances.

use entrychain_core::{ECBlock, ECBlockEntry, PublicKey};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur while applying ledger entries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreditError {
    #[error("insufficient credits for {key}: need {required}, have {available}")]
    InsufficientCredits {
        key: PublicKey,
        required: u64,
        available: u64,
    },

    #[error("balance overflow for {0}")]
    Overflow(PublicKey),
}

pub type Result<T> = std::result::Result<T, CreditError>;

/// Entry-credit balance per public key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreditLedger {
    balances: HashMap<PublicKey, u64>,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance of `key`; unknown keys hold zero.
    pub fn balance(&self, key: &PublicKey) -> u64 {
        self.balances.get(key).copied().unwrap_or(0)
    }

    /// Number of keys that have ever been credited.
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    pub fn credit(&mut self, key: PublicKey, amount: u64) -> Result<u64> {
        let balance = self.balances.entry(key).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(CreditError::Overflow(key))?;
        Ok(*balance)
    }

    /// Take `amount` from `key`, leaving the balance untouched on failure.
    pub fn charge(&mut self, key: &PublicKey, amount: u64) -> Result<u64> {
        let available = self.balance(key);
        if available < amount {
            return Err(CreditError::InsufficientCredits {
                key: *key,
                required: amount,
                available,
            });
        }
        let remaining = available - amount;
        self.balances.insert(*key, remaining);
        Ok(remaining)
    }

    /// Apply one ledger entry. Markers carry no value and are ignored.
    pub fn apply(&mut self, entry: &ECBlockEntry) -> Result<()> {
        match entry {
            ECBlockEntry::CommitChain(cc) => {
                self.charge(&cc.ec_pub_key, u64::from(cc.credits))?;
            }
            ECBlockEntry::CommitEntry(ce) => {
                self.charge(&ce.ec_pub_key, u64::from(ce.credits))?;
            }
            ECBlockEntry::IncreaseBalance(ib) => {
                self.credit(ib.ec_pub_key, ib.num_ec)?;
            }
            ECBlockEntry::ServerIndexNumber(_) | ECBlockEntry::MinuteNumber(_) => {}
        }
        Ok(())
    }

    /// Apply every entry of `block` in body order.
    pub fn apply_block(&mut self, block: &ECBlock) -> Result<()> {
        for entry in block.body() {
            self.apply(entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entrychain_core::{CommitEntry, Hash, IncreaseBalance, Keypair, MilliTime};

    #[test]
    fn test_credit_and_charge() {
        let key = PublicKey([1; 32]);
        let mut ledger = CreditLedger::new();
        assert_eq!(ledger.balance(&key), 0);

        assert_eq!(ledger.credit(key, 10).unwrap(), 10);
        assert_eq!(ledger.charge(&key, 3).unwrap(), 7);
        assert_eq!(ledger.balance(&key), 7);
    }

    #[test]
    fn test_insufficient_credits() {
        let key = PublicKey([2; 32]);
        let mut ledger = CreditLedger::new();
        ledger.credit(key, 2).unwrap();

        let err = ledger.charge(&key, 5).unwrap_err();
        assert_eq!(
            err,
            CreditError::InsufficientCredits {
                key,
                required: 5,
                available: 2
            }
        );
        assert_eq!(ledger.balance(&key), 2);
    }

    #[test]
    fn test_overflow() {
        let key = PublicKey([3; 32]);
        let mut ledger = CreditLedger::new();
        ledger.credit(key, u64::MAX).unwrap();
        assert_eq!(ledger.credit(key, 1), Err(CreditError::Overflow(key)));
    }

    #[test]
    fn test_apply_block_in_order() {
        let keypair = Keypair::generate();
        let key = keypair.public_key;

        let mut block = ECBlock::new();
        block.add_entry(IncreaseBalance::new(key, Hash::repeat(9), 5));
        block.add_entry(ECBlockEntry::MinuteNumber(1));
        block.add_entry(
            CommitEntry::new(Hash::repeat(1), 2, MilliTime::from_millis(1)).signed(&keypair),
        );

        let mut ledger = CreditLedger::new();
        ledger.apply_block(&block).unwrap();
        assert_eq!(ledger.balance(&key), 3);

        // A commit before any balance increase cannot be paid for.
        let mut early = ECBlock::new();
        early.add_entry(
            CommitEntry::new(Hash::repeat(1), 2, MilliTime::from_millis(1)).signed(&keypair),
        );
        assert!(matches!(
            CreditLedger::new().apply_block(&early),
            Err(CreditError::InsufficientCredits { .. })
        ));
    }
}
