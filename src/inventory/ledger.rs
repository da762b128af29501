//! C6: the ledger actor.
//!
//! Logically owned by an inventory actor (spec.md §4.6) and embedded
//! directly in `InventoryState` so balance updates commit atomically with
//! the owning aggregate's event append — "Balance updates are atomic with
//! the log append: either both persist or neither" is trivially true when
//! both live in the same `Aggregate::apply`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::inventory::types::Metadata;
use crate::money::Fixed;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub delta: Fixed,
    pub reason: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    pub balance: Fixed,
    pub entries: Vec<LedgerEntry>,
}

impl LedgerState {
    pub fn credit(&mut self, qty: Fixed, reason: &str, metadata: Metadata, now: DateTime<Utc>) {
        self.balance += qty;
        self.entries.push(LedgerEntry {
            timestamp: now,
            delta: qty,
            reason: reason.to_string(),
            metadata,
        });
    }

    /// `allow_negative = false` refuses a debit that would drop the
    /// balance below zero (spec.md §4.6); inventory consumption always
    /// passes `true` since the service never refuses service for
    /// inventory discrepancies (spec.md §3).
    pub fn debit(
        &mut self,
        qty: Fixed,
        reason: &str,
        metadata: Metadata,
        now: DateTime<Utc>,
        allow_negative: bool,
    ) -> CoreResult<()> {
        if !allow_negative && self.balance - qty < Fixed::ZERO {
            return Err(CoreError::precondition(format!(
                "insufficient ledger balance: have {}, need {}",
                self.balance, qty
            )));
        }
        self.balance -= qty;
        self.entries.push(LedgerEntry {
            timestamp: now,
            delta: -qty,
            reason: reason.to_string(),
            metadata,
        });
        Ok(())
    }

    pub fn adjust_to(&mut self, target: Fixed, reason: &str, metadata: Metadata, now: DateTime<Utc>) {
        let delta = target - self.balance;
        self.balance = target;
        self.entries.push(LedgerEntry {
            timestamp: now,
            delta,
            reason: reason.to_string(),
            metadata,
        });
    }

    pub fn has_sufficient_balance(&self, qty: Fixed) -> bool {
        self.balance - qty >= Fixed::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debit_refuses_negative_unless_allowed() {
        let mut ledger = LedgerState::default();
        ledger.credit(Fixed::from_f64(5.0), "receipt", Metadata::new(), Utc::now());
        assert!(ledger
            .debit(Fixed::from_f64(10.0), "consume", Metadata::new(), Utc::now(), false)
            .is_err());
        assert!(ledger
            .debit(Fixed::from_f64(10.0), "consume", Metadata::new(), Utc::now(), true)
            .is_ok());
        assert_eq!(ledger.balance, Fixed::from_f64(-5.0));
    }

    #[test]
    fn adjust_to_records_one_entry() {
        let mut ledger = LedgerState::default();
        ledger.credit(Fixed::from_f64(5.0), "receipt", Metadata::new(), Utc::now());
        ledger.adjust_to(Fixed::from_f64(2.0), "count", Metadata::new(), Utc::now());
        assert_eq!(ledger.balance, Fixed::from_f64(2.0));
        assert_eq!(ledger.entries.len(), 2);
    }
}
