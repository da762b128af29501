//! Per-site fiscal-transaction index, keyed additionally by date
//! (spec.md §4.13 "Per-site indexes for ... fiscal transactions (with
//! date)"). This is a read-side index only: the
//! [`crate::fiscal::transaction::FiscalTransactionActor`] remains the
//! source of truth for each transaction's own state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{CoreError, CoreResult};
use crate::keys::ActorKey;
use crate::money::Fixed;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionIndexEntry {
    pub transaction_id: String,
    pub device_id: String,
    pub gross_amount: Fixed,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionRegistryState {
    by_id: HashMap<String, TransactionIndexEntry>,
    by_date: BTreeMap<NaiveDate, Vec<String>>,
}

pub struct TransactionRegistry {
    key: ActorKey,
    state: TransactionRegistryState,
}

impl TransactionRegistry {
    pub fn new(key: ActorKey) -> CoreResult<Self> {
        if !matches!(key, ActorKey::TransactionRegistry { .. }) {
            return Err(CoreError::precondition("not a transaction registry key"));
        }
        Ok(Self {
            key,
            state: TransactionRegistryState::default(),
        })
    }

    pub fn from_state(key: ActorKey, state: TransactionRegistryState) -> CoreResult<Self> {
        if !matches!(key, ActorKey::TransactionRegistry { .. }) {
            return Err(CoreError::precondition("not a transaction registry key"));
        }
        Ok(Self { key, state })
    }

    pub fn state(&self) -> &TransactionRegistryState {
        &self.state
    }

    pub fn record(
        &mut self,
        transaction_id: &str,
        device_id: &str,
        gross_amount: Fixed,
        recorded_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        if self.state.by_id.contains_key(transaction_id) {
            return Err(CoreError::conflict(format!(
                "transaction {transaction_id} already indexed at {}",
                self.key
            )));
        }
        self.state.by_id.insert(
            transaction_id.to_string(),
            TransactionIndexEntry {
                transaction_id: transaction_id.to_string(),
                device_id: device_id.to_string(),
                gross_amount,
                recorded_at,
            },
        );
        self.state
            .by_date
            .entry(recorded_at.date_naive())
            .or_default()
            .push(transaction_id.to_string());
        Ok(())
    }

    pub fn get(&self, transaction_id: &str) -> Option<&TransactionIndexEntry> {
        self.state.by_id.get(transaction_id)
    }

    /// Transaction ids recorded on a single calendar date (UTC), in the
    /// order they were recorded.
    pub fn on_date(&self, date: NaiveDate) -> Vec<&TransactionIndexEntry> {
        self.state
            .by_date
            .get(&date)
            .into_iter()
            .flatten()
            .filter_map(|id| self.state.by_id.get(id))
            .collect()
    }

    /// Inclusive date range query, ascending by date.
    pub fn in_range(&self, from: NaiveDate, to: NaiveDate) -> Vec<&TransactionIndexEntry> {
        self.state
            .by_date
            .range(from..=to)
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| self.state.by_id.get(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn registry() -> TransactionRegistry {
        TransactionRegistry::new(ActorKey::TransactionRegistry {
            org_id: "org1".to_string(),
            site_id: "site1".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn queries_by_exact_date_and_range() {
        let mut r = registry();
        let d1 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        r.record("tx1", "dev1", Fixed::from_f64(10.0), d1).unwrap();
        r.record("tx2", "dev1", Fixed::from_f64(20.0), d2).unwrap();

        assert_eq!(r.on_date(d1.date_naive()).len(), 1);
        assert_eq!(r.in_range(d1.date_naive(), d2.date_naive()).len(), 2);
    }

    #[test]
    fn duplicate_transaction_id_conflicts() {
        let mut r = registry();
        let now = Utc::now();
        r.record("tx1", "dev1", Fixed::from_f64(10.0), now).unwrap();
        let result = r.record("tx1", "dev1", Fixed::from_f64(10.0), now);
        assert!(matches!(result, Err(CoreError::Conflict { .. })));
    }
}
