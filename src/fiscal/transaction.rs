//! The FiscalTransaction aggregate (spec.md §3): the one-shot signing
//! envelope the fiscal coordinator (C11) creates per order, distinct from
//! the TSE actor's own in-flight counters. Grounded in the same
//! event-sourced shape as [`crate::transfer::TransferActor`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::EventLogStore;
use crate::aggregate::{Aggregate, EventSourcedAggregate};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::keys::ActorKey;
use crate::money::Fixed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiscalTransactionStatus {
    Pending,
    Signed,
    Failed,
    Retrying,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FiscalTransactionEvent {
    Created {
        device_transaction_number: u64,
        process_type: String,
        process_data: String,
        gross_amount: Fixed,
        net_by_rate: Vec<(String, Fixed)>,
        tax_by_rate: Vec<(String, Fixed)>,
        payment_by_type: Vec<(String, Fixed)>,
        at: DateTime<Utc>,
    },
    Signed {
        signature_hex: String,
        qr_payload: String,
        at: DateTime<Utc>,
    },
    SigningFailed {
        error_code: String,
        message: String,
        terminal: bool,
        at: DateTime<Utc>,
    },
    MarkedExported {
        at: DateTime<Utc>,
    },
}

/// Invariant (spec.md §3): cannot sign a transaction already `Signed`;
/// `deviceTransactionNumber` is allocated exactly once, at `Created`.
#[derive(Debug, Clone, Default)]
pub struct FiscalTransactionState {
    pub device_transaction_number: u64,
    pub process_type: String,
    pub process_data: String,
    pub gross_amount: Fixed,
    pub net_by_rate: Vec<(String, Fixed)>,
    pub tax_by_rate: Vec<(String, Fixed)>,
    pub payment_by_type: Vec<(String, Fixed)>,
    pub signature_hex: Option<String>,
    pub qr_payload: Option<String>,
    pub status: Option<FiscalTransactionStatus>,
    pub retry_count: u32,
    pub exported_at: Option<DateTime<Utc>>,
}

impl FiscalTransactionState {
    pub fn is_created(&self) -> bool {
        self.status.is_some()
    }

    pub fn is_signed(&self) -> bool {
        self.status == Some(FiscalTransactionStatus::Signed)
    }
}

impl Aggregate for FiscalTransactionState {
    type Event = FiscalTransactionEvent;

    fn apply(&mut self, event: &FiscalTransactionEvent) {
        match event {
            FiscalTransactionEvent::Created {
                device_transaction_number,
                process_type,
                process_data,
                gross_amount,
                net_by_rate,
                tax_by_rate,
                payment_by_type,
                ..
            } => {
                self.device_transaction_number = *device_transaction_number;
                self.process_type = process_type.clone();
                self.process_data = process_data.clone();
                self.gross_amount = *gross_amount;
                self.net_by_rate = net_by_rate.clone();
                self.tax_by_rate = tax_by_rate.clone();
                self.payment_by_type = payment_by_type.clone();
                self.status = Some(FiscalTransactionStatus::Pending);
            }
            FiscalTransactionEvent::Signed {
                signature_hex,
                qr_payload,
                ..
            } => {
                self.signature_hex = Some(signature_hex.clone());
                self.qr_payload = Some(qr_payload.clone());
                self.status = Some(FiscalTransactionStatus::Signed);
            }
            FiscalTransactionEvent::SigningFailed { terminal, .. } => {
                self.retry_count += 1;
                self.status = Some(if *terminal {
                    FiscalTransactionStatus::Failed
                } else {
                    FiscalTransactionStatus::Retrying
                });
            }
            FiscalTransactionEvent::MarkedExported { at } => {
                self.exported_at = Some(*at);
            }
        }
    }
}

pub struct FiscalTransactionActor {
    key: ActorKey,
    aggregate: EventSourcedAggregate<FiscalTransactionState>,
    store: Arc<dyn EventLogStore<FiscalTransactionEvent>>,
    clock: Arc<dyn Clock>,
}

impl FiscalTransactionActor {
    pub async fn load(
        key: ActorKey,
        store: Arc<dyn EventLogStore<FiscalTransactionEvent>>,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        if !matches!(key, ActorKey::FiscalTransaction { .. }) {
            return Err(CoreError::precondition("not a fiscal transaction key"));
        }
        let aggregate = EventSourcedAggregate::replay(store.as_ref(), &key.to_key_string()).await?;
        Ok(Self {
            key,
            aggregate,
            store,
            clock,
        })
    }

    pub fn state(&self) -> &FiscalTransactionState {
        self.aggregate.state()
    }

    async fn commit(&mut self) -> CoreResult<()> {
        self.aggregate
            .confirm_events(self.store.as_ref(), &self.key.to_key_string())
            .await
    }

    pub async fn create(
        &mut self,
        device_transaction_number: u64,
        process_type: String,
        process_data: String,
        gross_amount: Fixed,
        net_by_rate: Vec<(String, Fixed)>,
        tax_by_rate: Vec<(String, Fixed)>,
        payment_by_type: Vec<(String, Fixed)>,
    ) -> CoreResult<()> {
        if self.aggregate.state().is_created() {
            return Err(CoreError::conflict(format!(
                "{} already created",
                self.key.to_key_string()
            )));
        }
        let now = self.clock.now();
        self.aggregate.raise(FiscalTransactionEvent::Created {
            device_transaction_number,
            process_type,
            process_data,
            gross_amount,
            net_by_rate,
            tax_by_rate,
            payment_by_type,
            at: now,
        });
        self.commit().await
    }

    pub async fn sign(&mut self, signature_hex: String, qr_payload: String) -> CoreResult<()> {
        if self.aggregate.state().is_signed() {
            return Err(CoreError::invalid_transition(
                self.key.to_key_string(),
                "transaction already signed",
            ));
        }
        let now = self.clock.now();
        self.aggregate.raise(FiscalTransactionEvent::Signed {
            signature_hex,
            qr_payload,
            at: now,
        });
        self.commit().await
    }

    pub async fn fail(&mut self, error_code: String, message: String, terminal: bool) -> CoreResult<()> {
        let now = self.clock.now();
        self.aggregate.raise(FiscalTransactionEvent::SigningFailed {
            error_code,
            message,
            terminal,
            at: now,
        });
        self.commit().await
    }

    pub async fn mark_exported(&mut self) -> CoreResult<()> {
        let now = self.clock.now();
        self.aggregate
            .raise(FiscalTransactionEvent::MarkedExported { at: now });
        self.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::InMemoryEventLogStore;
    use crate::clock::FixedClock;

    fn actor() -> FiscalTransactionActor {
        FiscalTransactionActor {
            key: ActorKey::FiscalTransaction {
                org_id: "org1".to_string(),
                transaction_id: "tx1".to_string(),
            },
            aggregate: EventSourcedAggregate::new(),
            store: Arc::new(InMemoryEventLogStore::new()),
            clock: Arc::new(FixedClock::new(Utc::now())),
        }
    }

    #[tokio::test]
    async fn cannot_sign_an_already_signed_transaction() {
        let mut a = actor();
        a.create(1, "Kassenbeleg".into(), "10.00^...".into(), Fixed::from_f64(10.0), vec![], vec![], vec![])
            .await
            .unwrap();
        a.sign("abc".into(), "V0;...".into()).await.unwrap();
        let result = a.sign("def".into(), "V0;...".into()).await;
        assert!(matches!(result, Err(CoreError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn failing_nonterminally_sets_retrying_and_increments_retry_count() {
        let mut a = actor();
        a.create(1, "Kassenbeleg".into(), "10.00^...".into(), Fixed::from_f64(10.0), vec![], vec![], vec![])
            .await
            .unwrap();
        a.fail("CONNECTION_ERROR".into(), "timed out".into(), false).await.unwrap();
        assert_eq!(a.state().status, Some(FiscalTransactionStatus::Retrying));
        assert_eq!(a.state().retry_count, 1);
    }

    #[tokio::test]
    async fn terminal_failure_marks_failed() {
        let mut a = actor();
        a.create(1, "Kassenbeleg".into(), "10.00^...".into(), Fixed::from_f64(10.0), vec![], vec![], vec![])
            .await
            .unwrap();
        a.fail("INVALID_CREDENTIALS".into(), "bad key".into(), true).await.unwrap();
        assert_eq!(a.state().status, Some(FiscalTransactionStatus::Failed));
    }
}
