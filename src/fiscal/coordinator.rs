//! C11: the fiscal coordinator (spec.md §4.11).
//!
//! Driven by per-order stream events rather than a direct call, matching
//! the observer pattern already used for alerting (spec.md §4.3). Tracks a
//! `wasAlreadyLinked(order)` index so a re-delivered or replayed order
//! event doesn't sign twice, then drives the TSE actor through a full
//! start/finish cycle and forwards the result to the cloud TSS adapter
//! through [`crate::retry::with_retry`] and a per-processor circuit
//! breaker, the same composition the teacher uses for its external
//! exchange calls.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::actor::{ActivationContext, ActorHost, EventLogStore, SnapshotStore};
use crate::clock::{Clock, Randomness};
use crate::error::{CoreError, CoreResult};
use crate::fiscal::cloud::{wire, TseCloudClient};
use crate::fiscal::transaction::FiscalTransactionActor;
use crate::fiscal::tse::TseActor;
use crate::idempotency::IdempotencyService;
use crate::keys::ActorKey;
use crate::money::Fixed;
use crate::retry::{with_retry, BackoffSchedule, CircuitBreakerRegistry};
use crate::streams::{
    FiskalyStreamEvent, FiskalyStreamKind, OrderStreamEvent, OrderStreamKind, StreamBus,
    StreamEvent, StreamObserver,
};

/// The wasAlreadyLinked index (spec.md §4.3): one per (org, site), tracking
/// which orders have already been driven through a signing cycle so a
/// re-delivered stream event is a no-op rather than a double-sign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFiscalLinkState {
    pub linked_orders: HashSet<Uuid>,
}

/// Cached at coordinator construction, refreshed whenever
/// [`FiscalCoordinator::refresh_config`] is called — spec.md §9 Open
/// Questions: "refresh on activation and on every getSnapshot call,
/// otherwise trust the cache."
#[derive(Debug, Clone)]
pub struct FiscalCoordinatorConfig {
    pub external_forwarding_enabled: bool,
}

struct CoordinatorInner {
    org_id: String,
    link_store: Arc<dyn SnapshotStore<OrderFiscalLinkState>>,
    tse_store: Arc<dyn EventLogStore<crate::fiscal::events::TseEvent>>,
    transaction_store: Arc<dyn EventLogStore<crate::fiscal::transaction::FiscalTransactionEvent>>,
    bus: Arc<StreamBus>,
    cloud_client: Arc<dyn TseCloudClient>,
    retry_schedule: BackoffSchedule,
    breaker: Arc<CircuitBreakerRegistry>,
    idempotency: Arc<Mutex<IdempotencyService>>,
    clock: Arc<dyn Clock>,
    randomness: Arc<dyn Randomness>,
    config: FiscalCoordinatorConfig,
}

/// Parses a coordinator-side receipt that maps internal wire tags to the
/// cloud-TSS vocabulary, for the "builds an API-specific receipt from
/// processData" step of spec.md §4.11.
fn build_cloud_receipt(process_type: &str, process_data: &str) -> serde_json::Value {
    let fields: Vec<&str> = process_data.split('^').collect();
    let tag_list = |segment: &str, map: fn(&str) -> &'static str| -> Vec<serde_json::Value> {
        if segment.is_empty() {
            return Vec::new();
        }
        segment
            .split(',')
            .filter_map(|pair| pair.split_once(':'))
            .map(|(tag, value)| serde_json::json!({ "tag": map(tag), "value": value }))
            .collect()
    };
    serde_json::json!({
        "process_type": wire::map_process_type(process_type),
        "gross_amount": fields.first().copied().unwrap_or("0.00"),
        "net_amounts": fields.get(1).map(|s| tag_list(s, wire::map_tax_tag)).unwrap_or_default(),
        "tax_amounts": fields.get(2).map(|s| tag_list(s, wire::map_tax_tag)).unwrap_or_default(),
        "payment_types": fields.get(3).map(|s| tag_list(s, wire::map_payment_tag)).unwrap_or_default(),
    })
}

impl CoordinatorInner {
    async fn link_key(&self, site_id: &str) -> ActorKey {
        ActorKey::OrderFiscal {
            org_id: self.org_id.clone(),
            site_id: site_id.to_string(),
        }
    }

    async fn load_link_state(&self, site_id: &str) -> CoreResult<OrderFiscalLinkState> {
        let key = self.link_key(site_id).await;
        Ok(self
            .link_store
            .load(&key.to_key_string())
            .await?
            .unwrap_or_default())
    }

    async fn save_link_state(&self, site_id: &str, state: &OrderFiscalLinkState) -> CoreResult<()> {
        let key = self.link_key(site_id).await;
        self.link_store.save(&key.to_key_string(), state).await
    }

    async fn handle_order_completed(
        &mut self,
        site_id: &str,
        order_id: Uuid,
        tse_id: &str,
        process_type: &str,
        gross_amount: f64,
        net_amounts: &[(String, f64)],
        tax_amounts: &[(String, f64)],
        payment_types: &[(String, f64)],
    ) -> CoreResult<()> {
        let mut link_state = self.load_link_state(site_id).await?;
        if link_state.linked_orders.contains(&order_id) {
            return Ok(());
        }

        let idem_key = format!("idem_fiscal_sign_{order_id}");
        let now = self.clock.now();
        if !self
            .idempotency
            .lock()
            .await
            .try_acquire(&idem_key, "fiscal_sign", &order_id.to_string(), None, now)
        {
            link_state.linked_orders.insert(order_id);
            self.save_link_state(site_id, &link_state).await?;
            return Ok(());
        }

        let process_data = wire::encode(&wire::ProcessData {
            gross_amount,
            net_amounts: net_amounts.to_vec(),
            tax_amounts: tax_amounts.to_vec(),
            payment_types: payment_types.to_vec(),
        });

        let tse_key = ActorKey::tse(&self.org_id, tse_id);
        let mut tse = TseActor::load(
            tse_key,
            self.tse_store.clone(),
            self.bus.clone(),
            self.clock.clone(),
            self.randomness.clone(),
        )
        .await?;

        let tx_number = tse
            .start_transaction(process_type.to_string(), process_data.clone(), Some(order_id.to_string()))
            .await?;
        let signed = tse
            .finish_transaction(tx_number, process_type.to_string(), process_data.clone())
            .await?;
        let signature_hex = signed.signature_hex;
        let qr_payload = signed.qr_payload;

        let to_fixed_pairs = |pairs: &[(String, f64)]| -> Vec<(String, Fixed)> {
            pairs.iter().map(|(tag, v)| (tag.clone(), Fixed::from_f64(*v))).collect()
        };
        let txn_key = ActorKey::FiscalTransaction {
            org_id: self.org_id.clone(),
            transaction_id: order_id.to_string(),
        };
        let mut txn = FiscalTransactionActor::load(txn_key, self.transaction_store.clone(), self.clock.clone()).await?;
        txn.create(
            tx_number,
            process_type.to_string(),
            process_data.clone(),
            Fixed::from_f64(gross_amount),
            to_fixed_pairs(net_amounts),
            to_fixed_pairs(tax_amounts),
            to_fixed_pairs(payment_types),
        )
        .await?;
        txn.sign(signature_hex, qr_payload).await?;

        link_state.linked_orders.insert(order_id);
        self.save_link_state(site_id, &link_state).await?;

        if !self.config.external_forwarding_enabled {
            return Ok(());
        }

        let receipt = build_cloud_receipt(process_type, &process_data);
        let client = self.cloud_client.clone();
        let receipt_for_call = receipt.to_string();
        let forward_result = with_retry(
            &self.retry_schedule,
            &self.breaker,
            "cloud-tss",
            self.clock.as_ref(),
            self.randomness.as_ref(),
            move || {
                let client = client.clone();
                let receipt = receipt_for_call.clone();
                async move { client.finish_transaction(tx_number, &receipt).await }
            },
        )
        .await;

        match forward_result {
            Ok(receipt_response) => {
                self.bus.publish(StreamEvent::Fiskaly(FiskalyStreamEvent {
                    org_id: self.org_id.clone(),
                    transaction_number: tx_number,
                    at: self.clock.now(),
                    kind: FiskalyStreamKind::Completed {
                        cloud_receipt_id: receipt_response.cloud_reference,
                    },
                }));
                tse.receive_external_response(tx_number, true, Some(receipt_response.cloud_reference))
                    .await?;
                txn.mark_exported().await?;
                self.idempotency.lock().await.mark_used(&idem_key, true, None).ok();
                Ok(())
            }
            Err(err) => {
                warn!(%tx_number, error = %err, ?receipt, "cloud TSS forwarding failed");
                self.bus.publish(StreamEvent::Fiskaly(FiskalyStreamEvent {
                    org_id: self.org_id.clone(),
                    transaction_number: tx_number,
                    at: self.clock.now(),
                    kind: FiskalyStreamKind::Failed {
                        message: err.to_string(),
                    },
                }));
                txn.fail(err.code().to_string(), err.to_string(), !err.is_retryable()).await?;
                self.idempotency.lock().await.mark_used(&idem_key, false, None).ok();
                Err(err)
            }
        }
    }
}

pub struct FiscalCoordinator {
    inner: Mutex<CoordinatorInner>,
    /// Kept only to hold the spawned cleanup-timer `JoinHandle` alive for
    /// `shutdown_timers` — the idempotency activation it was registered
    /// against lives in `CoordinatorInner.idempotency`, not in this host's
    /// own activation table.
    idempotency_host: ActorHost<IdempotencyService>,
}

impl FiscalCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        org_id: impl Into<String>,
        link_store: Arc<dyn SnapshotStore<OrderFiscalLinkState>>,
        tse_store: Arc<dyn EventLogStore<crate::fiscal::events::TseEvent>>,
        transaction_store: Arc<dyn EventLogStore<crate::fiscal::transaction::FiscalTransactionEvent>>,
        bus: Arc<StreamBus>,
        cloud_client: Arc<dyn TseCloudClient>,
        retry_schedule: BackoffSchedule,
        breaker: Arc<CircuitBreakerRegistry>,
        clock: Arc<dyn Clock>,
        randomness: Arc<dyn Randomness>,
        config: FiscalCoordinatorConfig,
    ) -> Self {
        let org_id = org_id.into();
        let idempotency = Arc::new(Mutex::new(IdempotencyService::new(org_id.clone())));

        // spec.md §4.4: "A periodic timer (15-minute initial, 1-hour
        // period) calls cleanupExpired." Wired the same way `ActorHost`
        // wires any other grain timer (spec.md §4.1 `registerTimer`),
        // against the same activation `CoordinatorInner.idempotency` uses.
        let idempotency_host = ActorHost::<IdempotencyService>::new(ActivationContext {
            clock: clock.clone(),
            randomness: randomness.clone(),
        });
        let timer_clock = clock.clone();
        idempotency_host.register_timer(
            idempotency.clone(),
            Duration::from_secs(15 * 60),
            Duration::from_secs(60 * 60),
            move |activation| {
                let clock = timer_clock.clone();
                async move {
                    let now = clock.now();
                    let removed = activation.lock().await.cleanup_expired(now);
                    if removed > 0 {
                        info!(removed, "idempotency cleanup timer evicted expired keys");
                    }
                }
            },
        );

        Self {
            inner: Mutex::new(CoordinatorInner {
                idempotency,
                org_id,
                link_store,
                tse_store,
                transaction_store,
                bus,
                cloud_client,
                retry_schedule,
                breaker,
                clock,
                randomness,
                config,
            }),
            idempotency_host,
        }
    }

    /// Aborts the background idempotency-cleanup timer. Callers that own a
    /// `FiscalCoordinator` for the lifetime of the process don't need this;
    /// it exists for orderly shutdown in tests and short-lived hosts.
    pub async fn shutdown(&self) {
        self.idempotency_host.shutdown_timers().await;
    }

    /// Re-reads configuration (spec.md §9 Open Questions). A real deployment
    /// would source this from a config service; here it simply replaces the
    /// cached value the caller hands in.
    pub async fn refresh_config(&self, config: FiscalCoordinatorConfig) {
        self.inner.lock().await.config = config;
    }

    pub async fn handle_order_event(&self, event: OrderStreamEvent) -> CoreResult<()> {
        let OrderStreamKind::Completed {
            tse_id,
            process_type,
            gross_amount,
            net_amounts,
            tax_amounts,
            payment_types,
        } = event.kind
        else {
            return Ok(());
        };
        let mut inner = self.inner.lock().await;
        inner
            .handle_order_completed(
                &event.site_id,
                event.order_id,
                &tse_id,
                &process_type,
                gross_amount,
                &net_amounts,
                &tax_amounts,
                &payment_types,
            )
            .await
    }
}

#[async_trait]
impl StreamObserver for FiscalCoordinator {
    async fn on_next(&self, event: StreamEvent) {
        if let StreamEvent::Order(order_event) = event {
            if let Err(err) = self.handle_order_event(order_event).await {
                warn!(error = %err, "fiscal coordinator failed to process order event");
            } else {
                info!("fiscal coordinator processed order event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{InMemoryEventLogStore, InMemorySnapshotStore};
    use crate::clock::{FixedClock, SeededRandomness};
    use crate::fiscal::cloud::CloudTssReceipt;
    use crate::retry::ExternalError;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeCloudClient {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl TseCloudClient for FakeCloudClient {
        async fn authenticate(&self) -> Result<(), ExternalError> {
            Ok(())
        }
        async fn get_tss(&self, _tss_id: &str) -> Result<serde_json::Value, ExternalError> {
            Ok(serde_json::json!({}))
        }
        async fn start_transaction(&self, _transaction_number: u64) -> Result<(), ExternalError> {
            Ok(())
        }
        async fn finish_transaction(
            &self,
            _transaction_number: u64,
            _process_data: &str,
        ) -> Result<CloudTssReceipt, ExternalError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                return Err(ExternalError {
                    code: "CONNECTION_ERROR".to_string(),
                    message: "down".to_string(),
                });
            }
            Ok(CloudTssReceipt {
                cloud_reference: "cloud-ref-1".to_string(),
                accepted: true,
            })
        }
        async fn sign_receipt(&self, _process_data: &str) -> Result<String, ExternalError> {
            Ok("sig".to_string())
        }
    }

    fn coordinator(cloud: Arc<dyn TseCloudClient>) -> FiscalCoordinator {
        FiscalCoordinator::new(
            "org1",
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryEventLogStore::new()),
            Arc::new(InMemoryEventLogStore::new()),
            Arc::new(StreamBus::new()),
            cloud,
            BackoffSchedule::default(),
            Arc::new(CircuitBreakerRegistry::new()),
            Arc::new(FixedClock::new(Utc::now())),
            Arc::new(SeededRandomness::new(3)),
            FiscalCoordinatorConfig {
                external_forwarding_enabled: true,
            },
        )
    }

    fn order_completed_event(order_id: Uuid) -> OrderStreamEvent {
        OrderStreamEvent {
            org_id: "org1".to_string(),
            site_id: "site1".to_string(),
            order_id,
            at: Utc::now(),
            kind: OrderStreamKind::Completed {
                tse_id: "tse1".to_string(),
                process_type: "Kassenbeleg".to_string(),
                gross_amount: 11.9,
                net_amounts: vec![("NORMAL".to_string(), 10.0)],
                tax_amounts: vec![("NORMAL".to_string(), 1.9)],
                payment_types: vec![("CASH".to_string(), 11.9)],
            },
        }
    }

    #[tokio::test]
    async fn signs_and_forwards_a_new_order_exactly_once() {
        let cloud = Arc::new(FakeCloudClient {
            calls: AtomicUsize::new(0),
            fail_first_n: 0,
        });
        let coord = coordinator(cloud.clone());
        let order_id = Uuid::new_v4();

        coord.handle_order_event(order_completed_event(order_id)).await.unwrap();
        assert_eq!(cloud.calls.load(Ordering::SeqCst), 1);

        // Re-delivery of the same order is a no-op via the linked-orders index.
        coord.handle_order_event(order_completed_event(order_id)).await.unwrap();
        assert_eq!(cloud.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_forwarding_failures_then_succeeds() {
        tokio::time::pause();
        let cloud = Arc::new(FakeCloudClient {
            calls: AtomicUsize::new(0),
            fail_first_n: 2,
        });
        let coord = coordinator(cloud.clone());
        let order_id = Uuid::new_v4();

        coord.handle_order_event(order_completed_event(order_id)).await.unwrap();
        assert_eq!(cloud.calls.load(Ordering::SeqCst), 3);
    }
}
