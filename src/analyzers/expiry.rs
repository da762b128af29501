//! ExpiryMonitor (spec.md §4.12): classifies active batches by days to
//! expiry and drives the write-off of batches that already expired.

use std::fmt;
use std::sync::Arc;

use crate::actor::EventLogStore;
use crate::clock::{Clock, Randomness};
use crate::error::CoreResult;
use crate::inventory::{InventoryActor, InventoryEvent};
use crate::keys::ActorKey;
use crate::streams::{AlertStreamEvent, AlertStreamKind, StreamBus, StreamEvent};

/// Cap on `ExpiryAlertEvent`s per scan (spec.md §4.12, bit-exact).
const MAX_ALERTS_PER_SCAN: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct ExpiryConfig {
    pub critical_days: i64,
    pub urgent_days: i64,
    pub warning_days: i64,
    pub alerting_enabled: bool,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            critical_days: 1,
            urgent_days: 3,
            warning_days: 7,
            alerting_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryUrgency {
    Expired,
    Critical,
    Urgent,
    Warning,
    Normal,
}

impl fmt::Display for ExpiryUrgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExpiryUrgency::Expired => "expired",
            ExpiryUrgency::Critical => "critical",
            ExpiryUrgency::Urgent => "urgent",
            ExpiryUrgency::Warning => "warning",
            ExpiryUrgency::Normal => "normal",
        };
        f.write_str(s)
    }
}

fn classify(days_to_expiry: i64, config: &ExpiryConfig) -> ExpiryUrgency {
    if days_to_expiry < 0 {
        ExpiryUrgency::Expired
    } else if days_to_expiry <= config.critical_days {
        ExpiryUrgency::Critical
    } else if days_to_expiry <= config.urgent_days {
        ExpiryUrgency::Urgent
    } else if days_to_expiry <= config.warning_days {
        ExpiryUrgency::Warning
    } else {
        ExpiryUrgency::Normal
    }
}

#[derive(Debug, Clone)]
pub struct ExpiryWriteOffReport {
    pub ingredient_id: String,
    pub batches_written_off: usize,
}

/// Stateless pass over externally supplied inventory keys; every scan
/// loads each actor fresh rather than caching activations, matching the
/// "registries hold indexes, actors hold truth" split (spec.md §4.13).
pub struct ExpiryMonitor {
    store: Arc<dyn EventLogStore<InventoryEvent>>,
    bus: Arc<StreamBus>,
    clock: Arc<dyn Clock>,
    randomness: Arc<dyn Randomness>,
    config: ExpiryConfig,
}

impl ExpiryMonitor {
    pub fn new(
        store: Arc<dyn EventLogStore<InventoryEvent>>,
        bus: Arc<StreamBus>,
        clock: Arc<dyn Clock>,
        randomness: Arc<dyn Randomness>,
        config: ExpiryConfig,
    ) -> Self {
        Self {
            store,
            bus,
            clock,
            randomness,
            config,
        }
    }

    /// Scans every active batch with an `expiryDate` across `ingredients`,
    /// publishing at most 10 `Expiry` alerts total (spec.md §4.12). Returns
    /// the number of alerts emitted.
    pub async fn scan(&self, ingredients: &[ActorKey]) -> CoreResult<usize> {
        let now = self.clock.now();
        let mut emitted = 0usize;
        'ingredients: for key in ingredients {
            let ActorKey::Inventory {
                org_id,
                site_id,
                ingredient_id,
            } = key
            else {
                continue;
            };
            let actor = InventoryActor::load(
                key.clone(),
                self.store.clone(),
                self.bus.clone(),
                self.clock.clone(),
                self.randomness.clone(),
            )
            .await?;
            for batch in actor.state().batches.iter().filter(|b| b.is_active()) {
                let Some(expiry_date) = batch.expiry_date else {
                    continue;
                };
                let days = (expiry_date - now).num_days();
                let urgency = classify(days, &self.config);
                if urgency == ExpiryUrgency::Normal || !self.config.alerting_enabled {
                    continue;
                }
                if emitted >= MAX_ALERTS_PER_SCAN {
                    break 'ingredients;
                }
                self.bus.publish(StreamEvent::Alert(AlertStreamEvent {
                    org_id: org_id.clone(),
                    site_id: site_id.clone(),
                    ingredient_id: ingredient_id.clone(),
                    at: now,
                    kind: AlertStreamKind::Expiry {
                        batch_id: batch.id,
                        urgency: urgency.to_string(),
                        expiry_date,
                    },
                }));
                emitted += 1;
            }
        }
        Ok(emitted)
    }

    /// Drives every named inventory actor to write off its own expired
    /// batches (spec.md §4.12 `writeOffExpired(by)`), returning one report
    /// per ingredient that actually had something to write off.
    pub async fn write_off_expired(
        &self,
        ingredients: &[ActorKey],
        by: &str,
    ) -> CoreResult<Vec<ExpiryWriteOffReport>> {
        let mut reports = Vec::new();
        for key in ingredients {
            let ActorKey::Inventory { ingredient_id, .. } = key else {
                continue;
            };
            let mut actor = InventoryActor::load(
                key.clone(),
                self.store.clone(),
                self.bus.clone(),
                self.clock.clone(),
                self.randomness.clone(),
            )
            .await?;
            let count = actor.write_off_expired_batches(by.to_string()).await?;
            if count > 0 {
                reports.push(ExpiryWriteOffReport {
                    ingredient_id: ingredient_id.clone(),
                    batches_written_off: count,
                });
            }
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::InMemoryEventLogStore;
    use crate::clock::{FixedClock, SeededRandomness};
    use chrono::{Duration, Utc};

    fn monitor(clock: Arc<dyn Clock>) -> (ExpiryMonitor, Arc<dyn EventLogStore<InventoryEvent>>, Arc<StreamBus>) {
        let store: Arc<dyn EventLogStore<InventoryEvent>> = Arc::new(InMemoryEventLogStore::new());
        let bus = Arc::new(StreamBus::new());
        let randomness: Arc<dyn Randomness> = Arc::new(SeededRandomness::new(1));
        let monitor = ExpiryMonitor::new(store.clone(), bus.clone(), clock, randomness, ExpiryConfig::default());
        (monitor, store, bus)
    }

    async fn seeded_ingredient(
        store: &Arc<dyn EventLogStore<InventoryEvent>>,
        bus: &Arc<StreamBus>,
        clock: Arc<dyn Clock>,
        ingredient_id: &str,
        expiry_date: chrono::DateTime<Utc>,
    ) {
        let randomness: Arc<dyn Randomness> = Arc::new(SeededRandomness::new(2));
        let key = ActorKey::inventory("org1", "site1", ingredient_id);
        let mut actor = InventoryActor::load(key, store.clone(), bus.clone(), clock, randomness)
            .await
            .unwrap();
        actor
            .initialize(
                ingredient_id.to_string(),
                "SKU".to_string(),
                "kg".to_string(),
                "dairy".to_string(),
                crate::money::Fixed::from_f64(5.0),
                crate::money::Fixed::from_f64(20.0),
            )
            .await
            .unwrap();
        actor
            .receive(
                crate::money::Fixed::from_f64(10.0),
                crate::money::Fixed::from_f64(2.0),
                Some(expiry_date),
                None,
                None,
                None,
                None,
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn classifies_and_emits_alert_for_soon_to_expire_batch() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now));
        let (monitor, store, bus) = monitor(clock.clone());
        seeded_ingredient(&store, &bus, clock, "flour", now + Duration::hours(12)).await;

        let emitted = monitor
            .scan(&[ActorKey::inventory("org1", "site1", "flour")])
            .await
            .unwrap();
        assert_eq!(emitted, 1);
    }

    #[tokio::test]
    async fn scan_caps_at_ten_alerts() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now));
        let (monitor, store, bus) = monitor(clock.clone());
        let mut keys = Vec::new();
        for i in 0..15 {
            let ingredient_id = format!("ing{i}");
            seeded_ingredient(&store, &bus, clock.clone(), &ingredient_id, now + Duration::hours(1)).await;
            keys.push(ActorKey::inventory("org1", "site1", &ingredient_id));
        }
        let emitted = monitor.scan(&keys).await.unwrap();
        assert_eq!(emitted, MAX_ALERTS_PER_SCAN);
    }

    #[tokio::test]
    async fn write_off_expired_reports_per_ingredient_counts() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now));
        let (monitor, store, bus) = monitor(clock.clone());
        seeded_ingredient(&store, &bus, clock, "flour", now - Duration::hours(1)).await;

        let reports = monitor
            .write_off_expired(&[ActorKey::inventory("org1", "site1", "flour")], "system")
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].batches_written_off, 1);
    }
}
