//! The inter-site transfer actor (spec.md §4.8): a small state machine
//! that drives two `InventoryActor` instances (source debit, destination
//! credit) under partial-failure tolerance — a cancelled-after-ship
//! transfer compensates by crediting the source back rather than
//! unwinding the transfer's own event log.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::actor::EventLogStore;
use crate::aggregate::{Aggregate, EventSourcedAggregate};
use crate::clock::{Clock, Randomness};
use crate::error::{CoreError, CoreResult};
use crate::inventory::{InventoryActor, InventoryEvent};
use crate::keys::ActorKey;
use crate::money::Fixed;
use crate::streams::{InventoryStreamEvent, InventoryStreamKind, StreamBus, StreamEvent};
use crate::transfer::events::{RequestedLine, TransferEvent};
use crate::transfer::types::{TransferLine, TransferStatus};

#[derive(Debug, Clone, Default)]
pub struct TransferState {
    pub org_id: String,
    pub site_id: String,
    pub transfer_id: String,
    pub source_site_id: String,
    pub destination_site_id: String,
    pub lines: Vec<TransferLine>,
    pub requested_by: String,
    pub status: Option<TransferStatus>,
    pub total_shipped_value: Fixed,
    pub total_received_value: Fixed,
    pub total_variance_value: Fixed,
}

impl TransferState {
    pub fn is_initialized(&self) -> bool {
        self.status.is_some()
    }
}

impl Aggregate for TransferState {
    type Event = TransferEvent;

    fn apply(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::Requested {
                source_site_id,
                destination_site_id,
                lines,
                requested_by,
                ..
            } => {
                self.source_site_id = source_site_id.clone();
                self.destination_site_id = destination_site_id.clone();
                self.requested_by = requested_by.clone();
                self.lines = lines
                    .iter()
                    .map(|l| TransferLine {
                        ingredient_id: l.ingredient_id.clone(),
                        requested_qty: l.requested_qty,
                        shipped_qty: Fixed::ZERO,
                        unit_cost: Fixed::ZERO,
                        received_qty: None,
                        variance: None,
                    })
                    .collect();
                self.status = Some(TransferStatus::Requested);
            }
            TransferEvent::Approved { .. } => {
                self.status = Some(TransferStatus::Approved);
            }
            TransferEvent::Rejected { .. } => {
                self.status = Some(TransferStatus::Rejected);
            }
            TransferEvent::Shipped {
                shipped_qty_by_ingredient,
                total_shipped_value,
                ..
            } => {
                for (ingredient_id, qty, unit_cost) in shipped_qty_by_ingredient {
                    if let Some(line) = self
                        .lines
                        .iter_mut()
                        .find(|l| &l.ingredient_id == ingredient_id)
                    {
                        line.shipped_qty = *qty;
                        line.unit_cost = *unit_cost;
                    }
                }
                self.total_shipped_value = *total_shipped_value;
                self.status = Some(TransferStatus::Shipped);
            }
            TransferEvent::ItemReceived {
                ingredient_id,
                received_qty,
                ..
            } => {
                if let Some(line) = self.lines.iter_mut().find(|l| &l.ingredient_id == ingredient_id) {
                    line.received_qty = Some(*received_qty);
                    line.variance = Some(*received_qty - line.shipped_qty);
                }
            }
            TransferEvent::ReceiptFinalized {
                auto_filled_ingredient_ids,
                total_received_value,
                total_variance_value,
                ..
            } => {
                for line in self.lines.iter_mut() {
                    if auto_filled_ingredient_ids.contains(&line.ingredient_id) {
                        line.received_qty = Some(line.shipped_qty);
                        line.variance = Some(Fixed::ZERO);
                    }
                }
                self.total_received_value = *total_received_value;
                self.total_variance_value = *total_variance_value;
                self.status = Some(TransferStatus::Received);
            }
            TransferEvent::Cancelled { .. } => {
                self.status = Some(TransferStatus::Cancelled);
            }
        }
    }
}

pub struct TransferActor {
    key: ActorKey,
    aggregate: EventSourcedAggregate<TransferState>,
    store: Arc<dyn EventLogStore<TransferEvent>>,
    inventory_store: Arc<dyn EventLogStore<InventoryEvent>>,
    bus: Arc<StreamBus>,
    clock: Arc<dyn Clock>,
    randomness: Arc<dyn Randomness>,
}

impl TransferActor {
    pub async fn load(
        key: ActorKey,
        store: Arc<dyn EventLogStore<TransferEvent>>,
        inventory_store: Arc<dyn EventLogStore<InventoryEvent>>,
        bus: Arc<StreamBus>,
        clock: Arc<dyn Clock>,
        randomness: Arc<dyn Randomness>,
    ) -> CoreResult<Self> {
        let aggregate = EventSourcedAggregate::replay(store.as_ref(), &key.to_key_string()).await?;
        Ok(Self {
            key,
            aggregate,
            store,
            inventory_store,
            bus,
            clock,
            randomness,
        })
    }

    pub fn state(&self) -> &TransferState {
        self.aggregate.state()
    }

    fn org_site(&self) -> CoreResult<(String, String, String)> {
        match &self.key {
            ActorKey::Transfer {
                org_id,
                site_id,
                transfer_id,
            } => Ok((org_id.clone(), site_id.clone(), transfer_id.clone())),
            _ => Err(CoreError::precondition("not a transfer key")),
        }
    }

    async fn commit(&mut self) -> CoreResult<()> {
        self.aggregate
            .confirm_events(self.store.as_ref(), &self.key.to_key_string())
            .await
    }

    fn require_status(&self, expected: TransferStatus) -> CoreResult<()> {
        match self.aggregate.state().status {
            Some(s) if s == expected => Ok(()),
            Some(s) => Err(CoreError::invalid_transition(
                self.key.to_key_string(),
                format!("expected status {:?}, found {:?}", expected, s),
            )),
            None => Err(CoreError::not_initialized(self.key.to_key_string())),
        }
    }

    async fn load_inventory(&self, site_id: &str, ingredient_id: &str) -> CoreResult<InventoryActor> {
        let (org_id, ..) = self.org_site()?;
        InventoryActor::load(
            ActorKey::inventory(&org_id, site_id, ingredient_id),
            self.inventory_store.clone(),
            self.bus.clone(),
            self.clock.clone(),
            self.randomness.clone(),
        )
        .await
    }

    pub async fn request(
        &mut self,
        source_site_id: String,
        destination_site_id: String,
        lines: Vec<(String, Fixed)>,
        requested_by: String,
    ) -> CoreResult<()> {
        if self.aggregate.state().is_initialized() {
            return Err(CoreError::conflict(format!(
                "{} already requested",
                self.key.to_key_string()
            )));
        }
        if lines.is_empty() {
            return Err(CoreError::precondition("a transfer needs at least one line"));
        }
        if source_site_id == destination_site_id {
            return Err(CoreError::precondition("source and destination site must differ"));
        }
        let now = self.clock.now();
        let lines = lines
            .into_iter()
            .map(|(ingredient_id, requested_qty)| RequestedLine {
                ingredient_id,
                requested_qty,
            })
            .collect();
        self.aggregate.raise(TransferEvent::Requested {
            source_site_id,
            destination_site_id,
            lines,
            requested_by,
            at: now,
        });
        self.commit().await
    }

    pub async fn approve(&mut self, approved_by: String) -> CoreResult<()> {
        self.require_status(TransferStatus::Requested)?;
        let now = self.clock.now();
        self.aggregate.raise(TransferEvent::Approved { approved_by, at: now });
        self.commit().await
    }

    pub async fn reject(&mut self, rejected_by: String, reason: String) -> CoreResult<()> {
        self.require_status(TransferStatus::Requested)?;
        let now = self.clock.now();
        self.aggregate.raise(TransferEvent::Rejected {
            rejected_by,
            reason,
            at: now,
        });
        self.commit().await
    }

    pub async fn ship(&mut self, shipped_by: String) -> CoreResult<()> {
        self.require_status(TransferStatus::Approved)?;
        let (_, _, transfer_id) = self.org_site()?;
        let transfer_uuid = Uuid::parse_str(&transfer_id).unwrap_or_else(|_| self.new_id());
        let source_site_id = self.aggregate.state().source_site_id.clone();
        let destination_site_id = self.aggregate.state().destination_site_id.clone();
        let lines = self.aggregate.state().lines.clone();

        let mut shipped = Vec::with_capacity(lines.len());
        let mut total_shipped_value = Fixed::ZERO;
        for line in &lines {
            let mut inv = self.load_inventory(&source_site_id, &line.ingredient_id).await?;
            let unit_cost = inv.state().wac;
            inv.transfer_out(
                line.requested_qty,
                destination_site_id.clone(),
                transfer_uuid,
                shipped_by.clone(),
            )
            .await?;
            total_shipped_value += line.requested_qty * unit_cost;
            shipped.push((line.ingredient_id.clone(), line.requested_qty, unit_cost));
        }

        let now = self.clock.now();
        self.aggregate.raise(TransferEvent::Shipped {
            shipped_qty_by_ingredient: shipped,
            total_shipped_value,
            shipped_by,
            at: now,
        });
        self.commit().await?;
        self.publish_status("shipped", now);
        Ok(())
    }

    pub async fn receive_item(&mut self, ingredient_id: String, received_qty: Fixed, by: String) -> CoreResult<()> {
        self.require_status(TransferStatus::Shipped)?;
        if !self
            .aggregate
            .state()
            .lines
            .iter()
            .any(|l| l.ingredient_id == ingredient_id)
        {
            return Err(CoreError::precondition(format!(
                "{ingredient_id} is not a line on this transfer"
            )));
        }
        let now = self.clock.now();
        self.aggregate.raise(TransferEvent::ItemReceived {
            ingredient_id,
            received_qty,
            by,
            at: now,
        });
        self.commit().await
    }

    pub async fn finalize_receipt(&mut self, finalized_by: String) -> CoreResult<()> {
        self.require_status(TransferStatus::Shipped)?;
        let (_, _, transfer_id) = self.org_site()?;
        let transfer_uuid = Uuid::parse_str(&transfer_id).unwrap_or_else(|_| self.new_id());
        let source_site_id = self.aggregate.state().source_site_id.clone();
        let lines = self.aggregate.state().lines.clone();

        let mut auto_filled = Vec::new();
        let mut total_received_value = Fixed::ZERO;
        let mut total_variance_value = Fixed::ZERO;
        for line in &lines {
            let effective_qty = line.received_qty.unwrap_or_else(|| {
                auto_filled.push(line.ingredient_id.clone());
                line.shipped_qty
            });
            if line.shipped_qty.is_zero() && effective_qty.is_zero() {
                continue;
            }
            let destination_site_id = self.aggregate.state().destination_site_id.clone();
            let mut dest_inv = self.load_inventory(&destination_site_id, &line.ingredient_id).await?;
            dest_inv
                .receive_transfer(effective_qty, line.unit_cost, source_site_id.clone(), transfer_uuid)
                .await?;

            total_received_value += effective_qty * line.unit_cost;
            total_variance_value += (effective_qty - line.shipped_qty) * line.unit_cost;
        }

        let now = self.clock.now();
        self.aggregate.raise(TransferEvent::ReceiptFinalized {
            auto_filled_ingredient_ids: auto_filled,
            total_received_value,
            total_variance_value,
            finalized_by,
            at: now,
        });
        self.commit().await?;
        self.publish_status("received", now);
        Ok(())
    }

    pub async fn cancel(&mut self, cancelled_by: String, reason: String) -> CoreResult<()> {
        let status = self
            .aggregate
            .state()
            .status
            .ok_or_else(|| CoreError::not_initialized(self.key.to_key_string()))?;
        if status == TransferStatus::Received {
            return Err(CoreError::invalid_transition(
                self.key.to_key_string(),
                "cannot cancel a received transfer",
            ));
        }
        let (_, _, transfer_id) = self.org_site()?;
        let transfer_uuid = Uuid::parse_str(&transfer_id).unwrap_or_else(|_| self.new_id());
        let compensated = status == TransferStatus::Shipped;

        if compensated {
            let source_site_id = self.aggregate.state().source_site_id.clone();
            let destination_site_id = self.aggregate.state().destination_site_id.clone();
            let lines = self.aggregate.state().lines.clone();
            for line in &lines {
                if line.shipped_qty.is_zero() {
                    continue;
                }
                let mut inv = self.load_inventory(&source_site_id, &line.ingredient_id).await?;
                inv.receive_transfer(
                    line.shipped_qty,
                    line.unit_cost,
                    destination_site_id.clone(),
                    transfer_uuid,
                )
                .await?;
            }
        }

        let now = self.clock.now();
        self.aggregate.raise(TransferEvent::Cancelled {
            cancelled_by,
            reason,
            compensated,
            at: now,
        });
        self.commit().await?;
        self.publish_status("cancelled", now);
        Ok(())
    }

    fn new_id(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.randomness.fill_bytes(&mut bytes);
        Uuid::from_bytes(bytes)
    }

    fn publish_status(&self, status: &str, now: chrono::DateTime<Utc>) {
        let state = self.aggregate.state();
        let (org_id, ..) = match self.org_site() {
            Ok(v) => v,
            Err(_) => return,
        };
        let transfer_uuid = match &self.key {
            ActorKey::Transfer { transfer_id, .. } => Uuid::parse_str(transfer_id).ok(),
            _ => None,
        };
        let Some(transfer_uuid) = transfer_uuid else {
            return;
        };
        self.bus.publish(StreamEvent::Inventory(InventoryStreamEvent {
            org_id,
            site_id: state.source_site_id.clone(),
            ingredient_id: String::new(),
            at: now,
            kind: InventoryStreamKind::TransferStatus {
                transfer_id: transfer_uuid,
                status: status.to_string(),
            },
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::InMemoryEventLogStore;
    use crate::clock::{FixedClock, SeededRandomness};

    struct Harness {
        inventory_store: Arc<dyn EventLogStore<InventoryEvent>>,
        transfer_store: Arc<dyn EventLogStore<TransferEvent>>,
        bus: Arc<StreamBus>,
        clock: Arc<dyn Clock>,
        randomness: Arc<dyn Randomness>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                inventory_store: Arc::new(InMemoryEventLogStore::new()),
                transfer_store: Arc::new(InMemoryEventLogStore::new()),
                bus: Arc::new(StreamBus::new()),
                clock: Arc::new(FixedClock::new(Utc::now())),
                randomness: Arc::new(SeededRandomness::new(11)),
            }
        }

        async fn inventory(&self, site: &str, ingredient: &str) -> InventoryActor {
            InventoryActor::load(
                ActorKey::inventory("org1", site, ingredient),
                self.inventory_store.clone(),
                self.bus.clone(),
                self.clock.clone(),
                self.randomness.clone(),
            )
            .await
            .unwrap()
        }

        async fn transfer(&self, transfer_id: &str) -> TransferActor {
            TransferActor::load(
                ActorKey::transfer("org1", "site1", transfer_id),
                self.transfer_store.clone(),
                self.inventory_store.clone(),
                self.bus.clone(),
                self.clock.clone(),
                self.randomness.clone(),
            )
            .await
            .unwrap()
        }
    }

    #[tokio::test]
    async fn happy_path_debits_source_and_credits_destination() {
        let h = Harness::new();
        let transfer_id = Uuid::new_v4().to_string();

        let mut source = h.inventory("site1", "flour").await;
        source
            .initialize(
                "Flour".into(),
                "SKU-1".into(),
                "kg".into(),
                "dry-goods".into(),
                Fixed::from_f64(5.0),
                Fixed::from_f64(50.0),
            )
            .await
            .unwrap();
        source
            .receive(Fixed::from_f64(20.0), Fixed::from_f64(2.0), None, None, None, None, None, None)
            .await
            .unwrap();

        let mut dest = h.inventory("site2", "flour").await;
        dest.initialize(
            "Flour".into(),
            "SKU-1".into(),
            "kg".into(),
            "dry-goods".into(),
            Fixed::from_f64(5.0),
            Fixed::from_f64(50.0),
        )
        .await
        .unwrap();

        let mut transfer = h.transfer(&transfer_id).await;
        transfer
            .request(
                "site1".into(),
                "site2".into(),
                vec![("flour".to_string(), Fixed::from_f64(10.0))],
                "mgr".into(),
            )
            .await
            .unwrap();
        transfer.approve("mgr".into()).await.unwrap();
        transfer.ship("mgr".into()).await.unwrap();

        let source_after_ship = h.inventory("site1", "flour").await;
        assert_eq!(source_after_ship.state().on_hand, Fixed::from_f64(10.0));

        transfer
            .receive_item("flour".to_string(), Fixed::from_f64(9.0), "clerk".into())
            .await
            .unwrap();
        transfer.finalize_receipt("clerk".into()).await.unwrap();

        assert_eq!(transfer.state().status, Some(TransferStatus::Received));
        let dest_after = h.inventory("site2", "flour").await;
        assert_eq!(dest_after.state().on_hand, Fixed::from_f64(9.0));
        assert!(transfer.state().total_variance_value.is_negative());
    }

    #[tokio::test]
    async fn cancel_after_ship_compensates_source() {
        let h = Harness::new();
        let transfer_id = Uuid::new_v4().to_string();

        let mut source = h.inventory("site1", "sugar").await;
        source
            .initialize(
                "Sugar".into(),
                "SKU-2".into(),
                "kg".into(),
                "dry-goods".into(),
                Fixed::from_f64(5.0),
                Fixed::from_f64(50.0),
            )
            .await
            .unwrap();
        source
            .receive(Fixed::from_f64(20.0), Fixed::from_f64(1.0), None, None, None, None, None, None)
            .await
            .unwrap();

        let mut transfer = h.transfer(&transfer_id).await;
        transfer
            .request(
                "site1".into(),
                "site2".into(),
                vec![("sugar".to_string(), Fixed::from_f64(10.0))],
                "mgr".into(),
            )
            .await
            .unwrap();
        transfer.approve("mgr".into()).await.unwrap();
        transfer.ship("mgr".into()).await.unwrap();
        transfer.cancel("mgr".into(), "wrong site".into()).await.unwrap();

        assert_eq!(transfer.state().status, Some(TransferStatus::Cancelled));
        let source_after = h.inventory("site1", "sugar").await;
        assert_eq!(source_after.state().on_hand, Fixed::from_f64(20.0));
    }

    #[tokio::test]
    async fn cancel_is_rejected_once_received() {
        let h = Harness::new();
        let transfer_id = Uuid::new_v4().to_string();

        let mut source = h.inventory("site1", "milk").await;
        source
            .initialize(
                "Milk".into(),
                "SKU-3".into(),
                "l".into(),
                "dairy".into(),
                Fixed::from_f64(5.0),
                Fixed::from_f64(50.0),
            )
            .await
            .unwrap();
        source
            .receive(Fixed::from_f64(10.0), Fixed::from_f64(1.0), None, None, None, None, None, None)
            .await
            .unwrap();
        let mut dest = h.inventory("site2", "milk").await;
        dest.initialize(
            "Milk".into(),
            "SKU-3".into(),
            "l".into(),
            "dairy".into(),
            Fixed::from_f64(5.0),
            Fixed::from_f64(50.0),
        )
        .await
        .unwrap();

        let mut transfer = h.transfer(&transfer_id).await;
        transfer
            .request(
                "site1".into(),
                "site2".into(),
                vec![("milk".to_string(), Fixed::from_f64(5.0))],
                "mgr".into(),
            )
            .await
            .unwrap();
        transfer.approve("mgr".into()).await.unwrap();
        transfer.ship("mgr".into()).await.unwrap();
        transfer
            .receive_item("milk".to_string(), Fixed::from_f64(5.0), "clerk".into())
            .await
            .unwrap();
        transfer.finalize_receipt("clerk".into()).await.unwrap();

        let result = transfer.cancel("mgr".into(), "too late".into()).await;
        assert!(result.is_err());
    }
}
