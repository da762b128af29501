//! The inventory actor (spec.md §3, §4.7): per-(org, site, ingredient)
//! stock ledger over FIFO batches with weighted-average costing.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::actor::EventLogStore;
use crate::aggregate::{Aggregate, EventSourcedAggregate};
use crate::clock::{Clock, Randomness};
use crate::error::{CoreError, CoreResult};
use crate::inventory::events::InventoryEvent;
use crate::inventory::ledger::LedgerState;
use crate::inventory::types::{
    derive_stock_level, BatchStatus, ConsumptionBreakdownLine, Metadata, MovementEntry,
    MovementKind, StockBatch, StockLevel,
};
use crate::keys::ActorKey;
use crate::money::Fixed;
use crate::streams::{
    AlertStreamEvent, AlertStreamKind, InventoryStreamEvent, InventoryStreamKind, StreamBus,
    StreamEvent,
};

const MAX_MOVEMENT_LOG: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct InventoryState {
    pub org_id: String,
    pub site_id: String,
    pub ingredient_id: String,
    pub name: String,
    pub sku: String,
    pub unit: String,
    pub category: String,
    pub reorder_point: Fixed,
    pub par_level: Fixed,
    pub batches: Vec<StockBatch>,
    pub wac: Fixed,
    pub on_hand: Fixed,
    pub reserved: Fixed,
    pub unbatched_deficit: Fixed,
    pub movements: VecDeque<MovementEntry>,
    pub ledger: LedgerState,
    pub initialized: bool,
}

impl InventoryState {
    pub fn available(&self) -> Fixed {
        self.on_hand - self.reserved
    }

    pub fn stock_level(&self) -> StockLevel {
        derive_stock_level(self.available(), self.reorder_point, self.par_level)
    }

    fn push_movement(&mut self, entry: MovementEntry) {
        self.movements.push_back(entry);
        while self.movements.len() > MAX_MOVEMENT_LOG {
            self.movements.pop_front();
        }
    }

    /// Recomputes WAC and `on_hand` from the batch table. `on_hand` is the
    /// sum of active-batch quantities net of the unbatched deficit, so a
    /// consumption that outran every batch still shows up as reduced
    /// on-hand stock rather than only living in a side counter.
    fn recompute(&mut self) {
        let mut qty_total = Fixed::ZERO;
        let mut cost_total = Fixed::ZERO;
        for batch in self.batches.iter().filter(|b| b.is_active()) {
            qty_total += batch.qty;
            cost_total += batch.qty * batch.unit_cost;
        }
        self.wac = if qty_total.is_zero() {
            Fixed::ZERO
        } else {
            cost_total / qty_total
        };
        self.on_hand = qty_total - self.unbatched_deficit;
    }
}

impl Aggregate for InventoryState {
    type Event = InventoryEvent;

    fn apply(&mut self, event: &InventoryEvent) {
        match event {
            InventoryEvent::Initialized {
                org_id,
                site_id,
                ingredient_id,
                name,
                sku,
                unit,
                category,
                reorder_point,
                par_level,
                ..
            } => {
                self.org_id = org_id.clone();
                self.site_id = site_id.clone();
                self.ingredient_id = ingredient_id.clone();
                self.name = name.clone();
                self.sku = sku.clone();
                self.unit = unit.clone();
                self.category = category.clone();
                self.reorder_point = *reorder_point;
                self.par_level = *par_level;
                self.initialized = true;
            }
            InventoryEvent::StockReceived {
                batch_id,
                batch_number,
                received_qty,
                unit_cost,
                expiry_date,
                supplier_id,
                delivery_id,
                location,
                notes: _,
                sku_id,
                deficit_absorbed,
                at,
            } => {
                let mut remaining = *received_qty;
                if !deficit_absorbed.is_zero() {
                    self.unbatched_deficit -= *deficit_absorbed;
                    remaining -= *deficit_absorbed;
                }
                if remaining.is_positive() {
                    self.batches.push(StockBatch {
                        id: *batch_id,
                        batch_number: batch_number.clone(),
                        received_at: *at,
                        expiry_date: *expiry_date,
                        qty: remaining,
                        original_qty: *received_qty,
                        unit_cost: *unit_cost,
                        total_cost: remaining * *unit_cost,
                        status: BatchStatus::Active,
                        supplier: supplier_id.clone(),
                        delivery: delivery_id.clone(),
                        location: location.clone(),
                        sku_id: sku_id.clone(),
                    });
                }
                self.recompute();
                let mut meta = Metadata::new();
                meta.insert("batch_id".to_string(), batch_id.to_string());
                self.ledger.credit(*received_qty, "receipt", meta, *at);
                self.push_movement(MovementEntry {
                    id: *batch_id,
                    kind: MovementKind::Receipt,
                    qty: *received_qty,
                    reason: "receipt".to_string(),
                    order_id: None,
                    performed_by: None,
                    at: *at,
                });
            }
            InventoryEvent::StockConsumed {
                movement_id,
                qty,
                reason,
                order_id,
                performed_by,
                breakdown,
                deficit_added,
                total_cost: _,
                at,
            } => {
                self.apply_breakdown(breakdown);
                if !deficit_added.is_zero() {
                    self.unbatched_deficit += *deficit_added;
                }
                self.recompute();
                let mut meta = Metadata::new();
                meta.insert("reason".to_string(), reason.clone());
                let _ = self.ledger.debit(*qty, "consumption", meta, *at, true);
                self.push_movement(MovementEntry {
                    id: *movement_id,
                    kind: MovementKind::Consumption,
                    qty: *qty,
                    reason: reason.clone(),
                    order_id: *order_id,
                    performed_by: performed_by.clone(),
                    at: *at,
                });
            }
            InventoryEvent::StockWrittenOff {
                movement_id,
                qty,
                reason,
                category: _,
                recorded_by,
                breakdown,
                deficit_added,
                total_cost: _,
                at,
            } => {
                self.apply_breakdown(breakdown);
                if !deficit_added.is_zero() {
                    self.unbatched_deficit += *deficit_added;
                }
                self.recompute();
                let mut meta = Metadata::new();
                meta.insert("reason".to_string(), reason.clone());
                let _ = self.ledger.debit(*qty, "waste", meta, *at, true);
                self.push_movement(MovementEntry {
                    id: *movement_id,
                    kind: MovementKind::Waste,
                    qty: *qty,
                    reason: reason.clone(),
                    order_id: None,
                    performed_by: Some(recorded_by.clone()),
                    at: *at,
                });
            }
            InventoryEvent::StockAdjusted {
                movement_id,
                new_qty: _,
                variance,
                reason,
                by,
                approved_by: _,
                deficit_cancelled,
                adjustment_batch_id,
                adjustment_batch_qty,
                consumed_breakdown,
                at,
            } => {
                if !deficit_cancelled.is_zero() {
                    self.unbatched_deficit -= *deficit_cancelled;
                }
                if let Some(batch_id) = adjustment_batch_id {
                    if adjustment_batch_qty.is_positive() {
                        let unit_cost = self.wac;
                        self.batches.push(StockBatch {
                            id: *batch_id,
                            batch_number: format!("ADJ-{}", &batch_id.to_string()[..8]),
                            received_at: *at,
                            expiry_date: None,
                            qty: *adjustment_batch_qty,
                            original_qty: *adjustment_batch_qty,
                            unit_cost,
                            total_cost: *adjustment_batch_qty * unit_cost,
                            status: BatchStatus::Active,
                            supplier: None,
                            delivery: None,
                            location: None,
                            sku_id: None,
                        });
                    }
                }
                self.apply_breakdown(consumed_breakdown);
                self.recompute();
                let target = self.on_hand;
                let mut meta = Metadata::new();
                meta.insert("reason".to_string(), reason.clone());
                meta.insert("by".to_string(), by.clone());
                self.ledger.adjust_to(target, "count_adjustment", meta, *at);
                self.push_movement(MovementEntry {
                    id: *movement_id,
                    kind: MovementKind::Adjustment,
                    qty: variance.abs(),
                    reason: reason.clone(),
                    order_id: None,
                    performed_by: Some(by.clone()),
                    at: *at,
                });
            }
            InventoryEvent::StockTransferredOut {
                movement_id,
                qty,
                destination_site_id: _,
                transfer_id,
                by,
                breakdown,
                at,
            } => {
                self.apply_breakdown(breakdown);
                self.recompute();
                let mut meta = Metadata::new();
                meta.insert("transfer_id".to_string(), transfer_id.to_string());
                let _ = self.ledger.debit(*qty, "transfer_out", meta, *at, false);
                self.push_movement(MovementEntry {
                    id: *movement_id,
                    kind: MovementKind::TransferOut,
                    qty: *qty,
                    reason: "transfer_out".to_string(),
                    order_id: None,
                    performed_by: Some(by.clone()),
                    at: *at,
                });
            }
            InventoryEvent::StockTransferReceived {
                batch_id,
                batch_number,
                received_qty,
                unit_cost,
                source_site_id: _,
                transfer_id,
                deficit_absorbed,
                at,
            } => {
                let mut remaining = *received_qty;
                if !deficit_absorbed.is_zero() {
                    self.unbatched_deficit -= *deficit_absorbed;
                    remaining -= *deficit_absorbed;
                }
                if remaining.is_positive() {
                    self.batches.push(StockBatch {
                        id: *batch_id,
                        batch_number: batch_number.clone(),
                        received_at: *at,
                        expiry_date: None,
                        qty: remaining,
                        original_qty: *received_qty,
                        unit_cost: *unit_cost,
                        total_cost: remaining * *unit_cost,
                        status: BatchStatus::Active,
                        supplier: None,
                        delivery: None,
                        location: None,
                        sku_id: None,
                    });
                }
                self.recompute();
                let mut meta = Metadata::new();
                meta.insert("transfer_id".to_string(), transfer_id.to_string());
                self.ledger.credit(*received_qty, "transfer_in", meta, *at);
                self.push_movement(MovementEntry {
                    id: *batch_id,
                    kind: MovementKind::TransferIn,
                    qty: *received_qty,
                    reason: "transfer_in".to_string(),
                    order_id: None,
                    performed_by: None,
                    at: *at,
                });
            }
            InventoryEvent::ConsumptionReversed {
                movement_id,
                original_movement_id: _,
                restock_batch_id,
                qty,
                unit_cost,
                reason,
                by,
                at,
            } => {
                self.restock(*restock_batch_id, *qty, *unit_cost, *at);
                self.recompute();
                let mut meta = Metadata::new();
                meta.insert("reason".to_string(), reason.clone());
                meta.insert("by".to_string(), by.clone());
                self.ledger.credit(*qty, "reversal", meta, *at);
                self.push_movement(MovementEntry {
                    id: *movement_id,
                    kind: MovementKind::Reversal,
                    qty: *qty,
                    reason: reason.clone(),
                    order_id: None,
                    performed_by: Some(by.clone()),
                    at: *at,
                });
            }
            InventoryEvent::OrderConsumptionReversed {
                movement_id,
                order_id,
                restock_batch_id,
                qty,
                unit_cost,
                reversed_count: _,
                reason,
                by,
                at,
            } => {
                self.restock(*restock_batch_id, *qty, *unit_cost, *at);
                self.recompute();
                let mut meta = Metadata::new();
                meta.insert("order_id".to_string(), order_id.to_string());
                meta.insert("reason".to_string(), reason.clone());
                self.ledger.credit(*qty, "reversal", meta, *at);
                self.push_movement(MovementEntry {
                    id: *movement_id,
                    kind: MovementKind::Reversal,
                    qty: *qty,
                    reason: reason.clone(),
                    order_id: Some(*order_id),
                    performed_by: Some(by.clone()),
                    at: *at,
                });
            }
            InventoryEvent::ExpiredBatchesWrittenOff {
                movement_id,
                batch_ids,
                qty,
                cost: _,
                by,
                at,
            } => {
                for batch in self.batches.iter_mut() {
                    if batch_ids.contains(&batch.id) {
                        batch.qty = Fixed::ZERO;
                        batch.status = BatchStatus::WrittenOff;
                    }
                }
                self.recompute();
                self.push_movement(MovementEntry {
                    id: *movement_id,
                    kind: MovementKind::Waste,
                    qty: *qty,
                    reason: "expired".to_string(),
                    order_id: None,
                    performed_by: Some(by.clone()),
                    at: *at,
                });
            }
            InventoryEvent::LowStockAlertTriggered { .. } | InventoryEvent::StockDepletedAlert { .. } => {
                // History markers only; `stock_level()` is always derived.
            }
        }
    }
}

impl InventoryState {
    fn apply_breakdown(&mut self, breakdown: &[ConsumptionBreakdownLine]) {
        for line in breakdown {
            if let Some(batch) = self.batches.iter_mut().find(|b| b.id == line.batch_id) {
                batch.qty -= line.qty;
                if !batch.qty.is_positive() {
                    batch.qty = Fixed::ZERO;
                    batch.status = BatchStatus::Exhausted;
                }
            }
        }
    }

    fn restock(&mut self, batch_id: Uuid, qty: Fixed, unit_cost: Fixed, at: DateTime<Utc>) {
        if !qty.is_positive() {
            return;
        }
        self.batches.push(StockBatch {
            id: batch_id,
            batch_number: format!("RVS-{}", &batch_id.to_string()[..8]),
            received_at: at,
            expiry_date: None,
            qty,
            original_qty: qty,
            unit_cost,
            total_cost: qty * unit_cost,
            status: BatchStatus::Active,
            supplier: None,
            delivery: None,
            location: None,
            sku_id: None,
        });
    }
}

/// FIFO consumption across active batches ordered by receipt time. Any
/// quantity left over after the batches run out becomes an unbatched
/// deficit, costed at the current WAC (spec.md §4.7 "negative stock is
/// tolerated").
fn fifo_consume(
    batches: &[StockBatch],
    qty: Fixed,
    wac: Fixed,
) -> (Vec<ConsumptionBreakdownLine>, Fixed, Fixed) {
    let mut remaining = qty;
    let mut breakdown = Vec::new();
    let mut total_cost = Fixed::ZERO;

    let mut ordered: Vec<&StockBatch> = batches
        .iter()
        .filter(|b| b.is_active() && b.qty.is_positive())
        .collect();
    ordered.sort_by_key(|b| b.received_at);

    for batch in ordered {
        if !remaining.is_positive() {
            break;
        }
        let take = remaining.min(batch.qty);
        if take.is_positive() {
            breakdown.push(ConsumptionBreakdownLine::new(batch.id, take, batch.unit_cost));
            total_cost += take * batch.unit_cost;
            remaining -= take;
        }
    }

    let deficit_added = remaining.max(Fixed::ZERO);
    if deficit_added.is_positive() {
        total_cost += deficit_added * wac;
    }
    (breakdown, deficit_added, total_cost)
}

/// Command surface over the event-sourced `InventoryState`. One instance
/// per activation, matching the single-writer guarantee `ActorHost` gives
/// every grain.
pub struct InventoryActor {
    key: ActorKey,
    aggregate: EventSourcedAggregate<InventoryState>,
    store: Arc<dyn EventLogStore<InventoryEvent>>,
    bus: Arc<StreamBus>,
    clock: Arc<dyn Clock>,
    randomness: Arc<dyn Randomness>,
}

impl InventoryActor {
    pub async fn load(
        key: ActorKey,
        store: Arc<dyn EventLogStore<InventoryEvent>>,
        bus: Arc<StreamBus>,
        clock: Arc<dyn Clock>,
        randomness: Arc<dyn Randomness>,
    ) -> CoreResult<Self> {
        let aggregate = EventSourcedAggregate::replay(store.as_ref(), &key.to_key_string()).await?;
        Ok(Self {
            key,
            aggregate,
            store,
            bus,
            clock,
            randomness,
        })
    }

    pub fn state(&self) -> &InventoryState {
        self.aggregate.state()
    }

    fn new_id(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.randomness.fill_bytes(&mut bytes);
        Uuid::from_bytes(bytes)
    }

    fn require_initialized(&self) -> CoreResult<()> {
        if self.aggregate.state().initialized {
            Ok(())
        } else {
            Err(CoreError::not_initialized(self.key.to_key_string()))
        }
    }

    async fn commit(&mut self) -> CoreResult<()> {
        self.aggregate
            .confirm_events(self.store.as_ref(), &self.key.to_key_string())
            .await
    }

    fn maybe_raise_level_alert(&mut self, before: StockLevel, now: DateTime<Utc>) {
        let after = self.aggregate.state().stock_level();
        if !after.is_worse_than(before) {
            return;
        }
        match after {
            StockLevel::OutOfStock => {
                self.aggregate.raise(InventoryEvent::StockDepletedAlert { at: now })
            }
            StockLevel::Low => {
                let state = self.aggregate.state();
                let available = state.available();
                let reorder_point = state.reorder_point;
                self.aggregate.raise(InventoryEvent::LowStockAlertTriggered {
                    available,
                    reorder_point,
                    at: now,
                });
            }
            _ => {}
        }
    }

    fn publish_alert_if_crossed(&self, before: StockLevel, now: DateTime<Utc>) {
        let state = self.aggregate.state();
        let after = state.stock_level();
        if !after.is_worse_than(before) {
            return;
        }
        let kind = match after {
            StockLevel::OutOfStock => Some(AlertStreamKind::StockDepleted),
            StockLevel::Low => Some(AlertStreamKind::ReorderPointBreached {
                available: state.available().to_f64(),
                reorder_point: state.reorder_point.to_f64(),
            }),
            _ => None,
        };
        if let Some(kind) = kind {
            self.bus.publish(StreamEvent::Alert(AlertStreamEvent {
                org_id: state.org_id.clone(),
                site_id: state.site_id.clone(),
                ingredient_id: state.ingredient_id.clone(),
                at: now,
                kind,
            }));
        }
    }

    fn publish_inventory(&self, kind: InventoryStreamKind, now: DateTime<Utc>) {
        let state = self.aggregate.state();
        self.bus.publish(StreamEvent::Inventory(InventoryStreamEvent {
            org_id: state.org_id.clone(),
            site_id: state.site_id.clone(),
            ingredient_id: state.ingredient_id.clone(),
            at: now,
            kind,
        }));
    }

    pub async fn initialize(
        &mut self,
        name: String,
        sku: String,
        unit: String,
        category: String,
        reorder_point: Fixed,
        par_level: Fixed,
    ) -> CoreResult<()> {
        if self.aggregate.state().initialized {
            return Err(CoreError::conflict(format!(
                "{} already initialized",
                self.key.to_key_string()
            )));
        }
        let (org_id, site_id, ingredient_id) = match &self.key {
            ActorKey::Inventory {
                org_id,
                site_id,
                ingredient_id,
            } => (org_id.clone(), site_id.clone(), ingredient_id.clone()),
            _ => return Err(CoreError::precondition("not an inventory key")),
        };
        let now = self.clock.now();
        self.aggregate.raise(InventoryEvent::Initialized {
            org_id,
            site_id,
            ingredient_id,
            name,
            sku,
            unit,
            category,
            reorder_point,
            par_level,
            at: now,
        });
        self.commit().await
    }

    pub async fn receive(
        &mut self,
        qty: Fixed,
        unit_cost: Fixed,
        expiry_date: Option<DateTime<Utc>>,
        supplier_id: Option<String>,
        delivery_id: Option<String>,
        location: Option<String>,
        notes: Option<String>,
        sku_id: Option<String>,
    ) -> CoreResult<Uuid> {
        self.require_initialized()?;
        if !qty.is_positive() {
            return Err(CoreError::precondition("received quantity must be positive"));
        }
        let now = self.clock.now();
        let batch_id = self.new_id();
        let batch_number = format!("BATCH-{}", &batch_id.to_string()[..8]);
        let deficit_absorbed = self.aggregate.state().unbatched_deficit.min(qty);
        let before_level = self.aggregate.state().stock_level();

        self.aggregate.raise(InventoryEvent::StockReceived {
            batch_id,
            batch_number,
            received_qty: qty,
            unit_cost,
            expiry_date,
            supplier_id,
            delivery_id,
            location,
            notes,
            sku_id,
            deficit_absorbed,
            at: now,
        });
        self.maybe_raise_level_alert(before_level, now);
        self.commit().await?;

        let state = self.aggregate.state();
        self.publish_inventory(
            InventoryStreamKind::StockReceived {
                batch_id,
                qty: qty.to_f64(),
                on_hand: state.on_hand.to_f64(),
                wac: state.wac.to_f64(),
            },
            now,
        );
        self.publish_alert_if_crossed(before_level, now);
        Ok(batch_id)
    }

    pub async fn consume(
        &mut self,
        qty: Fixed,
        reason: String,
        order_id: Option<Uuid>,
        performed_by: Option<String>,
    ) -> CoreResult<Vec<ConsumptionBreakdownLine>> {
        self.require_initialized()?;
        if !qty.is_positive() {
            return Err(CoreError::precondition("consumed quantity must be positive"));
        }
        let now = self.clock.now();
        let before_level = self.aggregate.state().stock_level();
        let state = self.aggregate.state();
        let (breakdown, deficit_added, total_cost) = fifo_consume(&state.batches, qty, state.wac);
        let movement_id = self.new_id();

        self.aggregate.raise(InventoryEvent::StockConsumed {
            movement_id,
            qty,
            reason,
            order_id,
            performed_by,
            breakdown: breakdown.clone(),
            deficit_added,
            total_cost,
            at: now,
        });
        self.maybe_raise_level_alert(before_level, now);
        self.commit().await?;

        let on_hand_remaining = self.aggregate.state().on_hand.to_f64();
        self.publish_inventory(
            InventoryStreamKind::StockConsumed {
                qty: qty.to_f64(),
                total_cost: total_cost.to_f64(),
                breakdown: breakdown.clone(),
                on_hand_remaining,
            },
            now,
        );
        self.publish_alert_if_crossed(before_level, now);
        Ok(breakdown)
    }

    pub async fn record_waste(
        &mut self,
        qty: Fixed,
        reason: String,
        category: Option<String>,
        recorded_by: String,
    ) -> CoreResult<Vec<ConsumptionBreakdownLine>> {
        self.require_initialized()?;
        if !qty.is_positive() {
            return Err(CoreError::precondition("waste quantity must be positive"));
        }
        let now = self.clock.now();
        let before_level = self.aggregate.state().stock_level();
        let state = self.aggregate.state();
        let (breakdown, deficit_added, total_cost) = fifo_consume(&state.batches, qty, state.wac);
        let movement_id = self.new_id();

        self.aggregate.raise(InventoryEvent::StockWrittenOff {
            movement_id,
            qty,
            reason,
            category,
            recorded_by,
            breakdown: breakdown.clone(),
            deficit_added,
            total_cost,
            at: now,
        });
        self.maybe_raise_level_alert(before_level, now);
        self.commit().await?;

        let on_hand_remaining = self.aggregate.state().on_hand.to_f64();
        self.publish_inventory(
            InventoryStreamKind::StockConsumed {
                qty: qty.to_f64(),
                total_cost: total_cost.to_f64(),
                breakdown: breakdown.clone(),
                on_hand_remaining,
            },
            now,
        );
        self.publish_alert_if_crossed(before_level, now);
        Ok(breakdown)
    }

    pub async fn adjust_quantity(
        &mut self,
        counted_qty: Fixed,
        reason: String,
        by: String,
        approved_by: Option<String>,
    ) -> CoreResult<Fixed> {
        self.require_initialized()?;
        if counted_qty.is_negative() {
            return Err(CoreError::precondition("counted quantity cannot be negative"));
        }
        let now = self.clock.now();
        let before_level = self.aggregate.state().stock_level();
        let state = self.aggregate.state();
        let variance = counted_qty - state.on_hand;
        let movement_id = self.new_id();

        let mut deficit_cancelled = Fixed::ZERO;
        let mut adjustment_batch_id = None;
        let mut adjustment_batch_qty = Fixed::ZERO;
        let mut consumed_breakdown = Vec::new();

        if variance.is_positive() {
            deficit_cancelled = state.unbatched_deficit.min(variance);
            let remainder = variance - deficit_cancelled;
            if remainder.is_positive() {
                adjustment_batch_id = Some(self.new_id());
                adjustment_batch_qty = remainder;
            }
        } else if variance.is_negative() {
            let (breakdown, _deficit_added, _cost) = fifo_consume(&state.batches, variance.abs(), state.wac);
            consumed_breakdown = breakdown;
        }

        self.aggregate.raise(InventoryEvent::StockAdjusted {
            movement_id,
            new_qty: counted_qty,
            variance,
            reason,
            by,
            approved_by,
            deficit_cancelled,
            adjustment_batch_id,
            adjustment_batch_qty,
            consumed_breakdown,
            at: now,
        });
        self.maybe_raise_level_alert(before_level, now);
        self.commit().await?;
        self.publish_alert_if_crossed(before_level, now);
        Ok(variance)
    }

    pub async fn transfer_out(
        &mut self,
        qty: Fixed,
        destination_site_id: String,
        transfer_id: Uuid,
        by: String,
    ) -> CoreResult<Vec<ConsumptionBreakdownLine>> {
        self.require_initialized()?;
        if !qty.is_positive() {
            return Err(CoreError::precondition("transfer quantity must be positive"));
        }
        let now = self.clock.now();
        let before_level = self.aggregate.state().stock_level();
        let state = self.aggregate.state();
        if state.available() < qty {
            return Err(CoreError::precondition(format!(
                "insufficient available stock for transfer: have {}, need {}",
                state.available(),
                qty
            )));
        }
        let (breakdown, _deficit_added, _cost) = fifo_consume(&state.batches, qty, state.wac);
        let movement_id = self.new_id();

        self.aggregate.raise(InventoryEvent::StockTransferredOut {
            movement_id,
            qty,
            destination_site_id,
            transfer_id,
            by,
            breakdown: breakdown.clone(),
            at: now,
        });
        self.maybe_raise_level_alert(before_level, now);
        self.commit().await?;

        self.publish_inventory(
            InventoryStreamKind::TransferStatus {
                transfer_id,
                status: "shipped".to_string(),
            },
            now,
        );
        self.publish_alert_if_crossed(before_level, now);
        Ok(breakdown)
    }

    pub async fn receive_transfer(
        &mut self,
        qty: Fixed,
        unit_cost: Fixed,
        source_site_id: String,
        transfer_id: Uuid,
    ) -> CoreResult<Uuid> {
        self.require_initialized()?;
        if !qty.is_positive() {
            return Err(CoreError::precondition("transfer receipt quantity must be positive"));
        }
        let now = self.clock.now();
        let batch_id = self.new_id();
        let batch_number = format!("XFER-{}", &batch_id.to_string()[..8]);
        let deficit_absorbed = self.aggregate.state().unbatched_deficit.min(qty);

        self.aggregate.raise(InventoryEvent::StockTransferReceived {
            batch_id,
            batch_number,
            received_qty: qty,
            unit_cost,
            source_site_id,
            transfer_id,
            deficit_absorbed,
            at: now,
        });
        self.commit().await?;

        self.publish_inventory(
            InventoryStreamKind::TransferStatus {
                transfer_id,
                status: "received".to_string(),
            },
            now,
        );
        Ok(batch_id)
    }

    pub async fn reverse_consumption(
        &mut self,
        original_movement_id: Uuid,
        by: String,
        reason: String,
    ) -> CoreResult<Fixed> {
        self.require_initialized()?;
        let original = self
            .aggregate
            .state()
            .movements
            .iter()
            .find(|m| m.id == original_movement_id && m.kind == MovementKind::Consumption)
            .cloned()
            .ok_or_else(|| {
                CoreError::precondition(
                    "original consumption movement not found (may have aged out of the log)",
                )
            })?;
        let now = self.clock.now();
        let restock_batch_id = self.new_id();
        let movement_id = self.new_id();
        let unit_cost = self.aggregate.state().wac;
        let qty = original.qty;

        self.aggregate.raise(InventoryEvent::ConsumptionReversed {
            movement_id,
            original_movement_id,
            restock_batch_id,
            qty,
            unit_cost,
            reason,
            by,
            at: now,
        });
        self.commit().await?;
        Ok(qty)
    }

    pub async fn reverse_order_consumption(
        &mut self,
        order_id: Uuid,
        by: String,
        reason: String,
    ) -> CoreResult<Fixed> {
        self.require_initialized()?;
        let state = self.aggregate.state();
        let matches: Vec<_> = state
            .movements
            .iter()
            .filter(|m| m.kind == MovementKind::Consumption && m.order_id == Some(order_id))
            .cloned()
            .collect();
        if matches.is_empty() {
            return Err(CoreError::precondition(format!(
                "no consumption movements found for order {order_id}"
            )));
        }
        let qty = matches.iter().fold(Fixed::ZERO, |acc, m| acc + m.qty);
        let reversed_count = matches.len();
        let now = self.clock.now();
        let restock_batch_id = self.new_id();
        let movement_id = self.new_id();
        let unit_cost = state.wac;

        self.aggregate.raise(InventoryEvent::OrderConsumptionReversed {
            movement_id,
            order_id,
            restock_batch_id,
            qty,
            unit_cost,
            reversed_count,
            reason,
            by,
            at: now,
        });
        self.commit().await?;
        Ok(qty)
    }

    pub async fn write_off_expired_batches(&mut self, by: String) -> CoreResult<usize> {
        self.require_initialized()?;
        let now = self.clock.now();
        let before_level = self.aggregate.state().stock_level();
        let state = self.aggregate.state();
        let expired: Vec<&StockBatch> = state
            .batches
            .iter()
            .filter(|b| b.is_active() && b.expiry_date.map(|e| e < now).unwrap_or(false))
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        let batch_ids: Vec<Uuid> = expired.iter().map(|b| b.id).collect();
        let qty = expired.iter().fold(Fixed::ZERO, |acc, b| acc + b.qty);
        let cost = expired.iter().fold(Fixed::ZERO, |acc, b| acc + b.qty * b.unit_cost);
        let count = batch_ids.len();
        let movement_id = self.new_id();

        self.aggregate.raise(InventoryEvent::ExpiredBatchesWrittenOff {
            movement_id,
            batch_ids,
            qty,
            cost,
            by,
            at: now,
        });
        self.maybe_raise_level_alert(before_level, now);
        self.commit().await?;
        self.publish_alert_if_crossed(before_level, now);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::InMemoryEventLogStore;
    use crate::clock::{FixedClock, SeededRandomness};

    fn actor() -> InventoryActor {
        InventoryActor {
            key: ActorKey::inventory("org1", "site1", "flour"),
            aggregate: EventSourcedAggregate::new(),
            store: Arc::new(InMemoryEventLogStore::new()),
            bus: Arc::new(StreamBus::new()),
            clock: Arc::new(FixedClock::new(Utc::now())),
            randomness: Arc::new(SeededRandomness::new(7)),
        }
    }

    async fn initialized_actor() -> InventoryActor {
        let mut a = actor();
        a.initialize(
            "Flour".to_string(),
            "SKU-1".to_string(),
            "kg".to_string(),
            "dry-goods".to_string(),
            Fixed::from_f64(5.0),
            Fixed::from_f64(50.0),
        )
        .await
        .unwrap();
        a
    }

    #[tokio::test]
    async fn receive_then_consume_follows_fifo_and_updates_wac() {
        let mut a = initialized_actor().await;
        a.receive(Fixed::from_f64(10.0), Fixed::from_f64(2.0), None, None, None, None, None, None)
            .await
            .unwrap();
        a.receive(Fixed::from_f64(10.0), Fixed::from_f64(4.0), None, None, None, None, None, None)
            .await
            .unwrap();
        assert_eq!(a.state().on_hand, Fixed::from_f64(20.0));
        assert!((a.state().wac.to_f64() - 3.0).abs() < 1e-6);

        let breakdown = a
            .consume(Fixed::from_f64(12.0), "recipe".to_string(), None, None)
            .await
            .unwrap();
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].qty, Fixed::from_f64(10.0));
        assert_eq!(breakdown[1].qty, Fixed::from_f64(2.0));
        assert_eq!(a.state().on_hand, Fixed::from_f64(8.0));
    }

    #[tokio::test]
    async fn consume_beyond_stock_creates_unbatched_deficit() {
        let mut a = initialized_actor().await;
        a.receive(Fixed::from_f64(5.0), Fixed::from_f64(1.0), None, None, None, None, None, None)
            .await
            .unwrap();
        a.consume(Fixed::from_f64(8.0), "recipe".to_string(), None, None)
            .await
            .unwrap();
        assert_eq!(a.state().unbatched_deficit, Fixed::from_f64(3.0));
        assert_eq!(a.state().on_hand, Fixed::from_f64(-3.0));
    }

    #[tokio::test]
    async fn subsequent_receive_absorbs_outstanding_deficit_first() {
        let mut a = initialized_actor().await;
        a.receive(Fixed::from_f64(5.0), Fixed::from_f64(1.0), None, None, None, None, None, None)
            .await
            .unwrap();
        a.consume(Fixed::from_f64(8.0), "recipe".to_string(), None, None)
            .await
            .unwrap();
        let batch_id = a
            .receive(Fixed::from_f64(10.0), Fixed::from_f64(1.0), None, None, None, None, None, None)
            .await
            .unwrap();
        assert_eq!(a.state().unbatched_deficit, Fixed::ZERO);
        assert_eq!(a.state().on_hand, Fixed::from_f64(7.0));
        let batch = a.state().batches.iter().find(|b| b.id == batch_id).unwrap();
        assert_eq!(batch.qty, Fixed::from_f64(7.0));
        assert_eq!(batch.original_qty, Fixed::from_f64(10.0));
    }

    #[tokio::test]
    async fn transfer_out_refuses_when_available_is_insufficient() {
        let mut a = initialized_actor().await;
        a.receive(Fixed::from_f64(3.0), Fixed::from_f64(1.0), None, None, None, None, None, None)
            .await
            .unwrap();
        let result = a
            .transfer_out(Fixed::from_f64(5.0), "site2".to_string(), Uuid::new_v4(), "mgr".to_string())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reverse_order_consumption_aggregates_all_matching_movements() {
        let mut a = initialized_actor().await;
        a.receive(Fixed::from_f64(20.0), Fixed::from_f64(1.0), None, None, None, None, None, None)
            .await
            .unwrap();
        let order_id = Uuid::new_v4();
        a.consume(Fixed::from_f64(3.0), "order".to_string(), Some(order_id), None)
            .await
            .unwrap();
        a.consume(Fixed::from_f64(2.0), "order".to_string(), Some(order_id), None)
            .await
            .unwrap();
        let on_hand_before = a.state().on_hand;

        let restored = a
            .reverse_order_consumption(order_id, "mgr".to_string(), "void".to_string())
            .await
            .unwrap();
        assert_eq!(restored, Fixed::from_f64(5.0));
        assert_eq!(a.state().on_hand, on_hand_before + Fixed::from_f64(5.0));
    }

    #[tokio::test]
    async fn replay_reproduces_committed_state() {
        let mut a = initialized_actor().await;
        a.receive(Fixed::from_f64(10.0), Fixed::from_f64(2.0), None, None, None, None, None, None)
            .await
            .unwrap();
        a.consume(Fixed::from_f64(4.0), "recipe".to_string(), None, None)
            .await
            .unwrap();

        let replayed = InventoryActor::load(
            ActorKey::inventory("org1", "site1", "flour"),
            a.store.clone(),
            Arc::new(StreamBus::new()),
            a.clock.clone(),
            a.randomness.clone(),
        )
        .await
        .unwrap();
        assert_eq!(replayed.state().on_hand, a.state().on_hand);
        assert_eq!(replayed.state().batches.len(), a.state().batches.len());
    }
}
