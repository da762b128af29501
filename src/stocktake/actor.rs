//! The stock-take actor (spec.md §4.9): freeze theoretical quantities,
//! record counts, classify variance, and on finalize optionally push
//! count-based adjustments back into each ingredient's `InventoryActor`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::actor::EventLogStore;
use crate::aggregate::{Aggregate, EventSourcedAggregate};
use crate::clock::{Clock, Randomness};
use crate::error::{CoreError, CoreResult};
use crate::inventory::{InventoryActor, InventoryEvent};
use crate::keys::ActorKey;
use crate::money::Fixed;
use crate::stocktake::events::{FrozenLine, StockTakeEvent};
use crate::stocktake::types::{classify_severity, variance_pct, StockTakeLine, StockTakeStatus};
use crate::streams::StreamBus;

#[derive(Debug, Clone, Default)]
pub struct StockTakeState {
    pub org_id: String,
    pub site_id: String,
    pub stock_take_id: String,
    pub status: Option<StockTakeStatus>,
    pub blind: bool,
    pub category_filter: Option<String>,
    pub ingredient_filter: Option<Vec<String>>,
    pub lines: HashMap<String, StockTakeLine>,
    pub started_by: String,
}

impl StockTakeState {
    pub fn is_initialized(&self) -> bool {
        self.status.is_some()
    }

    /// Read-side view honoring blind-count masking (spec.md §4.9): theoretical
    /// quantity is hidden as 0 until `Finalized`.
    pub fn line_for_reader(&self, ingredient_id: &str) -> Option<StockTakeLine> {
        let line = self.lines.get(ingredient_id)?.clone();
        if self.blind && self.status != Some(StockTakeStatus::Finalized) {
            let mut masked = line;
            masked.theoretical_qty = Fixed::ZERO;
            masked.theoretical_wac = Fixed::ZERO;
            Some(masked)
        } else {
            Some(line)
        }
    }
}

impl Aggregate for StockTakeState {
    type Event = StockTakeEvent;

    fn apply(&mut self, event: &StockTakeEvent) {
        match event {
            StockTakeEvent::Started {
                site_id,
                category_filter,
                ingredient_filter,
                blind,
                lines,
                started_by,
                ..
            } => {
                self.site_id = site_id.clone();
                self.category_filter = category_filter.clone();
                self.ingredient_filter = ingredient_filter.clone();
                self.blind = *blind;
                self.started_by = started_by.clone();
                self.lines = lines
                    .iter()
                    .map(|l| {
                        (
                            l.ingredient_id.clone(),
                            StockTakeLine {
                                ingredient_id: l.ingredient_id.clone(),
                                theoretical_qty: l.theoretical_qty,
                                theoretical_wac: l.theoretical_wac,
                                counted_qty: None,
                                variance: None,
                                variance_pct: None,
                                severity: None,
                                batch_number: None,
                                location: None,
                                notes: None,
                                counted_by: None,
                            },
                        )
                    })
                    .collect();
                self.status = Some(StockTakeStatus::InProgress);
            }
            StockTakeEvent::CountRecorded {
                ingredient_id,
                counted_qty,
                variance,
                variance_pct,
                by,
                batch_number,
                location,
                notes,
                ..
            } => {
                if let Some(line) = self.lines.get_mut(ingredient_id) {
                    line.counted_qty = Some(*counted_qty);
                    line.variance = Some(*variance);
                    line.variance_pct = Some(*variance_pct);
                    line.severity = Some(classify_severity(*variance_pct));
                    line.batch_number = batch_number.clone();
                    line.location = location.clone();
                    line.notes = notes.clone();
                    line.counted_by = Some(by.clone());
                }
            }
            StockTakeEvent::SubmittedForApproval { .. } => {
                self.status = Some(StockTakeStatus::PendingApproval);
            }
            StockTakeEvent::Finalized { .. } => {
                self.status = Some(StockTakeStatus::Finalized);
            }
        }
    }
}

pub struct StockTakeActor {
    key: ActorKey,
    aggregate: EventSourcedAggregate<StockTakeState>,
    store: Arc<dyn EventLogStore<StockTakeEvent>>,
    inventory_store: Arc<dyn EventLogStore<InventoryEvent>>,
    bus: Arc<StreamBus>,
    clock: Arc<dyn Clock>,
    randomness: Arc<dyn Randomness>,
}

impl StockTakeActor {
    pub async fn load(
        key: ActorKey,
        store: Arc<dyn EventLogStore<StockTakeEvent>>,
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

    pub fn state(&self) -> &StockTakeState {
        self.aggregate.state()
    }

    fn org_id(&self) -> CoreResult<String> {
        match &self.key {
            ActorKey::StockTake { org_id, .. } => Ok(org_id.clone()),
            _ => Err(CoreError::precondition("not a stock-take key")),
        }
    }

    async fn commit(&mut self) -> CoreResult<()> {
        self.aggregate
            .confirm_events(self.store.as_ref(), &self.key.to_key_string())
            .await
    }

    async fn load_inventory(&self, site_id: &str, ingredient_id: &str) -> CoreResult<InventoryActor> {
        let org_id = self.org_id()?;
        InventoryActor::load(
            ActorKey::inventory(&org_id, site_id, ingredient_id),
            self.inventory_store.clone(),
            self.bus.clone(),
            self.clock.clone(),
            self.randomness.clone(),
        )
        .await
    }

    /// Freezes theoretical quantities (spec.md §4.9): reads each
    /// ingredient's current `on_hand`/`wac` from its `InventoryActor`. Once
    /// frozen these never change for the life of the session, even if the
    /// live inventory actor keeps moving.
    pub async fn start(
        &mut self,
        site_id: String,
        ingredient_ids: Vec<String>,
        category_filter: Option<String>,
        blind: bool,
        started_by: String,
    ) -> CoreResult<()> {
        if self.aggregate.state().is_initialized() {
            return Err(CoreError::conflict(format!(
                "{} already started",
                self.key.to_key_string()
            )));
        }
        if ingredient_ids.is_empty() {
            return Err(CoreError::precondition("a stock-take needs at least one ingredient"));
        }
        let mut lines = Vec::with_capacity(ingredient_ids.len());
        for ingredient_id in &ingredient_ids {
            let inv = self.load_inventory(&site_id, ingredient_id).await?;
            lines.push(FrozenLine {
                ingredient_id: ingredient_id.clone(),
                theoretical_qty: inv.state().on_hand,
                theoretical_wac: inv.state().wac,
            });
        }
        let now = self.clock.now();
        self.aggregate.raise(StockTakeEvent::Started {
            site_id,
            category_filter,
            ingredient_filter: Some(ingredient_ids),
            blind,
            lines,
            started_by,
            at: now,
        });
        self.commit().await
    }

    pub async fn record_count(
        &mut self,
        ingredient_id: String,
        counted_qty: Fixed,
        by: String,
        batch_number: Option<String>,
        location: Option<String>,
        notes: Option<String>,
    ) -> CoreResult<()> {
        match self.aggregate.state().status {
            Some(StockTakeStatus::InProgress) => {}
            _ => {
                return Err(CoreError::invalid_transition(
                    self.key.to_key_string(),
                    "counts can only be recorded while InProgress",
                ))
            }
        }
        let theoretical = self
            .aggregate
            .state()
            .lines
            .get(&ingredient_id)
            .ok_or_else(|| CoreError::precondition(format!("{ingredient_id} is not part of this stock-take")))?
            .theoretical_qty;
        let variance = counted_qty - theoretical;
        let pct = variance_pct(variance, theoretical);
        let now = self.clock.now();
        self.aggregate.raise(StockTakeEvent::CountRecorded {
            ingredient_id,
            counted_qty,
            variance,
            variance_pct: pct,
            by,
            batch_number,
            location,
            notes,
            at: now,
        });
        self.commit().await
    }

    pub async fn submit_for_approval(&mut self, by: String) -> CoreResult<()> {
        match self.aggregate.state().status {
            Some(StockTakeStatus::InProgress) => {}
            _ => {
                return Err(CoreError::invalid_transition(
                    self.key.to_key_string(),
                    "can only submit from InProgress",
                ))
            }
        }
        if !self.aggregate.state().lines.values().any(|l| l.counted_qty.is_some()) {
            return Err(CoreError::precondition("at least one count must be recorded before submission"));
        }
        let now = self.clock.now();
        self.aggregate.raise(StockTakeEvent::SubmittedForApproval { by, at: now });
        self.commit().await
    }

    /// On `apply_adjustments`, pushes a count-based adjustment into every
    /// counted line whose variance is non-zero (spec.md §4.9).
    pub async fn finalize(
        &mut self,
        approved_by: String,
        apply_adjustments: bool,
        notes: Option<String>,
    ) -> CoreResult<()> {
        match self.aggregate.state().status {
            Some(StockTakeStatus::PendingApproval) => {}
            _ => {
                return Err(CoreError::invalid_transition(
                    self.key.to_key_string(),
                    "can only finalize from PendingApproval",
                ))
            }
        }
        if apply_adjustments {
            let site_id = self.aggregate.state().site_id.clone();
            let to_adjust: Vec<(String, Fixed)> = self
                .aggregate
                .state()
                .lines
                .values()
                .filter(|l| l.variance.map(|v| !v.is_zero()).unwrap_or(false))
                .map(|l| (l.ingredient_id.clone(), l.counted_qty.unwrap()))
                .collect();
            for (ingredient_id, counted_qty) in to_adjust {
                let mut inv = self.load_inventory(&site_id, &ingredient_id).await?;
                inv.adjust_quantity(
                    counted_qty,
                    "stock_take".to_string(),
                    approved_by.clone(),
                    Some(approved_by.clone()),
                )
                .await?;
            }
        }
        let now = self.clock.now();
        self.aggregate.raise(StockTakeEvent::Finalized {
            approved_by,
            apply_adjustments,
            notes,
            at: now,
        });
        self.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::InMemoryEventLogStore;
    use crate::clock::{FixedClock, SeededRandomness};
    use crate::stocktake::types::VarianceSeverity;

    struct Harness {
        inventory_store: Arc<dyn EventLogStore<InventoryEvent>>,
        stocktake_store: Arc<dyn EventLogStore<StockTakeEvent>>,
        bus: Arc<StreamBus>,
        clock: Arc<dyn Clock>,
        randomness: Arc<dyn Randomness>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                inventory_store: Arc::new(InMemoryEventLogStore::new()),
                stocktake_store: Arc::new(InMemoryEventLogStore::new()),
                bus: Arc::new(StreamBus::new()),
                clock: Arc::new(FixedClock::new(Utc::now())),
                randomness: Arc::new(SeededRandomness::new(3)),
            }
        }

        async fn inventory(&self, ingredient: &str) -> InventoryActor {
            InventoryActor::load(
                ActorKey::inventory("org1", "site1", ingredient),
                self.inventory_store.clone(),
                self.bus.clone(),
                self.clock.clone(),
                self.randomness.clone(),
            )
            .await
            .unwrap()
        }

        async fn stocktake(&self, id: &str) -> StockTakeActor {
            StockTakeActor::load(
                ActorKey::stock_take("org1", "site1", id),
                self.stocktake_store.clone(),
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
    async fn finalize_with_adjustments_updates_inventory() {
        let h = Harness::new();
        let mut flour = h.inventory("flour").await;
        flour
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
        flour
            .receive(Fixed::from_f64(20.0), Fixed::from_f64(2.0), None, None, None, None, None, None)
            .await
            .unwrap();

        let mut take = h.stocktake("st1").await;
        take.start(
            "site1".into(),
            vec!["flour".to_string()],
            None,
            false,
            "mgr".into(),
        )
        .await
        .unwrap();

        take.record_count("flour".into(), Fixed::from_f64(18.0), "clerk".into(), None, None, None)
            .await
            .unwrap();
        let line = take.state().lines.get("flour").unwrap();
        assert_eq!(line.variance, Some(Fixed::from_f64(-2.0)));
        assert_eq!(line.severity, Some(VarianceSeverity::Critical));

        take.submit_for_approval("mgr".into()).await.unwrap();
        take.finalize("mgr".into(), true, None).await.unwrap();

        let flour_after = h.inventory("flour").await;
        assert_eq!(flour_after.state().on_hand, Fixed::from_f64(18.0));
    }

    #[tokio::test]
    async fn blind_mode_masks_theoretical_until_finalized() {
        let h = Harness::new();
        let mut sugar = h.inventory("sugar").await;
        sugar
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
        sugar
            .receive(Fixed::from_f64(10.0), Fixed::from_f64(1.0), None, None, None, None, None, None)
            .await
            .unwrap();

        let mut take = h.stocktake("st2").await;
        take.start("site1".into(), vec!["sugar".to_string()], None, true, "mgr".into())
            .await
            .unwrap();

        let masked = take.state().line_for_reader("sugar").unwrap();
        assert_eq!(masked.theoretical_qty, Fixed::ZERO);

        take.record_count("sugar".into(), Fixed::from_f64(10.0), "clerk".into(), None, None, None)
            .await
            .unwrap();
        take.submit_for_approval("mgr".into()).await.unwrap();
        take.finalize("mgr".into(), false, None).await.unwrap();

        let unmasked = take.state().line_for_reader("sugar").unwrap();
        assert_eq!(unmasked.theoretical_qty, Fixed::from_f64(10.0));
    }

    #[tokio::test]
    async fn submit_requires_at_least_one_count() {
        let h = Harness::new();
        let mut milk = h.inventory("milk").await;
        milk.initialize(
            "Milk".into(),
            "SKU-3".into(),
            "l".into(),
            "dairy".into(),
            Fixed::from_f64(5.0),
            Fixed::from_f64(50.0),
        )
        .await
        .unwrap();

        let mut take = h.stocktake("st3").await;
        take.start("site1".into(), vec!["milk".to_string()], None, false, "mgr".into())
            .await
            .unwrap();
        let result = take.submit_for_approval("mgr".into()).await;
        assert!(result.is_err());
    }
}
