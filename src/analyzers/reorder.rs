//! Reorder suggestion generator (spec.md §4.12): turns daily usage and
//! lead time into an urgency band, a rounded-up suggested order quantity,
//! and an economic order quantity where the inputs permit one.

use std::sync::Arc;

use crate::actor::EventLogStore;
use crate::clock::{Clock, Randomness};
use crate::error::CoreResult;
use crate::inventory::{InventoryActor, InventoryEvent, InventoryState};
use crate::keys::ActorKey;
use crate::money::Fixed;
use crate::streams::StreamBus;

use super::usage::daily_usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderUrgency {
    OutOfStock,
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy)]
pub struct ReorderConfig {
    pub analysis_period_days: i64,
    pub lead_time_days: f64,
    pub safety_stock: Fixed,
    pub ordering_cost: Option<Fixed>,
    pub holding_cost: Option<Fixed>,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            analysis_period_days: 30,
            lead_time_days: 3.0,
            safety_stock: Fixed::ZERO,
            ordering_cost: None,
            holding_cost: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReorderSuggestion {
    pub ingredient_id: String,
    pub on_hand: Fixed,
    pub daily_usage: Fixed,
    pub days_of_supply: Option<f64>,
    pub urgency: ReorderUrgency,
    pub suggested_qty: i64,
    pub economic_order_qty: Option<i64>,
}

fn urgency_for(on_hand: Fixed, reorder_point: Fixed, days_of_supply: Option<f64>, lead_time_days: f64) -> ReorderUrgency {
    if on_hand.is_zero() || on_hand.is_negative() {
        return ReorderUrgency::OutOfStock;
    }
    if let Some(days) = days_of_supply {
        if days <= lead_time_days / 2.0 {
            return ReorderUrgency::Critical;
        }
        if days <= lead_time_days {
            return ReorderUrgency::High;
        }
        if days <= lead_time_days * 1.5 {
            return ReorderUrgency::Medium;
        }
    }
    if on_hand <= reorder_point {
        return ReorderUrgency::Medium;
    }
    ReorderUrgency::Low
}

/// `max(parLevel, dailyUsage·leadTime·2) + safetyStock − onHand`, floored
/// at zero and rounded up to a whole unit (spec.md §4.12).
fn suggested_qty(state: &InventoryState, daily: Fixed, config: &ReorderConfig) -> i64 {
    let lead_time = Fixed::from_f64(config.lead_time_days);
    let two = Fixed::from_f64(2.0);
    let demand_based = daily * lead_time * two;
    let base = state.par_level.max(demand_based);
    (base + config.safety_stock - state.on_hand).ceil_units()
}

/// `sqrt(2·annualDemand·orderingCost / holdingCost)`, falling back to
/// `parLevel - onHand` when ordering/holding cost aren't configured or
/// holding cost is zero (spec.md §4.12).
fn economic_order_qty(state: &InventoryState, daily: Fixed, config: &ReorderConfig) -> Option<i64> {
    match (config.ordering_cost, config.holding_cost) {
        (Some(ordering_cost), Some(holding_cost)) if holding_cost.is_positive() => {
            let annual_demand = daily.to_f64() * 365.0;
            let eoq = (2.0 * annual_demand * ordering_cost.to_f64() / holding_cost.to_f64()).sqrt();
            Some(Fixed::from_f64(eoq).ceil_units())
        }
        _ => {
            let fallback = state.par_level - state.on_hand;
            Some(fallback.ceil_units())
        }
    }
}

pub struct ReorderSuggestionGenerator {
    store: Arc<dyn EventLogStore<InventoryEvent>>,
    bus: Arc<StreamBus>,
    clock: Arc<dyn Clock>,
    randomness: Arc<dyn Randomness>,
    config: ReorderConfig,
}

impl ReorderSuggestionGenerator {
    pub fn new(
        store: Arc<dyn EventLogStore<InventoryEvent>>,
        bus: Arc<StreamBus>,
        clock: Arc<dyn Clock>,
        randomness: Arc<dyn Randomness>,
        config: ReorderConfig,
    ) -> Self {
        Self {
            store,
            bus,
            clock,
            randomness,
            config,
        }
    }

    pub async fn generate(&self, ingredients: &[ActorKey]) -> CoreResult<Vec<ReorderSuggestion>> {
        let now = self.clock.now();
        let mut suggestions = Vec::with_capacity(ingredients.len());
        for key in ingredients {
            let ActorKey::Inventory { ingredient_id, .. } = key else {
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
            let state = actor.state();
            // Full event-log replay for usage, not the bounded 100-entry
            // movement log on `InventoryState` (spec.md line 201).
            let events = self.store.read_all(&key.to_key_string()).await?;
            let daily = daily_usage(&events, self.config.analysis_period_days, now);
            let days_of_supply = if daily.is_positive() {
                Some(state.on_hand.to_f64() / daily.to_f64())
            } else {
                None
            };
            let urgency = urgency_for(state.on_hand, state.reorder_point, days_of_supply, self.config.lead_time_days);
            suggestions.push(ReorderSuggestion {
                ingredient_id: ingredient_id.clone(),
                on_hand: state.on_hand,
                daily_usage: daily,
                days_of_supply,
                urgency,
                suggested_qty: suggested_qty(state, daily, &self.config).max(0),
                economic_order_qty: economic_order_qty(state, daily, &self.config),
            });
        }
        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::InMemoryEventLogStore;
    use crate::clock::{FixedClock, SeededRandomness};
    use chrono::Utc;

    async fn seed_with_usage(
        store: &Arc<dyn EventLogStore<InventoryEvent>>,
        bus: &Arc<StreamBus>,
        clock: Arc<dyn Clock>,
        ingredient_id: &str,
    ) {
        let randomness: Arc<dyn Randomness> = Arc::new(SeededRandomness::new(6));
        let key = ActorKey::inventory("org1", "site1", ingredient_id);
        let mut actor = InventoryActor::load(key, store.clone(), bus.clone(), clock.clone(), randomness.clone())
            .await
            .unwrap();
        actor
            .initialize(
                ingredient_id.to_string(),
                "SKU".to_string(),
                "kg".to_string(),
                "dairy".to_string(),
                Fixed::from_f64(10.0),
                Fixed::from_f64(50.0),
            )
            .await
            .unwrap();
        actor
            .receive(Fixed::from_f64(100.0), Fixed::from_f64(1.0), None, None, None, None, None, None)
            .await
            .unwrap();
        actor
            .consume(Fixed::from_f64(90.0), "daily sales".to_string(), None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn low_days_of_supply_yields_critical_urgency() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now));
        let store: Arc<dyn EventLogStore<InventoryEvent>> = Arc::new(InMemoryEventLogStore::new());
        let bus = Arc::new(StreamBus::new());
        seed_with_usage(&store, &bus, clock.clone(), "flour").await;

        let generator = ReorderSuggestionGenerator::new(
            store,
            bus,
            clock,
            Arc::new(SeededRandomness::new(7)),
            ReorderConfig {
                analysis_period_days: 1,
                lead_time_days: 3.0,
                ..ReorderConfig::default()
            },
        );
        let suggestions = generator.generate(&[ActorKey::inventory("org1", "site1", "flour")]).await.unwrap();
        assert_eq!(suggestions.len(), 1);
        // on_hand = 10, daily_usage = 90/1 = 90, days_of_supply ~= 0.11 <= lead_time/2 (1.5)
        assert_eq!(suggestions[0].urgency, ReorderUrgency::Critical);
        assert!(suggestions[0].suggested_qty >= 0);
    }

    #[tokio::test]
    async fn zero_on_hand_is_out_of_stock() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now));
        let store: Arc<dyn EventLogStore<InventoryEvent>> = Arc::new(InMemoryEventLogStore::new());
        let bus = Arc::new(StreamBus::new());
        let randomness: Arc<dyn Randomness> = Arc::new(SeededRandomness::new(8));
        let key = ActorKey::inventory("org1", "site1", "sugar");
        let mut actor = InventoryActor::load(key.clone(), store.clone(), bus.clone(), clock.clone(), randomness)
            .await
            .unwrap();
        actor
            .initialize("sugar".to_string(), "SKU".to_string(), "kg".to_string(), "dry".to_string(), Fixed::from_f64(5.0), Fixed::from_f64(20.0))
            .await
            .unwrap();

        let generator = ReorderSuggestionGenerator::new(
            store,
            bus,
            clock,
            Arc::new(SeededRandomness::new(9)),
            ReorderConfig::default(),
        );
        let suggestions = generator.generate(&[key]).await.unwrap();
        assert_eq!(suggestions[0].urgency, ReorderUrgency::OutOfStock);
    }

    #[test]
    fn eoq_falls_back_to_par_minus_on_hand_without_cost_inputs() {
        let mut state = InventoryState::default();
        state.par_level = Fixed::from_f64(50.0);
        state.on_hand = Fixed::from_f64(20.0);
        let config = ReorderConfig::default();
        let eoq = economic_order_qty(&state, Fixed::ZERO, &config).unwrap();
        assert_eq!(eoq, 30);
    }
}
