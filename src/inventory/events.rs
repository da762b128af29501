//! Internal, event-sourced aggregate events for the inventory actor
//! (spec.md §4.2, §4.7). Every field needed for deterministic replay is
//! carried on the event; `transitionState` never reads the clock or RNG.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::inventory::types::ConsumptionBreakdownLine;
use crate::money::Fixed;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InventoryEvent {
    Initialized {
        org_id: String,
        site_id: String,
        ingredient_id: String,
        name: String,
        sku: String,
        unit: String,
        category: String,
        reorder_point: Fixed,
        par_level: Fixed,
        at: DateTime<Utc>,
    },
    StockReceived {
        batch_id: Uuid,
        batch_number: String,
        received_qty: Fixed,
        unit_cost: Fixed,
        expiry_date: Option<DateTime<Utc>>,
        supplier_id: Option<String>,
        delivery_id: Option<String>,
        location: Option<String>,
        notes: Option<String>,
        sku_id: Option<String>,
        deficit_absorbed: Fixed,
        at: DateTime<Utc>,
    },
    StockConsumed {
        movement_id: Uuid,
        qty: Fixed,
        reason: String,
        order_id: Option<Uuid>,
        performed_by: Option<String>,
        breakdown: Vec<ConsumptionBreakdownLine>,
        deficit_added: Fixed,
        total_cost: Fixed,
        at: DateTime<Utc>,
    },
    StockWrittenOff {
        movement_id: Uuid,
        qty: Fixed,
        reason: String,
        category: Option<String>,
        recorded_by: String,
        breakdown: Vec<ConsumptionBreakdownLine>,
        deficit_added: Fixed,
        total_cost: Fixed,
        at: DateTime<Utc>,
    },
    StockAdjusted {
        movement_id: Uuid,
        new_qty: Fixed,
        variance: Fixed,
        reason: String,
        by: String,
        approved_by: Option<String>,
        deficit_cancelled: Fixed,
        adjustment_batch_id: Option<Uuid>,
        adjustment_batch_qty: Fixed,
        consumed_breakdown: Vec<ConsumptionBreakdownLine>,
        at: DateTime<Utc>,
    },
    StockTransferredOut {
        movement_id: Uuid,
        qty: Fixed,
        destination_site_id: String,
        transfer_id: Uuid,
        by: String,
        breakdown: Vec<ConsumptionBreakdownLine>,
        at: DateTime<Utc>,
    },
    StockTransferReceived {
        batch_id: Uuid,
        batch_number: String,
        received_qty: Fixed,
        unit_cost: Fixed,
        source_site_id: String,
        transfer_id: Uuid,
        deficit_absorbed: Fixed,
        at: DateTime<Utc>,
    },
    ConsumptionReversed {
        movement_id: Uuid,
        original_movement_id: Uuid,
        /// Reversed stock returns as a new batch at the current WAC rather
        /// than being spliced back into whichever batches originally
        /// covered the consumption (those may be partially depleted or
        /// fully exhausted by now); the id is minted by the command
        /// handler so `apply` stays pure.
        restock_batch_id: Uuid,
        qty: Fixed,
        unit_cost: Fixed,
        reason: String,
        by: String,
        at: DateTime<Utc>,
    },
    OrderConsumptionReversed {
        movement_id: Uuid,
        order_id: Uuid,
        restock_batch_id: Uuid,
        qty: Fixed,
        unit_cost: Fixed,
        reversed_count: usize,
        reason: String,
        by: String,
        at: DateTime<Utc>,
    },
    ExpiredBatchesWrittenOff {
        movement_id: Uuid,
        batch_ids: Vec<Uuid>,
        qty: Fixed,
        cost: Fixed,
        by: String,
        at: DateTime<Utc>,
    },
    /// Markers only — stock-level transitions don't themselves change
    /// state (the level is derived from `available`), but they are part
    /// of the durable history so a reader can see when an alert fired.
    LowStockAlertTriggered {
        available: Fixed,
        reorder_point: Fixed,
        at: DateTime<Utc>,
    },
    StockDepletedAlert {
        at: DateTime<Utc>,
    },
}
