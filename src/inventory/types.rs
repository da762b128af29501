//! Inventory data model (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::money::Fixed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Active,
    Exhausted,
    Expired,
    WrittenOff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockBatch {
    pub id: Uuid,
    pub batch_number: String,
    pub received_at: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub qty: Fixed,
    /// The whole quantity originally received, even when part of that
    /// quantity went to cancel an existing deficit rather than into this
    /// batch (spec.md §9 Open Questions: preserved as observed, not "fixed").
    pub original_qty: Fixed,
    pub unit_cost: Fixed,
    pub total_cost: Fixed,
    pub status: BatchStatus,
    pub supplier: Option<String>,
    pub delivery: Option<String>,
    pub location: Option<String>,
    pub sku_id: Option<String>,
}

impl StockBatch {
    pub fn is_active(&self) -> bool {
        self.status == BatchStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockLevel {
    OutOfStock,
    Low,
    Normal,
    AbovePar,
}

impl StockLevel {
    /// Ordering from worst to best stock position: `OutOfStock < Low <
    /// Normal < AbovePar`. Used to tell a depleting transition (alert-
    /// worthy) from a replenishing one (not), since both can flip the
    /// level across the `Low`/`OutOfStock` boundary.
    fn severity_rank(self) -> u8 {
        match self {
            StockLevel::OutOfStock => 0,
            StockLevel::Low => 1,
            StockLevel::Normal => 2,
            StockLevel::AbovePar => 3,
        }
    }

    /// `true` iff `self` is strictly worse than `other` (spec.md §4.7
    /// "Detect level transitions" is scoped to consumption-like
    /// operations moving stock down, not replenishment moving it up).
    pub fn is_worse_than(self, other: StockLevel) -> bool {
        self.severity_rank() < other.severity_rank()
    }
}

pub fn derive_stock_level(available: Fixed, reorder_point: Fixed, par_level: Fixed) -> StockLevel {
    if available <= Fixed::ZERO {
        StockLevel::OutOfStock
    } else if available <= reorder_point {
        StockLevel::Low
    } else if par_level > Fixed::ZERO && available > par_level {
        StockLevel::AbovePar
    } else {
        StockLevel::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementKind {
    Receipt,
    Consumption,
    Waste,
    Adjustment,
    TransferOut,
    TransferIn,
    Reversal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementEntry {
    pub id: Uuid,
    pub kind: MovementKind,
    pub qty: Fixed,
    pub reason: String,
    pub order_id: Option<Uuid>,
    pub performed_by: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionBreakdownLine {
    pub batch_id: Uuid,
    pub qty: Fixed,
    pub unit_cost: Fixed,
    pub cost: Fixed,
}

impl ConsumptionBreakdownLine {
    pub fn new(batch_id: Uuid, qty: Fixed, unit_cost: Fixed) -> Self {
        Self {
            batch_id,
            qty,
            unit_cost,
            cost: qty * unit_cost,
        }
    }
}

pub type Metadata = HashMap<String, String>;
