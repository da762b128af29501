//! Stream-carried integration events (spec.md §4.3, §6).
//!
//! These are distinct from the internal, event-sourced `Aggregate::Event`
//! types each aggregate module defines for its own log: a `StreamEvent` is
//! what gets published for other actors to consume, built from internal
//! aggregate events after commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inventory::types::ConsumptionBreakdownLine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    Inventory(InventoryStreamEvent),
    Alert(AlertStreamEvent),
    FiscalTse(FiscalTseStreamEvent),
    Fiskaly(FiskalyStreamEvent),
    Order(OrderStreamEvent),
}

impl StreamEvent {
    /// Namespace names are bit-exact from spec.md §4.3.
    pub fn namespace(&self) -> &'static str {
        match self {
            StreamEvent::Inventory(_) => "inventory-events",
            StreamEvent::Alert(_) => "alert-events",
            StreamEvent::FiscalTse(_) => "fiscal-tse-events",
            StreamEvent::Fiskaly(_) => "fiskaly-events",
            StreamEvent::Order(_) => "order-events",
        }
    }

    pub fn org_id(&self) -> &str {
        match self {
            StreamEvent::Inventory(e) => &e.org_id,
            StreamEvent::Alert(e) => &e.org_id,
            StreamEvent::FiscalTse(e) => &e.org_id,
            StreamEvent::Fiskaly(e) => &e.org_id,
            StreamEvent::Order(e) => &e.org_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryStreamEvent {
    pub org_id: String,
    pub site_id: String,
    pub ingredient_id: String,
    pub at: DateTime<Utc>,
    pub kind: InventoryStreamKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InventoryStreamKind {
    StockReceived {
        batch_id: uuid::Uuid,
        qty: f64,
        on_hand: f64,
        wac: f64,
    },
    StockConsumed {
        qty: f64,
        total_cost: f64,
        breakdown: Vec<ConsumptionBreakdownLine>,
        on_hand_remaining: f64,
    },
    StockDepleted {
        on_hand: f64,
    },
    TransferStatus {
        transfer_id: uuid::Uuid,
        status: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertStreamEvent {
    pub org_id: String,
    pub site_id: String,
    pub ingredient_id: String,
    pub at: DateTime<Utc>,
    pub kind: AlertStreamKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlertStreamKind {
    ReorderPointBreached { available: f64, reorder_point: f64 },
    StockDepleted,
    Expiry { batch_id: uuid::Uuid, urgency: String, expiry_date: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalTseStreamEvent {
    pub org_id: String,
    pub tse_id: String,
    pub at: DateTime<Utc>,
    pub kind: FiscalTseStreamKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FiscalTseStreamKind {
    Started { transaction_number: u64 },
    Updated { transaction_number: u64 },
    Finished { transaction_number: u64, signature_counter: u64 },
    Failed { transaction_number: Option<u64>, error_code: String },
    SelfTest { passed: bool },
    ExternalResponseReceived { transaction_number: u64, accepted: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiskalyStreamEvent {
    pub org_id: String,
    pub transaction_number: u64,
    pub at: DateTime<Utc>,
    pub kind: FiskalyStreamKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FiskalyStreamKind {
    Completed { cloud_receipt_id: String },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStreamEvent {
    pub org_id: String,
    pub site_id: String,
    pub order_id: uuid::Uuid,
    pub at: DateTime<Utc>,
    pub kind: OrderStreamKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderStreamKind {
    Completed {
        tse_id: String,
        process_type: String,
        gross_amount: f64,
        net_amounts: Vec<(String, f64)>,
        tax_amounts: Vec<(String, f64)>,
        payment_types: Vec<(String, f64)>,
    },
    Voided,
}
