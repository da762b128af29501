//! Events for the inter-site transfer state machine (spec.md §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Fixed;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedLine {
    pub ingredient_id: String,
    pub requested_qty: Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferEvent {
    Requested {
        source_site_id: String,
        destination_site_id: String,
        lines: Vec<RequestedLine>,
        requested_by: String,
        at: DateTime<Utc>,
    },
    Approved {
        approved_by: String,
        at: DateTime<Utc>,
    },
    Rejected {
        rejected_by: String,
        reason: String,
        at: DateTime<Utc>,
    },
    Shipped {
        shipped_qty_by_ingredient: Vec<(String, Fixed, Fixed)>, // (ingredient_id, qty, unit_cost)
        total_shipped_value: Fixed,
        shipped_by: String,
        at: DateTime<Utc>,
    },
    ItemReceived {
        ingredient_id: String,
        received_qty: Fixed,
        by: String,
        at: DateTime<Utc>,
    },
    ReceiptFinalized {
        auto_filled_ingredient_ids: Vec<String>,
        total_received_value: Fixed,
        total_variance_value: Fixed,
        finalized_by: String,
        at: DateTime<Utc>,
    },
    Cancelled {
        cancelled_by: String,
        reason: String,
        compensated: bool,
        at: DateTime<Utc>,
    },
}
