//! Events for the stock-take workflow (spec.md §4.2, §4.9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Fixed;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenLine {
    pub ingredient_id: String,
    pub theoretical_qty: Fixed,
    pub theoretical_wac: Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StockTakeEvent {
    Started {
        site_id: String,
        category_filter: Option<String>,
        ingredient_filter: Option<Vec<String>>,
        blind: bool,
        lines: Vec<FrozenLine>,
        started_by: String,
        at: DateTime<Utc>,
    },
    CountRecorded {
        ingredient_id: String,
        counted_qty: Fixed,
        variance: Fixed,
        variance_pct: Fixed,
        by: String,
        batch_number: Option<String>,
        location: Option<String>,
        notes: Option<String>,
        at: DateTime<Utc>,
    },
    SubmittedForApproval {
        by: String,
        at: DateTime<Utc>,
    },
    Finalized {
        approved_by: String,
        apply_adjustments: bool,
        notes: Option<String>,
        at: DateTime<Utc>,
    },
}
