//! Shared consumption-rate helper for the ABC classifier and reorder
//! suggestion generator (spec.md §4.12): both need "how much of this
//! ingredient got used over the analysis window".
//!
//! Reads the ingredient's full event log rather than `InventoryState`'s
//! bounded 100-entry movement log (spec.md line 201: movements are "bounded
//! to 100 most recent entries... older data lives in the event log").
//! Either analyzer's window (90 days default for ABC, 30 for reorder) can
//! easily span more than 100 movements for a fast-moving ingredient, in
//! which case the bounded list would silently undercount consumption; the
//! event log has no such bound.

use chrono::{DateTime, Duration, Utc};

use crate::inventory::InventoryEvent;
use crate::money::Fixed;

pub(crate) fn consumed_qty_since(events: &[InventoryEvent], since: DateTime<Utc>) -> Fixed {
    events
        .iter()
        .filter_map(|e| match e {
            InventoryEvent::StockConsumed { qty, at, .. } if *at >= since => Some(*qty),
            _ => None,
        })
        .fold(Fixed::ZERO, |acc, qty| acc + qty)
}

/// Average daily usage over `period_days` ending now. `period_days <= 0`
/// has no window to average over and reads as zero usage.
pub(crate) fn daily_usage(events: &[InventoryEvent], period_days: i64, now: DateTime<Utc>) -> Fixed {
    if period_days <= 0 {
        return Fixed::ZERO;
    }
    let since = now - Duration::days(period_days);
    consumed_qty_since(events, since) / Fixed::from_f64(period_days as f64)
}
