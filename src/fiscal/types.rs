//! Fiscal TSE data model (spec.md §3, §4.10).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External-TSS type selector (spec.md §4.10 "factory pattern"). `None`
/// keeps the internal HMAC provider active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalTseType {
    None,
    Fiskaly,
    Swissbit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalMapping {
    pub tse_type: ExternalTseType,
    pub enabled: bool,
    pub external_tss_id: Option<String>,
}

/// An in-flight signing transaction: created by `startTransaction`, mutated
/// by `updateTransaction`, removed by `finishTransaction` (spec.md §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TseTransactionContext {
    pub transaction_number: u64,
    pub process_type: String,
    pub process_data: String,
    pub client_id: Option<String>,
    pub start_time: DateTime<Utc>,
}

/// `yyyy-MM-ddTHH:mm:ss.fffZ`, UTC, milliseconds (spec.md §4.10). Chrono's
/// `%.3f` gives exactly three fractional digits.
pub fn format_tse_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
