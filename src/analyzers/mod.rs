//! C12: background analyzers over inventory state (spec.md §4.12).
//!
//! None of the three analyzers here owns a persistent aggregate of its
//! own. spec.md only ever mentions `Product`/`Sku`/`LocationRegistry` in
//! passing (§1) and never gives them their own data model or operations,
//! so "registered ingredients" is taken as context the caller already
//! has — a slice of `ActorKey::Inventory` — rather than a registry this
//! crate invents and owns. Each analyzer loads the named inventory
//! actors fresh on every run, the same way the fiscal coordinator (C11)
//! loads the TSE actor it drives.

pub mod abc;
pub mod expiry;
pub mod reorder;
mod usage;

pub use abc::{AbcClass, AbcClassifier, AbcConfig, AbcResult, ValueFunction};
pub use expiry::{ExpiryConfig, ExpiryMonitor, ExpiryUrgency, ExpiryWriteOffReport};
pub use reorder::{ReorderConfig, ReorderSuggestion, ReorderSuggestionGenerator, ReorderUrgency};
