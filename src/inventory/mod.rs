//! C6/C7: ingredient-level stock tracking over FIFO batches, with an
//! embedded ledger for atomic balance accounting (spec.md §3, §4.6, §4.7).

pub mod actor;
pub mod events;
pub mod ledger;
pub mod types;

pub use actor::{InventoryActor, InventoryState};
pub use events::InventoryEvent;
pub use ledger::{LedgerEntry, LedgerState};
pub use types::{
    derive_stock_level, BatchStatus, ConsumptionBreakdownLine, Metadata, MovementEntry,
    MovementKind, StockBatch, StockLevel,
};
