//! C9: the stock-take actor (spec.md §4.9): freeze-count-approve-adjust.

pub mod actor;
pub mod events;
pub mod types;

pub use actor::{StockTakeActor, StockTakeState};
pub use events::StockTakeEvent;
pub use types::{classify_severity, variance_pct, StockTakeLine, StockTakeStatus, VarianceSeverity};
