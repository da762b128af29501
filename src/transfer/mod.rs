//! C8: the inter-site transfer coordinator (spec.md §4.8).

pub mod actor;
pub mod events;
pub mod types;

pub use actor::{TransferActor, TransferState};
pub use events::TransferEvent;
pub use types::{TransferLine, TransferStatus};
