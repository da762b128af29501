//! C10/C11: the TSE signing actor, its cloud-TSS adapter, the
//! per-transaction signing envelope, and the coordinator that wires order
//! events to a signing cycle (spec.md §4.10, §4.11).

pub mod cloud;
pub mod coordinator;
pub mod events;
pub mod transaction;
pub mod tse;
pub mod types;

pub use cloud::{CloudTssReceipt, FiskalyAdapter, TseCloudClient, TseCloudConfig, TssEnvironment, TssRegion};
pub use coordinator::{FiscalCoordinator, FiscalCoordinatorConfig, OrderFiscalLinkState};
pub use events::TseEvent;
pub use transaction::{FiscalTransactionActor, FiscalTransactionEvent, FiscalTransactionState, FiscalTransactionStatus};
pub use tse::{FinishedSignature, TseActor, TseState};
pub use types::{format_tse_time, ExternalMapping, ExternalTseType, TseTransactionContext};
