//! C1: the virtual-actor runtime contract (spec.md §4.1).

pub mod grain;
pub mod host;
pub mod persistence;

pub use grain::{ActivationContext, Grain};
pub use host::ActorHost;
pub use persistence::{
    EventLogStore, InMemoryEventLogStore, InMemorySnapshotStore, SnapshotStore,
    SqliteEventLogStore, SqliteSnapshotStore,
};
