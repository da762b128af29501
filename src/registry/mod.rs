//! C13: per-site registries (spec.md §3, §4.13).
//!
//! Three snapshot-model grains — no event history is needed, only the
//! latest index matters, the same rationale as
//! [`crate::idempotency::IdempotencyService`]. Each is keyed per-site
//! ([`crate::keys::ActorKey::FiscalDeviceRegistry`],
//! `TransactionRegistry`, `LocationTree`).

pub mod device;
pub mod location;
pub mod transaction;

pub use device::{DeviceRegistry, DeviceRegistryState, RegisteredDevice};
pub use location::{LocationNode, LocationTree, LocationTreeState};
pub use transaction::{TransactionIndexEntry, TransactionRegistry, TransactionRegistryState};
