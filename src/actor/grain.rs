//! Grain: the unit of identity and activation (spec.md §4.1).
//!
//! A grain is a single-keyed, single-threaded actor. The runtime guarantees
//! at most one live instance per key process-wide (`ActorHost` enforces
//! this via its activation table) and that only one command runs against
//! an instance at a time (the per-instance `tokio::sync::Mutex` in
//! `ActorHost` is the "implicit lock" spec.md §5 describes between
//! suspension points).

use async_trait::async_trait;
use std::fmt::Display;
use std::hash::Hash;

use crate::error::CoreResult;

/// Context handed to a grain at activation time: the clock/randomness
/// capabilities (spec.md §9) it must use instead of reading wall-clock
/// time or generating randomness directly, keeping `transitionState`
/// (aggregate::Aggregate::apply) pure.
pub struct ActivationContext {
    pub clock: std::sync::Arc<dyn crate::clock::Clock>,
    pub randomness: std::sync::Arc<dyn crate::clock::Randomness>,
}

#[async_trait]
pub trait Grain: Send + Sync + Sized + 'static {
    type Key: Clone + Eq + Hash + Send + Sync + Display + 'static;

    /// Called exactly once per activation, before any command is served.
    async fn activate(key: Self::Key, ctx: &ActivationContext) -> CoreResult<Self>;

    /// Called on logical deactivation (spec.md §3 "deactivation is logical
    /// and separately modeled" — this never deletes persisted state).
    async fn on_deactivate(&mut self) {}
}
