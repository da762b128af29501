//! C2: the event-sourced aggregate pattern (spec.md §4.2).
//!
//! Command handlers: validate preconditions against current state, raise
//! events (each raised event updates in-memory state immediately, pure,
//! via `Aggregate::apply`), call `confirm_events` to commit durably, then
//! emit side effects. Replay from an empty state through the full event
//! log must equal the state after the last commit (spec.md §8 invariant 4).

use crate::actor::EventLogStore;
use crate::error::CoreError;

/// A pure state machine: `apply` must not perform I/O, read the wall
/// clock, or use randomness — all of that is captured in the event at
/// raise time (spec.md §4.2).
pub trait Aggregate: Default + Clone + Send + Sync {
    type Event: Clone + Send + Sync;

    fn apply(&mut self, event: &Self::Event);
}

#[derive(Clone)]
pub struct EventSourcedAggregate<A: Aggregate> {
    state: A,
    pending: Vec<A::Event>,
    committed_count: usize,
}

impl<A: Aggregate> EventSourcedAggregate<A> {
    pub fn new() -> Self {
        Self {
            state: A::default(),
            pending: Vec::new(),
            committed_count: 0,
        }
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    /// Raise one event: applies it to in-memory state and queues it for
    /// the next `confirm_events` call. Strict ordering within one
    /// aggregate falls out of `pending` being a plain `Vec`.
    pub fn raise(&mut self, event: A::Event) {
        self.state.apply(&event);
        self.pending.push(event);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Durable commit. On failure the in-memory state has already been
    /// mutated by `raise`, so callers must treat any error here as fatal to
    /// the command (spec.md §7 `PersistenceFailure`: "the actor must not
    /// emit side effects"); the aggregate should be reloaded via `replay`
    /// rather than reused in-process after this fails.
    pub async fn confirm_events<S>(&mut self, store: &S, key: &str) -> Result<(), CoreError>
    where
        S: EventLogStore<A::Event>,
    {
        if self.pending.is_empty() {
            return Ok(());
        }
        store.append(key, &self.pending).await?;
        self.committed_count += self.pending.len();
        self.pending.clear();
        Ok(())
    }

    pub async fn replay<S>(store: &S, key: &str) -> Result<Self, CoreError>
    where
        S: EventLogStore<A::Event>,
    {
        let events = store.read_all(key).await?;
        let mut state = A::default();
        for event in &events {
            state.apply(event);
        }
        Ok(Self {
            committed_count: events.len(),
            state,
            pending: Vec::new(),
        })
    }
}

impl<A: Aggregate> Default for EventSourcedAggregate<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::InMemoryEventLogStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum CounterEvent {
        Incremented(i64),
        Decremented(i64),
    }

    #[derive(Debug, Clone, Default)]
    struct Counter {
        value: i64,
    }

    impl Aggregate for Counter {
        type Event = CounterEvent;
        fn apply(&mut self, event: &CounterEvent) {
            match event {
                CounterEvent::Incremented(n) => self.value += n,
                CounterEvent::Decremented(n) => self.value -= n,
            }
        }
    }

    #[tokio::test]
    async fn replay_equals_committed_state() {
        let store = InMemoryEventLogStore::<CounterEvent>::new();
        let mut agg = EventSourcedAggregate::<Counter>::new();
        agg.raise(CounterEvent::Incremented(5));
        agg.raise(CounterEvent::Decremented(2));
        agg.confirm_events(&store, "k1").await.unwrap();
        agg.raise(CounterEvent::Incremented(10));
        agg.confirm_events(&store, "k1").await.unwrap();

        assert_eq!(agg.state().value, 13);

        let replayed = EventSourcedAggregate::<Counter>::replay(&store, "k1")
            .await
            .unwrap();
        assert_eq!(replayed.state().value, agg.state().value);
    }
}
