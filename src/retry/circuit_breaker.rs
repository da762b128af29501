//! Per-processor circuit breaker (spec.md §4.5, §5, §9).
//!
//! Grounded in `scrapers::binance_session::EndpointRotator`'s per-endpoint
//! `EndpointState` (consecutive failures + `circuit_open_until`),
//! generalized from "per endpoint index" to "per processor id" and kept in
//! a process-global registry the spec calls out explicitly: "a
//! thread-safe cache per processor key... an optimization and can be
//! rebuilt on restart."

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

const TRIP_THRESHOLD: u32 = 5;
const DEFAULT_RESET_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct ProcessorState {
    consecutive_failures: u32,
    state: CircuitState,
    open_until: Option<DateTime<Utc>>,
    reset_after: Duration,
}

impl ProcessorState {
    fn new(reset_after: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            state: CircuitState::Closed,
            open_until: None,
            reset_after,
        }
    }
}

/// Process-wide registry of circuit-breaker state, one entry per processor
/// id. Rebuildable on restart — it is deliberately not persisted.
pub struct CircuitBreakerRegistry {
    processors: RwLock<HashMap<String, ProcessorState>>,
    reset_after: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            processors: RwLock::new(HashMap::new()),
            reset_after: DEFAULT_RESET_AFTER,
        }
    }

    pub fn with_reset_after(reset_after: Duration) -> Self {
        Self {
            processors: RwLock::new(HashMap::new()),
            reset_after,
        }
    }

    /// Whether a request to `processor` should be allowed through right
    /// now. Transitions `Open -> HalfOpen` as a side effect once
    /// `reset_after` has elapsed, admitting exactly one probe.
    pub fn allow_request(&self, processor: &str, now: DateTime<Utc>) -> bool {
        let mut processors = self.processors.write();
        let entry = processors
            .entry(processor.to_string())
            .or_insert_with(|| ProcessorState::new(self.reset_after));

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false, // a probe is already in flight
            CircuitState::Open => {
                if entry.open_until.map(|until| now >= until).unwrap_or(true) {
                    entry.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, processor: &str) {
        let mut processors = self.processors.write();
        let entry = processors
            .entry(processor.to_string())
            .or_insert_with(|| ProcessorState::new(self.reset_after));
        entry.consecutive_failures = 0;
        entry.state = CircuitState::Closed;
        entry.open_until = None;
    }

    pub fn record_failure(&self, processor: &str, now: DateTime<Utc>) {
        let mut processors = self.processors.write();
        let entry = processors
            .entry(processor.to_string())
            .or_insert_with(|| ProcessorState::new(self.reset_after));
        entry.consecutive_failures += 1;

        let should_trip = entry.state == CircuitState::HalfOpen || entry.consecutive_failures >= TRIP_THRESHOLD;
        if should_trip {
            entry.state = CircuitState::Open;
            entry.open_until = Some(now + chrono::Duration::from_std(entry.reset_after).unwrap());
        }
    }

    pub fn state_of(&self, processor: &str) -> CircuitState {
        self.processors
            .read()
            .get(processor)
            .map(|p| p.state)
            .unwrap_or(CircuitState::Closed)
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_five_consecutive_failures() {
        let registry = CircuitBreakerRegistry::new();
        let now = Utc::now();
        for _ in 0..4 {
            registry.record_failure("cloud-tss", now);
        }
        assert_eq!(registry.state_of("cloud-tss"), CircuitState::Closed);
        registry.record_failure("cloud-tss", now);
        assert_eq!(registry.state_of("cloud-tss"), CircuitState::Open);
        assert!(!registry.allow_request("cloud-tss", now));
    }

    #[test]
    fn half_open_after_reset_and_recovers_on_success() {
        let registry = CircuitBreakerRegistry::with_reset_after(Duration::from_secs(30));
        let now = Utc::now();
        for _ in 0..5 {
            registry.record_failure("cloud-tss", now);
        }
        assert_eq!(registry.state_of("cloud-tss"), CircuitState::Open);

        let later = now + chrono::Duration::seconds(31);
        assert!(registry.allow_request("cloud-tss", later));
        assert_eq!(registry.state_of("cloud-tss"), CircuitState::HalfOpen);

        registry.record_success("cloud-tss");
        assert_eq!(registry.state_of("cloud-tss"), CircuitState::Closed);
        assert!(registry.allow_request("cloud-tss", later));
    }

    #[test]
    fn half_open_probe_failure_reopens_with_fresh_window() {
        let registry = CircuitBreakerRegistry::with_reset_after(Duration::from_secs(30));
        let now = Utc::now();
        for _ in 0..5 {
            registry.record_failure("cloud-tss", now);
        }
        let later = now + chrono::Duration::seconds(31);
        assert!(registry.allow_request("cloud-tss", later));
        registry.record_failure("cloud-tss", later);
        assert_eq!(registry.state_of("cloud-tss"), CircuitState::Open);
        assert!(!registry.allow_request("cloud-tss", later));
    }

    #[test]
    fn success_resets_failure_counter_in_closed_state() {
        let registry = CircuitBreakerRegistry::new();
        let now = Utc::now();
        registry.record_failure("p", now);
        registry.record_failure("p", now);
        registry.record_success("p");
        registry.record_failure("p", now);
        registry.record_failure("p", now);
        registry.record_failure("p", now);
        registry.record_failure("p", now);
        assert_eq!(registry.state_of("p"), CircuitState::Closed);
    }
}
