//! Time and randomness as injected capabilities (spec.md §9 "Time and
//! randomness"), so aggregate replay stays pure and signature payloads can
//! be tested deterministically (spec.md §8 scenario 4).

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait Randomness: Send + Sync {
    /// Fill `buf` with random bytes, e.g. for TSE signing-key generation.
    fn fill_bytes(&self, buf: &mut [u8]);

    /// A random `u64`, used for jitter and opaque key suffixes.
    fn next_u64(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Default)]
pub struct OsRandomness;

impl Randomness for OsRandomness {
    fn fill_bytes(&self, buf: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buf);
    }

    fn next_u64(&self) -> u64 {
        use rand::RngCore;
        rand::rngs::OsRng.next_u64()
    }
}

/// Deterministic clock for tests: starts at a fixed instant and advances
/// only when told to, so replay/signature tests are reproducible.
pub struct FixedClock {
    nanos_since_epoch: AtomicU64,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            nanos_since_epoch: AtomicU64::new(start.timestamp_nanos_opt().unwrap_or(0) as u64),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.nanos_since_epoch
            .fetch_add(millis * 1_000_000, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let nanos = self.nanos_since_epoch.load(Ordering::SeqCst) as i64;
        DateTime::from_timestamp(nanos / 1_000_000_000, (nanos % 1_000_000_000) as u32)
            .unwrap_or_else(Utc::now)
    }
}

/// Deterministic PRNG for tests (xorshift64, same construction the teacher
/// uses in `scrapers::binance_session::BackoffCalculator`).
pub struct SeededRandomness {
    state: std::sync::atomic::AtomicU64,
}

impl SeededRandomness {
    pub fn new(seed: u64) -> Self {
        Self {
            state: std::sync::atomic::AtomicU64::new(seed.max(1)),
        }
    }

    fn next(&self) -> u64 {
        let mut x = self.state.load(Ordering::SeqCst);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state.store(x, Ordering::SeqCst);
        x
    }
}

impl Randomness for SeededRandomness {
    fn fill_bytes(&self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            let bytes = self.next().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn next_u64(&self) -> u64 {
        self.next()
    }
}
