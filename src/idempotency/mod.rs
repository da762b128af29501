//! C4: idempotency service (spec.md §4.4).
//!
//! A per-organization snapshot-model grain (no event history needed — only
//! the latest record per key matters). Grounded in the teacher's
//! `auth::jwt::JwtHandler` for opaque-token generation style and
//! `vault::user_accounts::UserAccountsDB` for the `Arc<Mutex<...>>`
//! snapshot-store shape.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::actor::grain::{ActivationContext, Grain};
use crate::clock::Randomness;
use crate::error::{CoreError, CoreResult};

const DEFAULT_TTL_HOURS: i64 = 24;
const MAX_LIVE_KEYS: usize = 10_000;
const EVICTION_FRACTION: f64 = 0.10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyKeyRecord {
    pub key: String,
    pub operation: String,
    pub related_entity_id: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub successful: Option<bool>,
    pub result_hash: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdempotencyState {
    records: HashMap<String, IdempotencyKeyRecord>,
}

#[derive(Debug, Clone, Copy)]
pub struct CheckResult {
    pub exists: bool,
    pub used: bool,
    pub previous_success: Option<bool>,
}

/// One actor instance per organization; `org_id` is carried for log
/// context only, the state itself is keyed by the opaque idempotency key.
pub struct IdempotencyService {
    org_id: String,
    state: IdempotencyState,
}

impl IdempotencyService {
    pub fn new(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            state: IdempotencyState::default(),
        }
    }

    pub fn from_state(org_id: impl Into<String>, state: IdempotencyState) -> Self {
        Self {
            org_id: org_id.into(),
            state,
        }
    }

    pub fn state(&self) -> &IdempotencyState {
        &self.state
    }

    pub fn generate_key(
        &mut self,
        operation: &str,
        related_id: &str,
        ttl: Option<chrono::Duration>,
        now: DateTime<Utc>,
        randomness: &dyn Randomness,
    ) -> String {
        let mut suffix = [0u8; 8];
        randomness.fill_bytes(&mut suffix);
        let key = format!("idem_{}_{}", operation, hex::encode(suffix));
        let ttl = ttl.unwrap_or_else(|| ChronoDuration::hours(DEFAULT_TTL_HOURS));

        self.maybe_evict(now);
        self.state.records.insert(
            key.clone(),
            IdempotencyKeyRecord {
                key: key.clone(),
                operation: operation.to_string(),
                related_entity_id: related_id.to_string(),
                generated_at: now,
                expires_at: now + ttl,
                used: false,
                successful: None,
                result_hash: None,
            },
        );
        key
    }

    pub fn check(&self, key: &str, now: DateTime<Utc>) -> CheckResult {
        match self.state.records.get(key) {
            Some(record) if record.expires_at > now => CheckResult {
                exists: true,
                used: record.used,
                previous_success: record.successful,
            },
            _ => CheckResult {
                exists: false,
                used: false,
                previous_success: None,
            },
        }
    }

    pub fn mark_used(
        &mut self,
        key: &str,
        successful: bool,
        result_hash: Option<String>,
    ) -> CoreResult<()> {
        let record = self
            .state
            .records
            .get_mut(key)
            .ok_or_else(|| CoreError::not_initialized(format!("{}:idempotency:{}", self.org_id, key)))?;
        record.used = true;
        record.successful = Some(successful);
        record.result_hash = result_hash;
        Ok(())
    }

    /// Returns `false` iff the key was already used successfully.
    /// Otherwise reserves (or re-reserves) the key and returns `true`.
    pub fn try_acquire(
        &mut self,
        key: &str,
        operation: &str,
        related_id: &str,
        ttl: Option<chrono::Duration>,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(record) = self.state.records.get(key) {
            if record.expires_at > now && record.used && record.successful == Some(true) {
                return false;
            }
        }
        self.maybe_evict(now);
        let ttl = ttl.unwrap_or_else(|| ChronoDuration::hours(DEFAULT_TTL_HOURS));
        self.state.records.insert(
            key.to_string(),
            IdempotencyKeyRecord {
                key: key.to_string(),
                operation: operation.to_string(),
                related_entity_id: related_id.to_string(),
                generated_at: now,
                expires_at: now + ttl,
                used: false,
                successful: None,
                result_hash: None,
            },
        );
        true
    }

    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.state.records.len();
        self.state.records.retain(|_, r| r.expires_at > now);
        before - self.state.records.len()
    }

    /// spec.md §4.4: run cleanup first; if still over capacity, drop the
    /// oldest 10% by `generated_at`.
    fn maybe_evict(&mut self, now: DateTime<Utc>) {
        if self.state.records.len() < MAX_LIVE_KEYS {
            return;
        }
        self.cleanup_expired(now);
        if self.state.records.len() < MAX_LIVE_KEYS {
            return;
        }
        let to_drop = ((self.state.records.len() as f64) * EVICTION_FRACTION).ceil() as usize;
        let mut by_age: Vec<(String, DateTime<Utc>)> = self
            .state
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.generated_at))
            .collect();
        by_age.sort_by_key(|(_, generated_at)| *generated_at);
        for (key, _) in by_age.into_iter().take(to_drop) {
            self.state.records.remove(&key);
        }
    }
}

/// Keyed per organization, matching spec.md §3's `{orgId}:idempotency` key.
#[async_trait]
impl Grain for IdempotencyService {
    type Key = String;

    async fn activate(key: String, _ctx: &ActivationContext) -> CoreResult<Self> {
        Ok(IdempotencyService::new(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::OsRandomness;

    #[test]
    fn try_acquire_then_mark_used_blocks_second_success() {
        let mut svc = IdempotencyService::new("org1");
        let now = Utc::now();
        assert!(svc.try_acquire("k1", "charge", "order1", None, now));
        svc.mark_used("k1", true, Some("hash".to_string())).unwrap();
        assert!(!svc.try_acquire("k1", "charge", "order1", None, now));
    }

    #[test]
    fn failed_attempt_can_be_retried() {
        let mut svc = IdempotencyService::new("org1");
        let now = Utc::now();
        assert!(svc.try_acquire("k1", "charge", "order1", None, now));
        svc.mark_used("k1", false, None).unwrap();
        assert!(svc.try_acquire("k1", "charge", "order1", None, now));
    }

    #[test]
    fn expired_key_reports_not_exists() {
        let mut svc = IdempotencyService::new("org1");
        let now = Utc::now();
        let rng = OsRandomness;
        let key = svc.generate_key("charge", "order1", Some(ChronoDuration::seconds(1)), now, &rng);
        let later = now + ChronoDuration::seconds(2);
        let result = svc.check(&key, later);
        assert!(!result.exists);
    }

    #[test]
    fn cleanup_expired_removes_past_ttl_records() {
        let mut svc = IdempotencyService::new("org1");
        let now = Utc::now();
        let rng = OsRandomness;
        svc.generate_key("charge", "order1", Some(ChronoDuration::seconds(1)), now, &rng);
        let later = now + ChronoDuration::seconds(2);
        assert_eq!(svc.cleanup_expired(later), 1);
        assert_eq!(svc.state().records.len(), 0);
    }

    #[test]
    fn eviction_drops_oldest_tenth_once_over_capacity() {
        let mut svc = IdempotencyService::new("org1");
        let base = Utc::now();
        for i in 0..MAX_LIVE_KEYS {
            svc.state.records.insert(
                format!("k{i}"),
                IdempotencyKeyRecord {
                    key: format!("k{i}"),
                    operation: "op".to_string(),
                    related_entity_id: "e".to_string(),
                    generated_at: base + ChronoDuration::seconds(i as i64),
                    expires_at: base + ChronoDuration::hours(48),
                    used: false,
                    successful: None,
                    result_hash: None,
                },
            );
        }
        let rng = OsRandomness;
        svc.generate_key("charge", "order-new", None, base + ChronoDuration::hours(1), &rng);
        assert!(svc.state().records.len() < MAX_LIVE_KEYS + 1);
        assert!(!svc.state().records.contains_key("k0"));
    }
}
