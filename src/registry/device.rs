//! Per-site fiscal-device index (spec.md §3 `{orgId}:{siteId}:fiscaldeviceregistry`).
//!
//! Grounded in [`crate::idempotency::IdempotencyService`]'s snapshot-grain
//! shape: a single `HashMap` loaded at activation, mutated in place,
//! persisted via `writeState()` after every command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::keys::ActorKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredDevice {
    pub device_id: String,
    pub tse_id: String,
    pub location_id: String,
    pub registered_at: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRegistryState {
    devices: HashMap<String, RegisteredDevice>,
}

pub struct DeviceRegistry {
    key: ActorKey,
    state: DeviceRegistryState,
}

impl DeviceRegistry {
    pub fn new(key: ActorKey) -> CoreResult<Self> {
        if !matches!(key, ActorKey::FiscalDeviceRegistry { .. }) {
            return Err(CoreError::precondition("not a fiscal device registry key"));
        }
        Ok(Self {
            key,
            state: DeviceRegistryState::default(),
        })
    }

    pub fn from_state(key: ActorKey, state: DeviceRegistryState) -> CoreResult<Self> {
        if !matches!(key, ActorKey::FiscalDeviceRegistry { .. }) {
            return Err(CoreError::precondition("not a fiscal device registry key"));
        }
        Ok(Self { key, state })
    }

    pub fn state(&self) -> &DeviceRegistryState {
        &self.state
    }

    /// spec.md §7 `Conflict`: "e.g., already-registered device".
    pub fn register(
        &mut self,
        device_id: &str,
        tse_id: &str,
        location_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        if self.state.devices.contains_key(device_id) {
            return Err(CoreError::conflict(format!(
                "device {device_id} already registered at {}",
                self.key
            )));
        }
        self.state.devices.insert(
            device_id.to_string(),
            RegisteredDevice {
                device_id: device_id.to_string(),
                tse_id: tse_id.to_string(),
                location_id: location_id.to_string(),
                registered_at: now,
                active: true,
            },
        );
        Ok(())
    }

    pub fn deactivate(&mut self, device_id: &str) -> CoreResult<()> {
        let device = self
            .state
            .devices
            .get_mut(device_id)
            .ok_or_else(|| CoreError::not_initialized(format!("{}:{}", self.key, device_id)))?;
        device.active = false;
        Ok(())
    }

    pub fn get(&self, device_id: &str) -> Option<&RegisteredDevice> {
        self.state.devices.get(device_id)
    }

    pub fn list_active(&self) -> Vec<&RegisteredDevice> {
        let mut out: Vec<&RegisteredDevice> = self.state.devices.values().filter(|d| d.active).collect();
        out.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(ActorKey::FiscalDeviceRegistry {
            org_id: "org1".to_string(),
            site_id: "site1".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn registering_same_device_twice_conflicts() {
        let mut r = registry();
        let now = Utc::now();
        r.register("dev1", "tse1", "loc1", now).unwrap();
        let result = r.register("dev1", "tse2", "loc1", now);
        assert!(matches!(result, Err(CoreError::Conflict { .. })));
    }

    #[test]
    fn deactivated_device_is_excluded_from_active_listing() {
        let mut r = registry();
        let now = Utc::now();
        r.register("dev1", "tse1", "loc1", now).unwrap();
        r.register("dev2", "tse2", "loc1", now).unwrap();
        r.deactivate("dev1").unwrap();
        let active: Vec<&str> = r.list_active().iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(active, vec!["dev2"]);
    }
}
