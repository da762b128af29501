//! Canonical actor key parsing (spec.md §3, §6).
//!
//! Keys are `:`-delimited strings whose arity is fixed per actor type.
//! The parser rejects keys with the wrong arity rather than guessing.

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActorKey {
    FiscalDevice { org_id: String, device_id: String },
    FiscalDeviceRegistry { org_id: String, site_id: String },
    Tse { org_id: String, tse_id: String },
    FiscalTransaction { org_id: String, transaction_id: String },
    Inventory { org_id: String, site_id: String, ingredient_id: String },
    InventoryLedger { org_id: String, site_id: String, ingredient_id: String },
    StockTake { org_id: String, site_id: String, stock_take_id: String },
    Transfer { org_id: String, site_id: String, transfer_id: String },
    OrderFiscal { org_id: String, site_id: String },
    Idempotency { org_id: String },
    TransactionRegistry { org_id: String, site_id: String },
    LocationTree { org_id: String, site_id: String },
}

impl ActorKey {
    pub fn org_id(&self) -> &str {
        match self {
            ActorKey::FiscalDevice { org_id, .. }
            | ActorKey::FiscalDeviceRegistry { org_id, .. }
            | ActorKey::Tse { org_id, .. }
            | ActorKey::FiscalTransaction { org_id, .. }
            | ActorKey::Inventory { org_id, .. }
            | ActorKey::InventoryLedger { org_id, .. }
            | ActorKey::StockTake { org_id, .. }
            | ActorKey::Transfer { org_id, .. }
            | ActorKey::OrderFiscal { org_id, .. }
            | ActorKey::TransactionRegistry { org_id, .. }
            | ActorKey::LocationTree { org_id, .. }
            | ActorKey::Idempotency { org_id } => org_id,
        }
    }

    pub fn transaction_registry(org_id: &str, site_id: &str) -> Self {
        ActorKey::TransactionRegistry {
            org_id: org_id.to_string(),
            site_id: site_id.to_string(),
        }
    }

    pub fn location_tree(org_id: &str, site_id: &str) -> Self {
        ActorKey::LocationTree {
            org_id: org_id.to_string(),
            site_id: site_id.to_string(),
        }
    }

    pub fn inventory(org_id: &str, site_id: &str, ingredient_id: &str) -> Self {
        ActorKey::Inventory {
            org_id: org_id.to_string(),
            site_id: site_id.to_string(),
            ingredient_id: ingredient_id.to_string(),
        }
    }

    pub fn inventory_ledger(org_id: &str, site_id: &str, ingredient_id: &str) -> Self {
        ActorKey::InventoryLedger {
            org_id: org_id.to_string(),
            site_id: site_id.to_string(),
            ingredient_id: ingredient_id.to_string(),
        }
    }

    pub fn transfer(org_id: &str, site_id: &str, transfer_id: &str) -> Self {
        ActorKey::Transfer {
            org_id: org_id.to_string(),
            site_id: site_id.to_string(),
            transfer_id: transfer_id.to_string(),
        }
    }

    pub fn stock_take(org_id: &str, site_id: &str, stock_take_id: &str) -> Self {
        ActorKey::StockTake {
            org_id: org_id.to_string(),
            site_id: site_id.to_string(),
            stock_take_id: stock_take_id.to_string(),
        }
    }

    pub fn tse(org_id: &str, tse_id: &str) -> Self {
        ActorKey::Tse {
            org_id: org_id.to_string(),
            tse_id: tse_id.to_string(),
        }
    }

    pub fn idempotency(org_id: &str) -> Self {
        ActorKey::Idempotency {
            org_id: org_id.to_string(),
        }
    }

    /// Serialize back to the canonical `:`-delimited string form.
    pub fn to_key_string(&self) -> String {
        match self {
            ActorKey::FiscalDevice { org_id, device_id } => {
                format!("{org_id}:fiscaldevice:{device_id}")
            }
            ActorKey::FiscalDeviceRegistry { org_id, site_id } => {
                format!("{org_id}:{site_id}:fiscaldeviceregistry")
            }
            ActorKey::Tse { org_id, tse_id } => format!("{org_id}:tse:{tse_id}"),
            ActorKey::FiscalTransaction { org_id, transaction_id } => {
                format!("{org_id}:fiscaltransaction:{transaction_id}")
            }
            ActorKey::Inventory { org_id, site_id, ingredient_id } => {
                format!("{org_id}:{site_id}:{ingredient_id}:inventory")
            }
            ActorKey::InventoryLedger { org_id, site_id, ingredient_id } => {
                format!("{org_id}:{site_id}:{ingredient_id}:inventoryledger")
            }
            ActorKey::StockTake { org_id, site_id, stock_take_id } => {
                format!("{org_id}:{site_id}:stocktake:{stock_take_id}")
            }
            ActorKey::Transfer { org_id, site_id, transfer_id } => {
                format!("{org_id}:{site_id}:transfer:{transfer_id}")
            }
            ActorKey::OrderFiscal { org_id, site_id } => format!("{org_id}:{site_id}:orderfiscal"),
            ActorKey::TransactionRegistry { org_id, site_id } => {
                format!("{org_id}:{site_id}:transactionregistry")
            }
            ActorKey::LocationTree { org_id, site_id } => format!("{org_id}:{site_id}:locationtree"),
            ActorKey::Idempotency { org_id } => format!("{org_id}:idempotency"),
        }
    }

    /// Parse a canonical key string, rejecting the wrong arity for the
    /// named actor-type tag found in the middle segments.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let parts: Vec<&str> = raw.split(':').collect();
        let bad = || {
            CoreError::precondition(format!("malformed actor key: {raw}"))
        };
        match parts.as_slice() {
            [org, "fiscaldevice", device] => Ok(ActorKey::FiscalDevice {
                org_id: org.to_string(),
                device_id: device.to_string(),
            }),
            [org, site, "fiscaldeviceregistry"] => Ok(ActorKey::FiscalDeviceRegistry {
                org_id: org.to_string(),
                site_id: site.to_string(),
            }),
            [org, "tse", tse_id] => Ok(ActorKey::Tse {
                org_id: org.to_string(),
                tse_id: tse_id.to_string(),
            }),
            [org, "fiscaltransaction", tx] => Ok(ActorKey::FiscalTransaction {
                org_id: org.to_string(),
                transaction_id: tx.to_string(),
            }),
            [org, site, ingredient, "inventory"] => Ok(ActorKey::Inventory {
                org_id: org.to_string(),
                site_id: site.to_string(),
                ingredient_id: ingredient.to_string(),
            }),
            [org, site, ingredient, "inventoryledger"] => Ok(ActorKey::InventoryLedger {
                org_id: org.to_string(),
                site_id: site.to_string(),
                ingredient_id: ingredient.to_string(),
            }),
            [org, site, "stocktake", id] => Ok(ActorKey::StockTake {
                org_id: org.to_string(),
                site_id: site.to_string(),
                stock_take_id: id.to_string(),
            }),
            [org, site, "transfer", id] => Ok(ActorKey::Transfer {
                org_id: org.to_string(),
                site_id: site.to_string(),
                transfer_id: id.to_string(),
            }),
            [org, site, "orderfiscal"] => Ok(ActorKey::OrderFiscal {
                org_id: org.to_string(),
                site_id: site.to_string(),
            }),
            [org, site, "transactionregistry"] => Ok(ActorKey::TransactionRegistry {
                org_id: org.to_string(),
                site_id: site.to_string(),
            }),
            [org, site, "locationtree"] => Ok(ActorKey::LocationTree {
                org_id: org.to_string(),
                site_id: site.to_string(),
            }),
            [org, "idempotency"] => Ok(ActorKey::Idempotency {
                org_id: org.to_string(),
            }),
            _ => Err(bad()),
        }
    }
}

impl std::fmt::Display for ActorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_inventory_key() {
        let key = ActorKey::inventory("org1", "site1", "ing1");
        let s = key.to_key_string();
        assert_eq!(s, "org1:site1:ing1:inventory");
        assert_eq!(ActorKey::parse(&s).unwrap(), key);
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(ActorKey::parse("org1:site1:inventory").is_err());
        assert!(ActorKey::parse("org1:site1:ing1:extra:inventory").is_err());
    }

    #[test]
    fn parses_all_canonical_forms() {
        assert!(ActorKey::parse("org1:fiscaldevice:dev1").is_ok());
        assert!(ActorKey::parse("org1:site1:fiscaldeviceregistry").is_ok());
        assert!(ActorKey::parse("org1:tse:tse1").is_ok());
        assert!(ActorKey::parse("org1:fiscaltransaction:tx1").is_ok());
        assert!(ActorKey::parse("org1:site1:stocktake:st1").is_ok());
        assert!(ActorKey::parse("org1:site1:transfer:tr1").is_ok());
        assert!(ActorKey::parse("org1:site1:orderfiscal").is_ok());
        assert!(ActorKey::parse("org1:idempotency").is_ok());
    }
}
