//! Transfer data model (spec.md §3, §4.8).

use serde::{Deserialize, Serialize};

use crate::money::Fixed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Requested,
    Approved,
    Rejected,
    Shipped,
    Received,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferLine {
    pub ingredient_id: String,
    pub requested_qty: Fixed,
    pub shipped_qty: Fixed,
    pub unit_cost: Fixed,
    pub received_qty: Option<Fixed>,
    pub variance: Option<Fixed>,
}
