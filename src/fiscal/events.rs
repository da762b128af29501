//! Events for the TSE signing actor (spec.md §4.2, §4.10).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fiscal::types::ExternalMapping;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TseEvent {
    Initialized {
        location_id: String,
        signing_key: Vec<u8>,
        certificate_serial: String,
        public_key_base64: String,
        at: DateTime<Utc>,
    },
    TransactionStarted {
        transaction_number: u64,
        process_type: String,
        process_data: String,
        client_id: Option<String>,
        at: DateTime<Utc>,
    },
    TransactionUpdated {
        transaction_number: u64,
        process_data: String,
        at: DateTime<Utc>,
    },
    TransactionFinished {
        transaction_number: u64,
        process_type: String,
        process_data: String,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        signature_counter: u64,
        signature_hex: String,
        qr_payload: String,
        at: DateTime<Utc>,
    },
    TransactionFailed {
        transaction_number: Option<u64>,
        error_code: String,
        message: String,
        at: DateTime<Utc>,
    },
    SelfTestPerformed {
        passed: bool,
        at: DateTime<Utc>,
    },
    ExternalMappingConfigured {
        mapping: ExternalMapping,
        at: DateTime<Utc>,
    },
    ExternalResponseReceived {
        transaction_number: u64,
        accepted: bool,
        cloud_reference: Option<String>,
        at: DateTime<Utc>,
    },
}
