//! Cloud-TSS adapter contract and wire format (spec.md §4.11, §6).
//!
//! Grounded in the teacher's `vault::execution::PolymarketClobAdapter`:
//! a `reqwest::Client` built once with a request timeout, credentials held
//! alongside it, auth headers assembled per-request. The region/environment
//! table plays the role the teacher's `host: String` field plays — a single
//! resolved base URL the adapter methods build paths against.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::retry::{ExternalError, ErrorClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TssRegion {
    Germany,
    Austria,
    Italy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TssEnvironment {
    Test,
    Production,
}

/// Region × environment → base URL (spec.md §4.11, §6). Values are
/// illustrative hostnames for the three middleware families named in the
/// spec (KassenSichV/RKSV/RT); a real deployment sources these from config.
pub fn base_url(region: TssRegion, environment: TssEnvironment) -> &'static str {
    match (region, environment) {
        (TssRegion::Germany, TssEnvironment::Test) => "https://test.kassensichv.example.com",
        (TssRegion::Germany, TssEnvironment::Production) => "https://kassensichv.example.com",
        (TssRegion::Austria, TssEnvironment::Test) => "https://test.rksv.example.com",
        (TssRegion::Austria, TssEnvironment::Production) => "https://rksv.example.com",
        (TssRegion::Italy, TssEnvironment::Test) => "https://test.rt.example.com",
        (TssRegion::Italy, TssEnvironment::Production) => "https://rt.example.com",
    }
}

#[derive(Debug, Clone)]
pub struct TseCloudConfig {
    pub region: TssRegion,
    pub environment: TssEnvironment,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudTssReceipt {
    pub cloud_reference: String,
    pub accepted: bool,
}

/// Adapter contract (spec.md §4.11, §6): `authenticate`, `getTss`,
/// `startTransaction`, `finishTransaction`, `signReceipt`.
#[async_trait]
pub trait TseCloudClient: Send + Sync {
    async fn authenticate(&self) -> Result<(), ExternalError>;
    async fn get_tss(&self, tss_id: &str) -> Result<serde_json::Value, ExternalError>;
    async fn start_transaction(&self, transaction_number: u64) -> Result<(), ExternalError>;
    async fn finish_transaction(
        &self,
        transaction_number: u64,
        process_data: &str,
    ) -> Result<CloudTssReceipt, ExternalError>;
    async fn sign_receipt(&self, process_data: &str) -> Result<String, ExternalError>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Re-authenticates at least 5 minutes before the cached token's expiry
/// (spec.md §4.11).
const REAUTH_MARGIN_SECS: i64 = 5 * 60;

/// Fiskaly-style cloud-TSS adapter. Each HTTP exception is classified via
/// [`crate::retry::classify`] by the caller ([`crate::fiscal::coordinator`]),
/// which wraps every call in `with_retry` — this adapter itself only does
/// the HTTP plumbing and token caching.
pub struct FiskalyAdapter {
    client: Client,
    config: TseCloudConfig,
    base_url: String,
    token: Mutex<Option<CachedToken>>,
    clock: Arc<dyn crate::clock::Clock>,
}

impl FiskalyAdapter {
    pub fn new(config: TseCloudConfig, clock: Arc<dyn crate::clock::Clock>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        let base_url = base_url(config.region, config.environment).to_string();
        Self {
            client,
            config,
            base_url,
            token: Mutex::new(None),
            clock,
        }
    }

    fn needs_reauth(&self, now: DateTime<Utc>) -> bool {
        match self.token.lock().as_ref() {
            None => true,
            Some(t) => (t.expires_at - now).num_seconds() < REAUTH_MARGIN_SECS,
        }
    }

    fn http_error(err: reqwest::Error) -> ExternalError {
        let code = if err.is_timeout() || err.is_connect() {
            "CONNECTION_ERROR".to_string()
        } else {
            "HTTP_ERROR".to_string()
        };
        ExternalError {
            code,
            message: err.to_string(),
        }
    }

    fn status_error(status: reqwest::StatusCode, body: String) -> ExternalError {
        let code = if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            "CONNECTION_ERROR".to_string()
        } else {
            format!("HTTP_{}", status.as_u16())
        };
        ExternalError {
            code,
            message: format!("cloud TSS returned {status}: {body}"),
        }
    }
}

#[async_trait]
impl TseCloudClient for FiskalyAdapter {
    async fn authenticate(&self) -> Result<(), ExternalError> {
        let now = self.clock.now();
        if !self.needs_reauth(now) {
            return Ok(());
        }
        let url = format!("{}/auth", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "api_key": self.config.api_key,
                "api_secret": self.config.api_secret,
            }))
            .send()
            .await
            .map_err(Self::http_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }
        #[derive(Deserialize)]
        struct AuthResponse {
            access_token: String,
            expires_in_secs: i64,
        }
        let parsed: AuthResponse = response
            .json()
            .await
            .map_err(|e| ExternalError {
                code: "MALFORMED_RESPONSE".to_string(),
                message: e.to_string(),
            })?;
        *self.token.lock() = Some(CachedToken {
            access_token: parsed.access_token,
            expires_at: now + chrono::Duration::seconds(parsed.expires_in_secs),
        });
        debug!("cloud TSS re-authenticated");
        Ok(())
    }

    async fn get_tss(&self, tss_id: &str) -> Result<serde_json::Value, ExternalError> {
        self.authenticate().await?;
        let url = format!("{}/tss/{}", self.base_url, tss_id);
        let token = self
            .token
            .lock()
            .as_ref()
            .map(|t| t.access_token.clone())
            .unwrap_or_default();
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::http_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }
        response.json().await.map_err(|e| ExternalError {
            code: "MALFORMED_RESPONSE".to_string(),
            message: e.to_string(),
        })
    }

    async fn start_transaction(&self, transaction_number: u64) -> Result<(), ExternalError> {
        self.authenticate().await?;
        let url = format!("{}/transactions/{}/start", self.base_url, transaction_number);
        let token = self
            .token
            .lock()
            .as_ref()
            .map(|t| t.access_token.clone())
            .unwrap_or_default();
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::http_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }
        Ok(())
    }

    async fn finish_transaction(
        &self,
        transaction_number: u64,
        process_data: &str,
    ) -> Result<CloudTssReceipt, ExternalError> {
        self.authenticate().await?;
        let url = format!("{}/transactions/{}/finish", self.base_url, transaction_number);
        let token = self
            .token
            .lock()
            .as_ref()
            .map(|t| t.access_token.clone())
            .unwrap_or_default();
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "process_data": process_data }))
            .send()
            .await
            .map_err(Self::http_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%transaction_number, status = %status, "cloud TSS finish_transaction failed");
            return Err(Self::status_error(status, body));
        }
        #[derive(Deserialize)]
        struct FinishResponse {
            cloud_reference: String,
        }
        let parsed: FinishResponse = response.json().await.map_err(|e| ExternalError {
            code: "MALFORMED_RESPONSE".to_string(),
            message: e.to_string(),
        })?;
        Ok(CloudTssReceipt {
            cloud_reference: parsed.cloud_reference,
            accepted: true,
        })
    }

    async fn sign_receipt(&self, process_data: &str) -> Result<String, ExternalError> {
        self.authenticate().await?;
        let url = format!("{}/sign", self.base_url);
        let token = self
            .token
            .lock()
            .as_ref()
            .map(|t| t.access_token.clone())
            .unwrap_or_default();
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "process_data": process_data }))
            .send()
            .await
            .map_err(Self::http_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }
        response.text().await.map_err(|e| ExternalError {
            code: "MALFORMED_RESPONSE".to_string(),
            message: e.to_string(),
        })
    }
}

impl ExternalError {
    pub fn classify_cloud(&self) -> ErrorClass {
        self.classify()
    }
}

/// Tax-code mapping, `processType` mapping, and the `^`-delimited
/// process-data wire format (spec.md §6).
pub mod wire {
    /// `grossAmount ^ netAmounts ^ taxAmounts ^ paymentTypes`, the last
    /// three each a comma-separated list of `TAG:VALUE` pairs, `VALUE`
    /// formatted `%.2f` (spec.md §6).
    #[derive(Debug, Clone)]
    pub struct ProcessData {
        pub gross_amount: f64,
        pub net_amounts: Vec<(String, f64)>,
        pub tax_amounts: Vec<(String, f64)>,
        pub payment_types: Vec<(String, f64)>,
    }

    fn tag_list(pairs: &[(String, f64)]) -> String {
        pairs
            .iter()
            .map(|(tag, value)| format!("{tag}:{value:.2}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn encode(data: &ProcessData) -> String {
        format!(
            "{:.2}^{}^{}^{}",
            data.gross_amount,
            tag_list(&data.net_amounts),
            tag_list(&data.tax_amounts),
            tag_list(&data.payment_types),
        )
    }

    /// Internal tax tag → cloud-TSS equivalent (spec.md §6).
    pub fn map_tax_tag(internal: &str) -> &'static str {
        match internal {
            "NORMAL" => "NORMAL",
            "REDUCED" => "REDUCED_1",
            "REDUCED2" => "REDUCED_2",
            "NULL" => "NULL",
            _ => "NORMAL",
        }
    }

    /// Internal payment tag → cloud-TSS equivalent (spec.md §6).
    pub fn map_payment_tag(internal: &str) -> &'static str {
        match internal {
            "CASH" => "CASH",
            "CARD" => "NON_CASH",
            _ => "NON_CASH",
        }
    }

    /// Process type → cloud-TSS equivalent (spec.md §6).
    pub fn map_process_type(internal: &str) -> &'static str {
        match internal {
            "Kassenbeleg" => "RECEIPT",
            "AVTransfer" => "TRANSFER",
            "AVBestellung" => "ORDER",
            _ => "RECEIPT",
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn encodes_four_caret_delimited_fields() {
            let data = ProcessData {
                gross_amount: 11.9,
                net_amounts: vec![("NORMAL".to_string(), 10.0)],
                tax_amounts: vec![("NORMAL".to_string(), 1.9)],
                payment_types: vec![("CASH".to_string(), 11.9)],
            };
            let encoded = encode(&data);
            assert_eq!(encoded, "11.90^NORMAL:10.00^NORMAL:1.90^CASH:11.90");
            assert_eq!(encoded.split('^').count(), 4);
        }

        #[test]
        fn maps_tax_payment_and_process_type_vocabularies() {
            assert_eq!(map_tax_tag("REDUCED"), "REDUCED_1");
            assert_eq!(map_tax_tag("REDUCED2"), "REDUCED_2");
            assert_eq!(map_payment_tag("CARD"), "NON_CASH");
            assert_eq!(map_process_type("AVBestellung"), "ORDER");
            assert_eq!(map_process_type("unknown"), "RECEIPT");
        }
    }
}
