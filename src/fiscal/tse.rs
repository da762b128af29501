//! C10: the TSE (technical signing device) actor (spec.md §4.10).
//!
//! Internal HMAC-SHA256 signing provider — a stand-in for a certified
//! signing module (spec.md §9 Open Questions: "not a real asymmetric key
//! pair... treat the internal provider as a stand-in"). Grounded in the
//! teacher's `vault::execution::PolymarketClobAdapter::sign_request` HMAC
//! idiom (`hmac`/`sha2`, base64-encoded signature).

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::actor::EventLogStore;
use crate::aggregate::{Aggregate, EventSourcedAggregate};
use crate::clock::{Clock, Randomness};
use crate::error::{CoreError, CoreResult};
use crate::fiscal::events::TseEvent;
use crate::fiscal::types::{format_tse_time, ExternalMapping, ExternalTseType, TseTransactionContext};
use crate::keys::ActorKey;
use crate::streams::{FiscalTseStreamEvent, FiscalTseStreamKind, StreamBus, StreamEvent};

type HmacSha256 = Hmac<Sha256>;

/// Bit-exact contract (spec.md §4.10): 6 `;`-separated fields.
pub fn build_signature_payload(
    transaction_number: u64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    process_type: &str,
    process_data: &str,
    signature_counter: u64,
) -> String {
    format!(
        "{};{};{};{};{};{}",
        transaction_number,
        format_tse_time(start_time),
        format_tse_time(end_time),
        process_type,
        process_data,
        signature_counter,
    )
}

/// Bit-exact contract (spec.md §4.10): 11 `;`-separated fields, the
/// literal algorithm name `HMAC-SHA256` as its own field (not the digest).
pub fn build_qr_payload(
    certificate_serial: &str,
    utc_time: DateTime<Utc>,
    transaction_number: u64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    process_type: &str,
    process_data: &str,
    signature_counter: u64,
    base64_signature: &str,
) -> String {
    format!(
        "V0;{};HMAC-SHA256;{};{};{};{};{};{};{};{}",
        certificate_serial,
        format_tse_time(utc_time),
        transaction_number,
        format_tse_time(start_time),
        format_tse_time(end_time),
        process_type,
        process_data,
        signature_counter,
        base64_signature,
    )
}

fn hmac_sign(key: &[u8], payload: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Both forms of the signature `finish_transaction` produces: the hex
/// encoding stored verbatim on `FiscalTransactionState.signature_hex`, and
/// the assembled QR-code payload (which embeds the base64 form instead,
/// per the bit-exact contract in spec.md §4.10/§6).
#[derive(Debug, Clone)]
pub struct FinishedSignature {
    pub signature_hex: String,
    pub qr_payload: String,
}

#[derive(Debug, Clone, Default)]
pub struct TseState {
    pub org_id: String,
    pub tse_id: String,
    pub location_id: String,
    pub signing_key: Vec<u8>,
    pub certificate_serial: String,
    pub public_key_base64: String,
    pub transaction_counter: u64,
    pub signature_counter: u64,
    pub in_flight: HashMap<u64, TseTransactionContext>,
    pub external_mapping: Option<ExternalMapping>,
    pub last_self_test_at: Option<DateTime<Utc>>,
    pub last_self_test_passed: Option<bool>,
    pub initialized: bool,
}

impl TseState {
    /// When external mapping is disabled or `ExternalTseType::None`, the
    /// internal HMAC provider signs (spec.md §4.10 "factory pattern").
    pub fn uses_internal_provider(&self) -> bool {
        match &self.external_mapping {
            None => true,
            Some(m) => !m.enabled || m.tse_type == ExternalTseType::None,
        }
    }
}

impl Aggregate for TseState {
    type Event = TseEvent;

    fn apply(&mut self, event: &TseEvent) {
        match event {
            TseEvent::Initialized {
                location_id,
                signing_key,
                certificate_serial,
                public_key_base64,
                ..
            } => {
                self.location_id = location_id.clone();
                self.signing_key = signing_key.clone();
                self.certificate_serial = certificate_serial.clone();
                self.public_key_base64 = public_key_base64.clone();
                self.initialized = true;
            }
            TseEvent::TransactionStarted {
                transaction_number,
                process_type,
                process_data,
                client_id,
                at,
            } => {
                self.transaction_counter = self.transaction_counter.max(*transaction_number);
                self.in_flight.insert(
                    *transaction_number,
                    TseTransactionContext {
                        transaction_number: *transaction_number,
                        process_type: process_type.clone(),
                        process_data: process_data.clone(),
                        client_id: client_id.clone(),
                        start_time: *at,
                    },
                );
            }
            TseEvent::TransactionUpdated {
                transaction_number,
                process_data,
                ..
            } => {
                if let Some(ctx) = self.in_flight.get_mut(transaction_number) {
                    ctx.process_data = process_data.clone();
                }
            }
            TseEvent::TransactionFinished {
                transaction_number,
                signature_counter,
                ..
            } => {
                self.signature_counter = self.signature_counter.max(*signature_counter);
                self.in_flight.remove(transaction_number);
            }
            TseEvent::TransactionFailed { transaction_number, .. } => {
                if let Some(tx) = transaction_number {
                    self.in_flight.remove(tx);
                }
            }
            TseEvent::SelfTestPerformed { passed, at } => {
                self.last_self_test_at = Some(*at);
                self.last_self_test_passed = Some(*passed);
            }
            TseEvent::ExternalMappingConfigured { mapping, .. } => {
                self.external_mapping = Some(mapping.clone());
            }
            TseEvent::ExternalResponseReceived { .. } => {}
        }
    }
}

pub struct TseActor {
    key: ActorKey,
    aggregate: EventSourcedAggregate<TseState>,
    store: Arc<dyn EventLogStore<TseEvent>>,
    bus: Arc<StreamBus>,
    clock: Arc<dyn Clock>,
    randomness: Arc<dyn Randomness>,
}

impl TseActor {
    pub async fn load(
        key: ActorKey,
        store: Arc<dyn EventLogStore<TseEvent>>,
        bus: Arc<StreamBus>,
        clock: Arc<dyn Clock>,
        randomness: Arc<dyn Randomness>,
    ) -> CoreResult<Self> {
        let aggregate = EventSourcedAggregate::replay(store.as_ref(), &key.to_key_string()).await?;
        Ok(Self {
            key,
            aggregate,
            store,
            bus,
            clock,
            randomness,
        })
    }

    pub fn state(&self) -> &TseState {
        self.aggregate.state()
    }

    fn org_tse(&self) -> CoreResult<(String, String)> {
        match &self.key {
            ActorKey::Tse { org_id, tse_id } => Ok((org_id.clone(), tse_id.clone())),
            _ => Err(CoreError::precondition("not a TSE key")),
        }
    }

    async fn commit(&mut self) -> CoreResult<()> {
        self.aggregate
            .confirm_events(self.store.as_ref(), &self.key.to_key_string())
            .await
    }

    fn publish(&self, kind: FiscalTseStreamKind, now: DateTime<Utc>) {
        let (org_id, tse_id) = match self.org_tse() {
            Ok(v) => v,
            Err(_) => return,
        };
        self.bus.publish(StreamEvent::FiscalTse(FiscalTseStreamEvent {
            org_id,
            tse_id,
            at: now,
            kind,
        }));
    }

    pub async fn initialize(&mut self, location_id: String) -> CoreResult<()> {
        if self.aggregate.state().initialized {
            return Err(CoreError::conflict(format!("{} already initialized", self.key.to_key_string())));
        }
        let mut signing_key = vec![0u8; 32];
        self.randomness.fill_bytes(&mut signing_key);
        let now = self.clock.now();
        // Placeholder certificate serial derived from a timestamp (spec.md
        // §4.10); a real deployment would source this from the HSM/TSE
        // provisioning process.
        let certificate_serial = format!("CERT-{}", now.timestamp_millis());
        // Placeholder public key: not a real asymmetric keypair (spec.md §9
        // Open Questions), derived from the first 16 bytes of the signing key.
        let public_key_base64 = BASE64.encode(&signing_key[..16]);

        self.aggregate.raise(TseEvent::Initialized {
            location_id,
            signing_key,
            certificate_serial,
            public_key_base64,
            at: now,
        });
        self.commit().await
    }

    pub async fn start_transaction(
        &mut self,
        process_type: String,
        process_data: String,
        client_id: Option<String>,
    ) -> CoreResult<u64> {
        if !self.aggregate.state().initialized {
            return Err(CoreError::not_initialized(self.key.to_key_string()));
        }
        let transaction_number = self.aggregate.state().transaction_counter + 1;
        let now = self.clock.now();
        self.aggregate.raise(TseEvent::TransactionStarted {
            transaction_number,
            process_type,
            process_data,
            client_id,
            at: now,
        });
        self.commit().await?;
        self.publish(FiscalTseStreamKind::Started { transaction_number }, now);
        Ok(transaction_number)
    }

    pub async fn update_transaction(&mut self, transaction_number: u64, process_data: String) -> CoreResult<()> {
        if !self.aggregate.state().in_flight.contains_key(&transaction_number) {
            return Err(CoreError::precondition(format!(
                "no in-flight transaction {transaction_number}"
            )));
        }
        let now = self.clock.now();
        self.aggregate.raise(TseEvent::TransactionUpdated {
            transaction_number,
            process_data,
            at: now,
        });
        self.commit().await?;
        self.publish(FiscalTseStreamKind::Updated { transaction_number }, now);
        Ok(())
    }

    /// Builds the canonical signature payload, signs it with HMAC-SHA256,
    /// assembles the QR-code string, and monotonically bumps the signature
    /// counter (spec.md §4.10, §8 invariant 3).
    pub async fn finish_transaction(
        &mut self,
        transaction_number: u64,
        process_type: String,
        process_data: String,
    ) -> CoreResult<FinishedSignature> {
        let ctx = self
            .aggregate
            .state()
            .in_flight
            .get(&transaction_number)
            .cloned()
            .ok_or_else(|| CoreError::precondition(format!("no in-flight transaction {transaction_number}")))?;
        let now = self.clock.now();
        let signature_counter = self.aggregate.state().signature_counter + 1;

        let signature_payload = build_signature_payload(
            transaction_number,
            ctx.start_time,
            now,
            &process_type,
            &process_data,
            signature_counter,
        );
        let signature_bytes = hmac_sign(&self.aggregate.state().signing_key, &signature_payload);
        let signature_hex = hex::encode(&signature_bytes);
        let base64_signature = BASE64.encode(&signature_bytes);
        let qr_payload = build_qr_payload(
            &self.aggregate.state().certificate_serial,
            now,
            transaction_number,
            ctx.start_time,
            now,
            &process_type,
            &process_data,
            signature_counter,
            &base64_signature,
        );

        self.aggregate.raise(TseEvent::TransactionFinished {
            transaction_number,
            process_type,
            process_data,
            start_time: ctx.start_time,
            end_time: now,
            signature_counter,
            signature_hex: signature_hex.clone(),
            qr_payload: qr_payload.clone(),
            at: now,
        });
        self.commit().await?;
        self.publish(
            FiscalTseStreamKind::Finished {
                transaction_number,
                signature_counter,
            },
            now,
        );
        Ok(FinishedSignature {
            signature_hex,
            qr_payload,
        })
    }

    pub async fn fail_transaction(
        &mut self,
        transaction_number: Option<u64>,
        error_code: String,
        message: String,
    ) -> CoreResult<()> {
        let now = self.clock.now();
        self.aggregate.raise(TseEvent::TransactionFailed {
            transaction_number,
            error_code: error_code.clone(),
            message,
            at: now,
        });
        self.commit().await?;
        self.publish(
            FiscalTseStreamKind::Failed {
                transaction_number,
                error_code,
            },
            now,
        );
        Ok(())
    }

    /// Signs a deterministic test message; success iff the signature is
    /// non-empty (spec.md §4.10) — trivially always true for HMAC, so this
    /// really only verifies the signing key is present.
    pub async fn self_test(&mut self) -> CoreResult<bool> {
        if !self.aggregate.state().initialized {
            return Err(CoreError::not_initialized(self.key.to_key_string()));
        }
        let signature = hmac_sign(&self.aggregate.state().signing_key, "SELFTEST");
        let passed = !signature.is_empty();
        let now = self.clock.now();
        self.aggregate.raise(TseEvent::SelfTestPerformed { passed, at: now });
        self.commit().await?;
        self.publish(FiscalTseStreamKind::SelfTest { passed }, now);
        Ok(passed)
    }

    pub async fn configure_external_mapping(&mut self, mapping: ExternalMapping) -> CoreResult<()> {
        let now = self.clock.now();
        self.aggregate.raise(TseEvent::ExternalMappingConfigured { mapping, at: now });
        self.commit().await
    }

    pub async fn receive_external_response(
        &mut self,
        transaction_number: u64,
        accepted: bool,
        cloud_reference: Option<String>,
    ) -> CoreResult<()> {
        let now = self.clock.now();
        self.aggregate.raise(TseEvent::ExternalResponseReceived {
            transaction_number,
            accepted,
            cloud_reference,
            at: now,
        });
        self.commit().await?;
        self.publish(
            FiscalTseStreamKind::ExternalResponseReceived {
                transaction_number,
                accepted,
            },
            now,
        );
        Ok(())
    }
}
