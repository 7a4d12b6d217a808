//! Offer generation: history → signals → base score → composed terms → signed attestation.

pub mod composer;
pub mod fairness;
pub mod flags;

pub use composer::{compose_offer, Adjustment, ComposedOffer, OfferAuditRecord};
pub use fairness::{run_fairness_audit, Assessment, FairnessReport};
pub use flags::FraudFlags;

use crate::attest::{AttestationSigner, AttestationWire, AttestedTerms, CreditAttestation, SignerError};
use crate::chain::fallback::worker_proofs_from_chain;
use crate::chain::rpc::LogSource;
use crate::events::WorkerHistory;
use crate::features::{FeatureVector, USDC_UNIT};
use crate::scoring::{score, CreditModel};
use crate::signals::{analyze_worker, EarlyWarning, FraudSignal, IncomeForecast, IntegrityReport};
use crate::store::EventStore;
use alloy_primitives::Address;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum OfferError {
    #[error("signing: {0}")]
    Signer(#[from] SignerError),
    #[error("clock before unix epoch: {0}")]
    Clock(i64),
}

/// Where to look for proofs when the store has none for a worker.
#[derive(Debug)]
pub struct ChainFallback<S> {
    pub source: Arc<S>,
    pub workproof_address: String,
    pub lookback_blocks: u64,
}

impl<S> Clone for ChainFallback<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            workproof_address: self.workproof_address.clone(),
            lookback_blocks: self.lookback_blocks,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferResponse {
    pub attestation: AttestationWire,
    pub signature: String,
    pub signer: String,
    pub explanation: String,
    pub features: FeatureVector,
    pub forecast: IncomeForecast,
    pub early_warning: EarlyWarning,
    pub fraud_signal: FraudSignal,
    pub workproof_integrity: IntegrityReport,
    pub fraud_flags_bitmask: u32,
    pub fraud_flag_names: Vec<&'static str>,
    pub adjustments: Vec<Adjustment>,
}

/// Per-request offer flow. Holds no mutable state; clones share the store, model and key.
#[derive(Clone, Debug)]
pub struct CreditPipeline {
    store: Arc<EventStore>,
    model: Arc<CreditModel>,
    signer: Arc<AttestationSigner>,
    ttl_secs: u64,
}

impl CreditPipeline {
    pub fn new(
        store: Arc<EventStore>,
        model: Arc<CreditModel>,
        signer: Arc<AttestationSigner>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            model,
            signer,
            ttl_secs,
        }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn signer(&self) -> &AttestationSigner {
        &self.signer
    }

    pub fn model(&self) -> &CreditModel {
        &self.model
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Store history for `worker`. A store failure degrades to an empty history.
    pub fn stored_history(&self, worker: &str) -> WorkerHistory {
        match self.store.worker_history(worker) {
            Ok(h) => h,
            Err(e) => {
                warn!(worker, error = %e, "history read failed; scoring with empty history");
                WorkerHistory::empty(worker.to_ascii_lowercase())
            }
        }
    }

    /// Store history, topped up from the chain when the store holds no work proofs.
    pub async fn history<S: LogSource>(
        &self,
        worker: &str,
        fallback: Option<&ChainFallback<S>>,
    ) -> WorkerHistory {
        let mut history = self.stored_history(worker);
        let Some(fb) = fallback else {
            return history;
        };
        if !history.work.is_empty() {
            return history;
        }
        match worker_proofs_from_chain(
            fb.source.as_ref(),
            &fb.workproof_address,
            worker,
            fb.lookback_blocks,
        )
        .await
        {
            Ok(proofs) => {
                debug!(worker, proofs = proofs.len(), "chain fallback");
                history.work = proofs;
            }
            Err(e) => warn!(worker, error = %e, "chain fallback failed"),
        }
        history
    }

    /// Scores, composes and signs an offer for `worker` at `now`, then appends
    /// an audit row. Audit failures are logged only.
    pub fn offer(
        &self,
        worker: Address,
        history: &WorkerHistory,
        now: i64,
    ) -> Result<OfferResponse, OfferError> {
        let issued_at = u64::try_from(now).map_err(|_| OfferError::Clock(now))?;
        let analysis = analyze_worker(history, now);
        let base = score(&self.model, &analysis.features);
        let composed = compose_offer(
            &base,
            &analysis.forecast,
            &analysis.fraud,
            &analysis.integrity,
            &analysis.early_warning,
        );

        let terms = AttestedTerms {
            trust_score: composed.trust_score,
            pd: composed.pd,
            credit_limit: composed.credit_limit,
            apr_bps: composed.apr_bps,
            tenure_days: composed.tenure_days,
            fraud_flags: composed.fraud_flags.bits(),
        };
        let attestation = CreditAttestation::issue(worker, terms, issued_at, self.ttl_secs);
        let signed = self.signer.sign(&attestation)?;

        let record = composed.audit_record(
            &history.worker,
            &analysis.forecast,
            &analysis.fraud,
            &analysis.integrity,
            &analysis.early_warning,
            now,
        );
        if let Err(e) = self.store.insert_offer_audit(&record) {
            warn!(worker = %history.worker, error = %e, "offer audit write failed");
        }

        info!(
            worker = %history.worker,
            trust_score = composed.trust_score,
            credit_limit = composed.credit_limit,
            apr_bps = composed.apr_bps,
            fraud_flags = composed.fraud_flags.bits(),
            "offer signed"
        );

        Ok(OfferResponse {
            attestation: signed.attestation.to_wire(),
            signature: signed.signature,
            signer: signed.signer,
            explanation: explain(&analysis.features, &composed),
            fraud_flags_bitmask: composed.fraud_flags.bits(),
            fraud_flag_names: composed.fraud_flags.names(),
            adjustments: composed.adjustments,
            features: analysis.features,
            forecast: analysis.forecast,
            early_warning: analysis.early_warning,
            fraud_signal: analysis.fraud,
            workproof_integrity: analysis.integrity,
        })
    }
}

/// Plain-text summary of the inputs and the approved terms.
pub fn explain(features: &FeatureVector, offer: &ComposedOffer) -> String {
    let mut s = String::from("Credit Scoring Analysis\n\nWork history:\n");
    let _ = writeln!(s, "- Shifts in last 7 days: {}", features.shift_count_7d);
    let _ = writeln!(s, "- Shifts in last 30 days: {}", features.shift_count_30d);
    let _ = writeln!(s, "- Average rating: {:.1}/5", features.avg_rating_band_30d);
    let _ = writeln!(
        s,
        "- Earnings consistency: {:.0}%",
        features.earnings_consistency_30d * 100.0
    );
    let _ = writeln!(s, "- Days since last shift: {}", features.recency_days);

    s.push_str("\nRisk assessment:\n");
    let _ = writeln!(s, "- Trust score: {}/10000", offer.trust_score);
    let _ = writeln!(
        s,
        "- Default probability: {:.2}%",
        f64::from(offer.pd) / 10_000.0
    );
    if !offer.fraud_flags.is_empty() {
        let _ = writeln!(s, "- Flags: {}", offer.fraud_flags);
    }
    for adj in &offer.adjustments {
        let _ = writeln!(s, "- Adjusted for {}: {}", adj.signal, adj.reason);
    }

    s.push_str("\nApproved terms:\n");
    let _ = writeln!(
        s,
        "- Credit limit: ${:.2}",
        offer.credit_limit as f64 / USDC_UNIT
    );
    let _ = writeln!(s, "- APR: {:.2}%", f64::from(offer.apr_bps) / 100.0);
    let _ = write!(s, "- Tenure: {} days", offer.tenure_days);
    s
}
