//! Request handlers. Inputs are validated before any history is read.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{ConnectInfo, OriginalUri, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use time::OffsetDateTime;
use unempower::attest::{AttestedTerms, CreditAttestation, TypedDataHashes};
use unempower::chain::normalize::{normalize_address, parse_address};
use unempower::chain::LogSource;
use unempower::events::ChainEvent;
use unempower::features::{FeatureVector, DAY, USDC_UNIT};
use unempower::offer::{run_fairness_audit, FairnessReport, OfferAuditRecord, OfferResponse};
use unempower::signals::{
    analyze_worker, EarlyWarning, FraudSignal, IncomeForecast, IntegrityReport, WorkerAnalysis,
};
use unempower::WorkerHistory;

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;
pub const DEFAULT_AUDIT_WINDOW_DAYS: u32 = 30;
pub const MAX_AUDIT_WINDOW_DAYS: u32 = 365;

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Runs store-bound work off the async workers.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ApiResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {e}")))?
}

fn worker_param(raw: &str) -> ApiResult<String> {
    normalize_address(raw).map_err(|e| ApiError::BadRequest(format!("invalid worker address: {e}")))
}

fn limit_param(limit: Option<usize>) -> ApiResult<usize> {
    match limit.unwrap_or(DEFAULT_LIST_LIMIT) {
        0 => Err(ApiError::BadRequest("limit must be at least 1".into())),
        n if n > MAX_LIST_LIMIT => Err(ApiError::BadRequest(format!(
            "limit must be at most {MAX_LIST_LIMIT}"
        ))),
        n => Ok(n),
    }
}

async fn load_history(state: &AppState, worker: &str) -> WorkerHistory {
    state.pipeline.history(worker, state.chain.as_ref()).await
}

async fn analysis_for(state: &AppState, raw: &str) -> ApiResult<WorkerAnalysis> {
    let worker = worker_param(raw)?;
    let history = load_history(state, &worker).await;
    blocking(move || Ok(analyze_worker(&history, now_unix()))).await
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainHealth {
    pub reachable: bool,
    pub current_block: Option<u64>,
    /// Pending nonce of the signer account on the configured chain.
    pub signer_nonce: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub chain: ChainHealth,
    pub chain_id: u64,
    pub signer: String,
    pub timestamp: i64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.pipeline.store().clone();
    let database = blocking(move || Ok(store.ping().is_ok())).await.unwrap_or(false);
    let signer = state.pipeline.signer().address_checksum();
    let (current_block, signer_nonce) = match &state.chain {
        Some(fb) => (
            fb.source.block_number().await.ok(),
            fb.source.transaction_count(&signer).await.ok(),
        ),
        None => (None, None),
    };
    let reachable = current_block.is_some();
    Json(HealthResponse {
        status: if database && reachable {
            "healthy"
        } else {
            "degraded"
        },
        database,
        chain: ChainHealth {
            reachable,
            current_block,
            signer_nonce,
        },
        chain_id: state.chain_id,
        signer,
        timestamp: now_unix(),
    })
}

#[derive(Debug, Deserialize)]
pub struct OfferRequest {
    #[serde(alias = "workerAddress")]
    pub worker_address: String,
}

fn client_key(connect: Option<&ConnectInfo<SocketAddr>>, headers: &HeaderMap) -> String {
    if let Some(ConnectInfo(addr)) = connect {
        return addr.ip().to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn offer(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(req): Json<OfferRequest>,
) -> ApiResult<Json<OfferResponse>> {
    let worker = parse_address(&req.worker_address)
        .map_err(|e| ApiError::BadRequest(format!("invalid worker address: {e}")))?;
    let key = format!("{}:{}", client_key(connect.as_ref(), &headers), uri.path());
    if let Err(wait) = state.limiter.check(&key) {
        tracing::warn!(client = %key, "offer rate limited");
        return Err(ApiError::RateLimited {
            retry_after_secs: wait.as_secs().max(1),
        });
    }

    let history = load_history(&state, &worker_param(&req.worker_address)?).await;
    let pipeline = state.pipeline.clone();
    let resp = blocking(move || Ok(pipeline.offer(worker, &history, now_unix())?)).await?;
    Ok(Json(resp))
}

#[derive(Debug, Deserialize)]
pub struct WorkerQuery {
    pub worker: String,
}

pub async fn worker_stats(
    State(state): State<AppState>,
    Query(q): Query<WorkerQuery>,
) -> ApiResult<Json<FeatureVector>> {
    Ok(Json(analysis_for(&state, &q.worker).await?.features))
}

pub async fn worker_forecast(
    State(state): State<AppState>,
    Query(q): Query<WorkerQuery>,
) -> ApiResult<Json<IncomeForecast>> {
    Ok(Json(analysis_for(&state, &q.worker).await?.forecast))
}

pub async fn worker_fraud(
    State(state): State<AppState>,
    Query(q): Query<WorkerQuery>,
) -> ApiResult<Json<FraudSignal>> {
    Ok(Json(analysis_for(&state, &q.worker).await?.fraud))
}

pub async fn workproof_integrity(
    State(state): State<AppState>,
    Query(q): Query<WorkerQuery>,
) -> ApiResult<Json<IntegrityReport>> {
    Ok(Json(analysis_for(&state, &q.worker).await?.integrity))
}

pub async fn worker_alerts(
    State(state): State<AppState>,
    Query(q): Query<WorkerQuery>,
) -> ApiResult<Json<EarlyWarning>> {
    Ok(Json(analysis_for(&state, &q.worker).await?.early_warning))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FairnessQuery {
    pub window_days: Option<u32>,
}

pub async fn fairness_audit(
    State(state): State<AppState>,
    Query(q): Query<FairnessQuery>,
) -> ApiResult<Json<FairnessReport>> {
    let days = q.window_days.unwrap_or(DEFAULT_AUDIT_WINDOW_DAYS);
    if !(1..=MAX_AUDIT_WINDOW_DAYS).contains(&days) {
        return Err(ApiError::BadRequest(format!(
            "windowDays must be between 1 and {MAX_AUDIT_WINDOW_DAYS}"
        )));
    }
    let store = state.pipeline.store().clone();
    let since = now_unix() - i64::from(days) * DAY;
    let offers = blocking(move || Ok(store.offer_audits_since(since)?)).await?;
    Ok(Json(run_fairness_audit(&offers, days)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub worker: String,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferHistoryEntry {
    #[serde(flatten)]
    pub record: OfferAuditRecord,
    pub fraud_flag_names: Vec<&'static str>,
}

#[derive(Serialize)]
pub struct OfferHistoryResponse {
    pub worker: String,
    pub offers: Vec<OfferHistoryEntry>,
}

pub async fn offer_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<Json<OfferHistoryResponse>> {
    let worker = worker_param(&q.worker)?;
    let limit = limit_param(q.limit)?;
    let store = state.pipeline.store().clone();
    let w = worker.clone();
    let records = blocking(move || Ok(store.offer_history(&w, limit)?)).await?;
    let offers = records
        .into_iter()
        .map(|record| OfferHistoryEntry {
            fraud_flag_names: record.flags().names(),
            record,
        })
        .collect();
    Ok(Json(OfferHistoryResponse { worker, offers }))
}

#[derive(Debug, Deserialize)]
pub struct LatestEventsQuery {
    pub worker: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct LatestEventsResponse {
    pub count: usize,
    pub events: Vec<ChainEvent>,
}

pub async fn latest_events(
    State(state): State<AppState>,
    Query(q): Query<LatestEventsQuery>,
) -> ApiResult<Json<LatestEventsResponse>> {
    let worker = q.worker.as_deref().map(worker_param).transpose()?;
    let limit = limit_param(q.limit)?;
    let store = state.pipeline.store().clone();
    let events = blocking(move || Ok(store.latest_events(worker.as_deref(), limit)?)).await?;
    Ok(Json(LatestEventsResponse {
        count: events.len(),
        events,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DebugHashQuery {
    pub worker: String,
    pub nonce: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugHashResponse {
    #[serde(flatten)]
    pub hashes: TypedDataHashes,
    pub domain_name: String,
    pub domain_version: String,
    pub chain_id: u64,
    pub verifying_contract: String,
    pub attestation: unempower::attest::AttestationWire,
}

/// Hashes of a fixed sample attestation, for checking the verifier's encoding.
pub async fn debug_eip712_hash(
    State(state): State<AppState>,
    Query(q): Query<DebugHashQuery>,
) -> ApiResult<Json<DebugHashResponse>> {
    let worker = parse_address(&q.worker)
        .map_err(|e| ApiError::BadRequest(format!("invalid worker address: {e}")))?;
    let issued_at = u64::try_from(now_unix()).unwrap_or(0);
    let terms = AttestedTerms {
        trust_score: 5000,
        pd: 100_000,
        credit_limit: (500.0 * USDC_UNIT) as u64,
        apr_bps: 1200,
        tenure_days: 14,
        fraud_flags: 0,
    };
    let mut att = CreditAttestation::issue(worker, terms, issued_at, state.pipeline.ttl_secs());
    if let Some(nonce) = q.nonce {
        att.nonce = nonce;
    }
    let signer = state.pipeline.signer();
    let domain = signer.domain();
    Ok(Json(DebugHashResponse {
        hashes: signer.hashes(&att),
        domain_name: domain.name.clone(),
        domain_version: domain.version.clone(),
        chain_id: domain.chain_id,
        verifying_contract: domain.verifying_contract.to_checksum(None),
        attestation: att.to_wire(),
    }))
}
