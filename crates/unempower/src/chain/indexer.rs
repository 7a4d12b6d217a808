//! Checkpointed, chunked ingestion of WorkProof and LoanVault logs into the event store.

use crate::chain::abi::{decode_event, topic0, DecodeError, EventTopics};
use crate::chain::normalize::{normalize_address, NormalizeError};
use crate::chain::rpc::{LogFilter, LogSource, RpcError, RpcLog};
use crate::events::ChainEvent;
use crate::store::{EventStore, StoreError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CHUNK_SIZE: u64 = 100;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("invalid block range {from}..={to}")]
    InvalidRange { from: u64, to: u64 },
    #[error("invalid contract address: {0}")]
    Address(#[from] NormalizeError),
}

#[derive(Clone, Debug)]
pub struct IndexerConfig {
    pub chain_id: u64,
    pub workproof_address: String,
    pub loan_vault_address: String,
    pub chunk_size: u64,
    pub poll_interval: Duration,
    pub start_block: u64,
}

impl IndexerConfig {
    pub fn new(chain_id: u64, workproof_address: &str, loan_vault_address: &str) -> Self {
        Self {
            chain_id,
            workproof_address: workproof_address.to_string(),
            loan_vault_address: loan_vault_address.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            start_block: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexerState {
    CatchingUp,
    Idle,
}

/// Result of processing one inclusive block range.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub from_block: u64,
    pub to_block: u64,
    pub logs: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub unknown: usize,
    #[serde(skip)]
    pub decode_errors: Vec<DecodeError>,
}

#[derive(Clone, Debug)]
pub struct TickOutcome {
    pub state: IndexerState,
    pub current_block: u64,
    pub last_processed: u64,
    pub report: Option<PollReport>,
}

pub struct ChainIndexer<S> {
    source: S,
    store: Arc<EventStore>,
    config: IndexerConfig,
    topics: EventTopics,
}

impl<S: LogSource> ChainIndexer<S> {
    pub fn new(
        source: S,
        store: Arc<EventStore>,
        mut config: IndexerConfig,
    ) -> Result<Self, IndexerError> {
        config.workproof_address = normalize_address(&config.workproof_address)?;
        config.loan_vault_address = normalize_address(&config.loan_vault_address)?;
        config.chunk_size = config.chunk_size.max(1);
        Ok(Self {
            source,
            store,
            config,
            topics: EventTopics::default(),
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch, decode and store every tracked log in `from..=to`, then advance the
    /// checkpoint to `to`. Logs that fail to decode are reported and skipped.
    /// Replaying a range inserts nothing new.
    pub async fn poll_once(&self, from: u64, to: u64) -> Result<PollReport, IndexerError> {
        if from > to {
            return Err(IndexerError::InvalidRange { from, to });
        }
        let work_logs = self
            .source
            .get_logs(&LogFilter {
                address: self.config.workproof_address.clone(),
                from_block: from,
                to_block: Some(to),
                topics: vec![Some(self.topics.work_proof_hex())],
            })
            .await?;
        let mut vault_logs = self
            .source
            .get_logs(&LogFilter {
                address: self.config.loan_vault_address.clone(),
                from_block: from,
                to_block: Some(to),
                topics: vec![],
            })
            .await?;
        self.attach_block_timestamps(&mut vault_logs).await?;

        let mut report = PollReport {
            from_block: from,
            to_block: to,
            logs: work_logs.len() + vault_logs.len(),
            ..Default::default()
        };
        let mut events: Vec<ChainEvent> = Vec::with_capacity(report.logs);
        for log in work_logs.iter().chain(vault_logs.iter()) {
            match decode_event(log, &self.topics) {
                Ok(ev) => events.push(ev),
                Err(e) if e.is_unknown_event() => {
                    debug!(error = %e, "skipping untracked log");
                    report.unknown += 1;
                }
                Err(e) => {
                    warn!(
                        tx = log.transaction_hash.as_deref().unwrap_or("?"),
                        error = %e,
                        "log decode failed"
                    );
                    report.decode_errors.push(e);
                }
            }
        }
        events.sort_by_key(|e| (e.block_number(), e.log_index()));

        let ingest = self
            .store
            .ingest_chunk(self.config.chain_id, &events, to)?;
        report.inserted = ingest.inserted;
        report.duplicates = ingest.duplicates;
        info!(
            from_block = from,
            to_block = to,
            logs = report.logs,
            inserted = report.inserted,
            duplicates = report.duplicates,
            decode_errors = report.decode_errors.len(),
            "chunk indexed"
        );
        Ok(report)
    }

    /// LoanVault events carry no timestamp; use the including block's, once per block.
    async fn attach_block_timestamps(&self, logs: &mut [RpcLog]) -> Result<(), IndexerError> {
        let mut cache: HashMap<u64, i64> = HashMap::new();
        for log in logs.iter_mut() {
            if log.block_timestamp.is_some() {
                continue;
            }
            let tracked = topic0(log)
                .map(|t| self.topics.is_loan_vault(&t))
                .unwrap_or(false);
            if !tracked {
                continue;
            }
            let Some(block) = log
                .block_number
                .as_deref()
                .and_then(|b| crate::chain::normalize::parse_quantity(b).ok())
            else {
                continue;
            };
            let ts = match cache.get(&block) {
                Some(ts) => *ts,
                None => {
                    let ts = self.source.block_timestamp(block).await?;
                    cache.insert(block, ts);
                    ts
                }
            };
            log.block_timestamp = Some(ts.to_string());
        }
        Ok(())
    }

    /// One step of the main loop: process at most one chunk past the checkpoint.
    pub async fn tick(&self) -> Result<TickOutcome, IndexerError> {
        let current = self.source.block_number().await?;
        let last = self
            .store
            .checkpoint_or_init(self.config.chain_id, self.config.start_block)?;
        if last >= current {
            return Ok(TickOutcome {
                state: IndexerState::Idle,
                current_block: current,
                last_processed: last,
                report: None,
            });
        }
        let from = last + 1;
        let to = (from + self.config.chunk_size - 1).min(current);
        let report = self.poll_once(from, to).await?;
        let state = if to < current {
            IndexerState::CatchingUp
        } else {
            IndexerState::Idle
        };
        Ok(TickOutcome {
            state,
            current_block: current,
            last_processed: to,
            report: Some(report),
        })
    }

    /// Run until `shutdown` flips to true. Chunks are processed back to back while
    /// catching up; the loop sleeps one poll interval when idle or after a failed tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            chain_id = self.config.chain_id,
            workproof = %self.config.workproof_address,
            loan_vault = %self.config.loan_vault_address,
            chunk_size = self.config.chunk_size,
            "indexer started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let pause = match self.tick().await {
                Ok(outcome) if outcome.state == IndexerState::CatchingUp => {
                    debug!(
                        last_processed = outcome.last_processed,
                        current_block = outcome.current_block,
                        "catching up"
                    );
                    false
                }
                Ok(_) => true,
                Err(e) => {
                    error!(error = %e, "indexer tick failed; retrying next interval");
                    true
                }
            };
            if pause {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
        info!("indexer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::abi::{event_topic, LOAN_APPROVED};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const WP: &str = "0x00000000000000000000000000000000000000a1";
    const LV: &str = "0x00000000000000000000000000000000000000b2";

    #[derive(Default)]
    struct FakeChain {
        head: u64,
        logs: Mutex<Vec<RpcLog>>,
        timestamp_calls: AtomicUsize,
    }

    impl LogSource for FakeChain {
        async fn block_number(&self) -> Result<u64, RpcError> {
            Ok(self.head)
        }

        async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, RpcError> {
            let to = filter.to_block.unwrap_or(self.head);
            let logs = self.logs.lock().unwrap();
            Ok(logs
                .iter()
                .filter(|l| l.address == filter.address)
                .filter(|l| {
                    let b = u64::from_str_radix(&l.block_number.clone().unwrap()[2..], 16).unwrap();
                    b >= filter.from_block && b <= to
                })
                .cloned()
                .collect())
        }

        async fn block_timestamp(&self, block: u64) -> Result<i64, RpcError> {
            self.timestamp_calls.fetch_add(1, Ordering::SeqCst);
            Ok(1_700_000_000 + block as i64)
        }
    }

    fn loan_log(block: u64, tx: u64) -> RpcLog {
        let mut data = String::from("0x");
        for v in [500_000_000u64, 10_000_000, 1_800_000_000, 1] {
            data.push_str(&format!("{:064x}", v));
        }
        RpcLog {
            address: LV.into(),
            topics: vec![
                event_topic(LOAN_APPROVED).to_string(),
                format!("0x{:064x}", 0xbeefu64),
            ],
            data,
            block_number: Some(format!("0x{:x}", block)),
            transaction_hash: Some(format!("0x{:064x}", tx)),
            log_index: Some("0x0".into()),
            block_timestamp: None,
        }
    }

    fn indexer(chain: FakeChain) -> ChainIndexer<FakeChain> {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let mut cfg = IndexerConfig::new(31337, WP, LV);
        cfg.chunk_size = 10;
        cfg.start_block = 1;
        ChainIndexer::new(chain, store, cfg).unwrap()
    }

    #[tokio::test]
    async fn loan_rows_get_block_timestamps_once_per_block() {
        let chain = FakeChain {
            head: 20,
            ..Default::default()
        };
        chain
            .logs
            .lock()
            .unwrap()
            .extend([loan_log(5, 1), loan_log(5, 2), loan_log(7, 3)]);
        let idx = indexer(chain);
        let report = idx.poll_once(1, 10).await.unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(idx.source().timestamp_calls.load(Ordering::SeqCst), 2);
        let h = idx
            .store
            .worker_history("0x000000000000000000000000000000000000beef")
            .unwrap();
        assert_eq!(h.loans[0].block_timestamp, 1_700_000_005);
    }

    #[tokio::test]
    async fn malformed_log_does_not_abort_chunk() {
        let chain = FakeChain {
            head: 20,
            ..Default::default()
        };
        let mut bad = loan_log(6, 9);
        bad.data = "0x00".into();
        chain
            .logs
            .lock()
            .unwrap()
            .extend([bad, loan_log(8, 10)]);
        let idx = indexer(chain);
        let report = idx.poll_once(1, 10).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.decode_errors.len(), 1);
        assert_eq!(idx.store.checkpoint(31337).unwrap(), Some(10));
    }

    #[tokio::test]
    async fn tick_walks_chunks_until_idle() {
        let chain = FakeChain {
            head: 25,
            ..Default::default()
        };
        let idx = indexer(chain);
        let a = idx.tick().await.unwrap();
        assert_eq!(a.state, IndexerState::CatchingUp);
        assert_eq!(a.last_processed, 10);
        let b = idx.tick().await.unwrap();
        assert_eq!(b.last_processed, 20);
        let c = idx.tick().await.unwrap();
        assert_eq!(c.state, IndexerState::Idle);
        assert_eq!(c.last_processed, 25);
        let d = idx.tick().await.unwrap();
        assert_eq!(d.state, IndexerState::Idle);
        assert!(d.report.is_none());
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let idx = indexer(FakeChain::default());
        assert!(matches!(
            idx.poll_once(10, 5).await,
            Err(IndexerError::InvalidRange { .. })
        ));
    }
}
