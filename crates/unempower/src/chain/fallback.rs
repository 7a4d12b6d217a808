//! Direct chain lookup of a worker's proofs when the store has none.

use crate::chain::abi::{decode_event, EventTopics};
use crate::chain::normalize::{address_topic, normalize_address};
use crate::chain::rpc::{LogFilter, LogSource, RpcError};
use crate::events::{ChainEvent, WorkEvent};
use tracing::{debug, warn};

pub const DEFAULT_LOOKBACK_BLOCKS: u64 = 10_000;

/// `WorkProofSubmitted` logs for `worker` over the last `lookback` blocks, in block order.
/// Undecodable logs are dropped.
pub async fn worker_proofs_from_chain<S: LogSource>(
    source: &S,
    workproof_address: &str,
    worker: &str,
    lookback: u64,
) -> Result<Vec<WorkEvent>, RpcError> {
    let topics = EventTopics::default();
    let current = source.block_number().await?;
    let filter = LogFilter {
        address: normalize_address(workproof_address)?,
        from_block: current.saturating_sub(lookback),
        to_block: Some(current),
        topics: vec![
            Some(topics.work_proof_hex()),
            None,
            Some(address_topic(worker)?),
        ],
    };
    let logs = source.get_logs(&filter).await?;
    let mut out = Vec::with_capacity(logs.len());
    for log in &logs {
        match decode_event(log, &topics) {
            Ok(ChainEvent::WorkProof(ev)) => out.push(ev),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "fallback log decode failed"),
        }
    }
    out.sort_by_key(|e| (e.block_number, e.log_index));
    debug!(worker, count = out.len(), from = filter.from_block, "chain fallback");
    Ok(out)
}
