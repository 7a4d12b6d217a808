//! Decoded chain events and the per-worker history assembled from them.

use serde::{Deserialize, Serialize};

/// `WorkProofSubmitted` row. `earned_amount` is a uint256 kept as a decimal string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkEvent {
    pub proof_id: String,
    pub worker: String,
    pub proof_hash: String,
    pub work_units: u64,
    pub earned_amount: String,
    pub event_timestamp: i64,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

/// `LoanApproved` row. The contract emits no timestamp, so `block_timestamp` is the
/// timestamp of the block that included the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanEvent {
    pub borrower: String,
    pub principal: String,
    pub interest_amount: String,
    pub due_date: u64,
    pub nonce: u64,
    pub block_number: u64,
    pub block_timestamp: i64,
    pub tx_hash: String,
    pub log_index: u64,
}

/// `Repaid` row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepayEvent {
    pub borrower: String,
    pub amount: String,
    pub remaining: String,
    pub block_number: u64,
    pub block_timestamp: i64,
    pub tx_hash: String,
    pub log_index: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChainEvent {
    #[serde(rename = "WorkProofSubmitted")]
    WorkProof(WorkEvent),
    #[serde(rename = "LoanApproved")]
    Loan(LoanEvent),
    #[serde(rename = "Repaid")]
    Repay(RepayEvent),
}

impl ChainEvent {
    pub fn tx_hash(&self) -> &str {
        match self {
            ChainEvent::WorkProof(e) => &e.tx_hash,
            ChainEvent::Loan(e) => &e.tx_hash,
            ChainEvent::Repay(e) => &e.tx_hash,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            ChainEvent::WorkProof(e) => e.block_number,
            ChainEvent::Loan(e) => e.block_number,
            ChainEvent::Repay(e) => e.block_number,
        }
    }

    pub fn log_index(&self) -> u64 {
        match self {
            ChainEvent::WorkProof(e) => e.log_index,
            ChainEvent::Loan(e) => e.log_index,
            ChainEvent::Repay(e) => e.log_index,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChainEvent::WorkProof(_) => "WorkProofSubmitted",
            ChainEvent::Loan(_) => "LoanApproved",
            ChainEvent::Repay(_) => "Repaid",
        }
    }
}

/// Everything known about one worker. Work proofs are kept in store order
/// (block number, then log index), which is not necessarily timestamp order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHistory {
    pub worker: String,
    pub work: Vec<WorkEvent>,
    pub loans: Vec<LoanEvent>,
    pub repays: Vec<RepayEvent>,
}

impl WorkerHistory {
    pub fn empty(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.work.is_empty() && self.loans.is_empty() && self.repays.is_empty()
    }

    /// Work proofs with `event_timestamp >= since`, in store order.
    pub fn work_since(&self, since: i64) -> impl Iterator<Item = &WorkEvent> {
        self.work.iter().filter(move |e| e.event_timestamp >= since)
    }

    /// Work proofs with `event_timestamp >= since`, sorted by timestamp ascending.
    pub fn work_since_chronological(&self, since: i64) -> Vec<&WorkEvent> {
        let mut out: Vec<&WorkEvent> = self.work_since(since).collect();
        out.sort_by_key(|e| (e.event_timestamp, e.block_number, e.log_index));
        out
    }

    pub fn latest_work_timestamp(&self) -> Option<i64> {
        self.work.iter().map(|e| e.event_timestamp).max()
    }
}
