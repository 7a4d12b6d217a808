//! Event signatures and log decoding for the WorkProof and LoanVault contracts.

use crate::chain::normalize::{decode_hex, normalize_hash, parse_quantity, NormalizeError};
use crate::chain::rpc::RpcLog;
use crate::events::{ChainEvent, LoanEvent, RepayEvent, WorkEvent};
use alloy_primitives::{keccak256, B256, U256};
use thiserror::Error;

pub const WORK_PROOF_SUBMITTED: &str =
    "WorkProofSubmitted(uint256,address,bytes32,uint256,uint256,uint256)";
pub const LOAN_APPROVED: &str = "LoanApproved(address,uint256,uint256,uint64,uint64)";
pub const REPAID: &str = "Repaid(address,uint256,uint256)";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log has no topics")]
    NoTopics,
    #[error("unknown event topic {0}")]
    UnknownEvent(String),
    #[error("{event}: expected {expected} topics, got {got}")]
    TopicCount {
        event: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{event}: expected {expected} data words, got {got} bytes")]
    DataLength {
        event: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{event}: field {field} is out of range")]
    Overflow {
        event: &'static str,
        field: &'static str,
    },
    #[error("log is missing {0}")]
    MissingField(&'static str),
    #[error("normalize: {0}")]
    Normalize(#[from] NormalizeError),
}

impl DecodeError {
    /// True when the log belongs to an event this indexer does not track.
    pub fn is_unknown_event(&self) -> bool {
        matches!(self, DecodeError::UnknownEvent(_))
    }
}

/// keccak256 of a canonical event signature.
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// Topic0 hashes of the tracked events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventTopics {
    pub work_proof: B256,
    pub loan_approved: B256,
    pub repaid: B256,
}

impl Default for EventTopics {
    fn default() -> Self {
        Self {
            work_proof: event_topic(WORK_PROOF_SUBMITTED),
            loan_approved: event_topic(LOAN_APPROVED),
            repaid: event_topic(REPAID),
        }
    }
}

impl EventTopics {
    pub fn work_proof_hex(&self) -> String {
        self.work_proof.to_string()
    }

    /// True if this topic is a LoanVault event whose row needs a block timestamp.
    pub fn is_loan_vault(&self, topic0: &B256) -> bool {
        *topic0 == self.loan_approved || *topic0 == self.repaid
    }
}

fn parse_topic(s: &str) -> Result<B256, DecodeError> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 32 {
        return Err(NormalizeError::InvalidHex(s.to_string()).into());
    }
    Ok(B256::from_slice(&bytes))
}

/// First topic of a log, if any.
pub fn topic0(log: &RpcLog) -> Result<B256, DecodeError> {
    let first = log.topics.first().ok_or(DecodeError::NoTopics)?;
    parse_topic(first)
}

fn data_words(
    log: &RpcLog,
    event: &'static str,
    expected: usize,
) -> Result<Vec<[u8; 32]>, DecodeError> {
    let data = decode_hex(&log.data)?;
    if data.len() < expected * 32 {
        return Err(DecodeError::DataLength {
            event,
            expected,
            got: data.len(),
        });
    }
    Ok(data
        .chunks_exact(32)
        .take(expected)
        .map(|c| {
            let mut w = [0u8; 32];
            w.copy_from_slice(c);
            w
        })
        .collect())
}

fn word_u256(w: &[u8; 32]) -> U256 {
    U256::from_be_bytes(*w)
}

fn word_u64(w: &[u8; 32], event: &'static str, field: &'static str) -> Result<u64, DecodeError> {
    if w[..24].iter().any(|b| *b != 0) {
        return Err(DecodeError::Overflow { event, field });
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&w[24..]);
    Ok(u64::from_be_bytes(tail))
}

/// Timestamps are signed in storage; anything past `i64::MAX` is malformed.
fn word_i64(w: &[u8; 32], event: &'static str, field: &'static str) -> Result<i64, DecodeError> {
    i64::try_from(word_u64(w, event, field)?).map_err(|_| DecodeError::Overflow { event, field })
}

fn word_address(w: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(&w[12..]))
}

fn topic_word(log: &RpcLog, idx: usize) -> Result<[u8; 32], DecodeError> {
    let t = parse_topic(&log.topics[idx])?;
    Ok(t.0)
}

fn check_topics(log: &RpcLog, event: &'static str, expected: usize) -> Result<(), DecodeError> {
    if log.topics.len() != expected {
        return Err(DecodeError::TopicCount {
            event,
            expected,
            got: log.topics.len(),
        });
    }
    Ok(())
}

struct LogPosition {
    block_number: u64,
    tx_hash: String,
    log_index: u64,
}

fn position(log: &RpcLog) -> Result<LogPosition, DecodeError> {
    let block_number = parse_quantity(
        log.block_number
            .as_deref()
            .ok_or(DecodeError::MissingField("blockNumber"))?,
    )?;
    let tx_hash = normalize_hash(
        log.transaction_hash
            .as_deref()
            .ok_or(DecodeError::MissingField("transactionHash"))?,
    )?;
    let log_index = parse_quantity(
        log.log_index
            .as_deref()
            .ok_or(DecodeError::MissingField("logIndex"))?,
    )?;
    Ok(LogPosition {
        block_number,
        tx_hash,
        log_index,
    })
}

fn block_timestamp(log: &RpcLog) -> Result<i64, DecodeError> {
    let raw = log
        .block_timestamp
        .as_deref()
        .ok_or(DecodeError::MissingField("blockTimestamp"))?;
    i64::try_from(parse_quantity(raw)?).map_err(|_| DecodeError::Overflow {
        event: "log",
        field: "blockTimestamp",
    })
}

/// Decode one log into a typed event. Unknown topics and malformed payloads are errors
/// so the caller can skip the log without aborting the batch.
pub fn decode_event(log: &RpcLog, topics: &EventTopics) -> Result<ChainEvent, DecodeError> {
    let t0 = topic0(log)?;
    if t0 == topics.work_proof {
        decode_work_proof(log).map(ChainEvent::WorkProof)
    } else if t0 == topics.loan_approved {
        decode_loan_approved(log).map(ChainEvent::Loan)
    } else if t0 == topics.repaid {
        decode_repaid(log).map(ChainEvent::Repay)
    } else {
        Err(DecodeError::UnknownEvent(t0.to_string()))
    }
}

fn decode_work_proof(log: &RpcLog) -> Result<WorkEvent, DecodeError> {
    const EV: &str = "WorkProofSubmitted";
    check_topics(log, EV, 3)?;
    let pos = position(log)?;
    let proof_id = word_u256(&topic_word(log, 1)?);
    let worker = word_address(&topic_word(log, 2)?);
    let words = data_words(log, EV, 4)?;
    Ok(WorkEvent {
        proof_id: proof_id.to_string(),
        worker,
        proof_hash: format!("0x{}", hex::encode(words[0])),
        work_units: word_u64(&words[1], EV, "workUnits")?,
        earned_amount: word_u256(&words[2]).to_string(),
        event_timestamp: word_i64(&words[3], EV, "timestamp")?,
        block_number: pos.block_number,
        tx_hash: pos.tx_hash,
        log_index: pos.log_index,
    })
}

fn decode_loan_approved(log: &RpcLog) -> Result<LoanEvent, DecodeError> {
    const EV: &str = "LoanApproved";
    check_topics(log, EV, 2)?;
    let pos = position(log)?;
    let borrower = word_address(&topic_word(log, 1)?);
    let words = data_words(log, EV, 4)?;
    Ok(LoanEvent {
        borrower,
        principal: word_u256(&words[0]).to_string(),
        interest_amount: word_u256(&words[1]).to_string(),
        due_date: word_u64(&words[2], EV, "dueDate")?,
        nonce: word_u64(&words[3], EV, "nonce")?,
        block_number: pos.block_number,
        block_timestamp: block_timestamp(log)?,
        tx_hash: pos.tx_hash,
        log_index: pos.log_index,
    })
}

fn decode_repaid(log: &RpcLog) -> Result<RepayEvent, DecodeError> {
    const EV: &str = "Repaid";
    check_topics(log, EV, 2)?;
    let pos = position(log)?;
    let borrower = word_address(&topic_word(log, 1)?);
    let words = data_words(log, EV, 2)?;
    Ok(RepayEvent {
        borrower,
        amount: word_u256(&words[0]).to_string(),
        remaining: word_u256(&words[1]).to_string(),
        block_number: pos.block_number,
        block_timestamp: block_timestamp(log)?,
        tx_hash: pos.tx_hash,
        log_index: pos.log_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(v: u128) -> String {
        hex::encode(U256::from(v).to_be_bytes::<32>())
    }

    fn addr_word(a: &str) -> String {
        format!("0x{}{}", "0".repeat(24), &a[2..])
    }

    const WORKER: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";

    fn work_log() -> RpcLog {
        let topics = EventTopics::default();
        RpcLog {
            address: "0x5fbdb2315678afecb367f032d93f642f64180aa3".into(),
            topics: vec![
                topics.work_proof.to_string(),
                format!("0x{}", word(42)),
                addr_word(WORKER),
            ],
            data: format!(
                "0x{}{}{}{}",
                "11".repeat(32),
                word(4),
                word(250_000_000),
                word(1_700_000_000)
            ),
            block_number: Some("0x64".into()),
            transaction_hash: Some(format!("0x{}", "aa".repeat(32))),
            log_index: Some("0x2".into()),
            block_timestamp: None,
        }
    }

    #[test]
    fn transfer_topic_matches_known_hash() {
        assert_eq!(
            event_topic("Transfer(address,address,uint256)").to_string(),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn decodes_work_proof() {
        let ev = decode_event(&work_log(), &EventTopics::default()).unwrap();
        let ChainEvent::WorkProof(w) = ev else {
            panic!("expected work proof");
        };
        assert_eq!(w.proof_id, "42");
        assert_eq!(w.worker, WORKER);
        assert_eq!(w.work_units, 4);
        assert_eq!(w.earned_amount, "250000000");
        assert_eq!(w.event_timestamp, 1_700_000_000);
        assert_eq!(w.block_number, 100);
        assert_eq!(w.log_index, 2);
        assert_eq!(w.proof_hash, format!("0x{}", "11".repeat(32)));
    }

    #[test]
    fn earned_amount_beyond_u64_survives_as_decimal() {
        let big = U256::from(1u8) << 100usize;
        let mut log = work_log();
        log.data = format!(
            "0x{}{}{}{}",
            "11".repeat(32),
            word(4),
            hex::encode(big.to_be_bytes::<32>()),
            word(1_700_000_000)
        );
        let ChainEvent::WorkProof(w) = decode_event(&log, &EventTopics::default()).unwrap() else {
            panic!("expected work proof");
        };
        assert_eq!(w.earned_amount, big.to_string());
        assert_eq!(w.earned_amount, "1267650600228229401496703205376");
    }

    #[test]
    fn short_data_is_a_decode_error() {
        let mut log = work_log();
        log.data = format!("0x{}", word(1));
        let err = decode_event(&log, &EventTopics::default()).unwrap_err();
        assert!(matches!(err, DecodeError::DataLength { .. }));
    }

    #[test]
    fn timestamp_past_i64_is_rejected() {
        let mut log = work_log();
        log.data = format!(
            "0x{}{}{}{}",
            "11".repeat(32),
            word(4),
            word(250_000_000),
            word(u128::from(u64::MAX))
        );
        let err = decode_event(&log, &EventTopics::default()).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Overflow {
                event: "WorkProofSubmitted",
                field: "timestamp"
            }
        );

        log.data = format!(
            "0x{}{}{}{}",
            "11".repeat(32),
            word(4),
            word(250_000_000),
            word(i64::MAX as u128)
        );
        let ChainEvent::WorkProof(w) = decode_event(&log, &EventTopics::default()).unwrap() else {
            panic!("expected work proof");
        };
        assert_eq!(w.event_timestamp, i64::MAX);
    }

    #[test]
    fn unknown_topic_is_reported() {
        let mut log = work_log();
        log.topics[0] = event_topic("Other(uint256)").to_string();
        let err = decode_event(&log, &EventTopics::default()).unwrap_err();
        assert!(err.is_unknown_event());
    }

    #[test]
    fn loan_needs_block_timestamp() {
        let topics = EventTopics::default();
        let mut log = RpcLog {
            address: "0x9fe46736679d2d9a65f0992f2272de9f3c7fa6e0".into(),
            topics: vec![topics.loan_approved.to_string(), addr_word(WORKER)],
            data: format!(
                "0x{}{}{}{}",
                word(100_000_000),
                word(5_000_000),
                word(1_700_600_000),
                word(7)
            ),
            block_number: Some("0x65".into()),
            transaction_hash: Some(format!("0x{}", "bb".repeat(32))),
            log_index: Some("0x0".into()),
            block_timestamp: None,
        };
        assert_eq!(
            decode_event(&log, &topics).unwrap_err(),
            DecodeError::MissingField("blockTimestamp")
        );
        log.block_timestamp = Some("0x6553f100".into());
        let ChainEvent::Loan(l) = decode_event(&log, &topics).unwrap() else {
            panic!("expected loan");
        };
        assert_eq!(l.borrower, WORKER);
        assert_eq!(l.principal, "100000000");
        assert_eq!(l.nonce, 7);
        assert_eq!(l.block_timestamp, 0x6553f100);
    }
}
