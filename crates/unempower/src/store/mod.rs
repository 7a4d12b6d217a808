//! SQLite event store: decoded chain events, the per-chain checkpoint and the offer audit log.

use crate::events::{ChainEvent, LoanEvent, RepayEvent, WorkEvent, WorkerHistory};
use crate::offer::OfferAuditRecord;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS work_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    proof_id TEXT NOT NULL,
    worker TEXT NOT NULL,
    proof_hash TEXT NOT NULL,
    work_units INTEGER NOT NULL,
    earned_amount TEXT NOT NULL,
    event_timestamp INTEGER NOT NULL,
    block_number INTEGER NOT NULL,
    tx_hash TEXT NOT NULL UNIQUE,
    log_index INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_work_worker ON work_events(worker, block_number, log_index);

CREATE TABLE IF NOT EXISTS loan_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    borrower TEXT NOT NULL,
    principal TEXT NOT NULL,
    interest_amount TEXT NOT NULL,
    due_date INTEGER NOT NULL,
    nonce INTEGER NOT NULL,
    block_number INTEGER NOT NULL,
    block_timestamp INTEGER NOT NULL,
    tx_hash TEXT NOT NULL UNIQUE,
    log_index INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_loan_borrower ON loan_events(borrower, block_number, log_index);

CREATE TABLE IF NOT EXISTS repay_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    borrower TEXT NOT NULL,
    amount TEXT NOT NULL,
    remaining TEXT NOT NULL,
    block_number INTEGER NOT NULL,
    block_timestamp INTEGER NOT NULL,
    tx_hash TEXT NOT NULL UNIQUE,
    log_index INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_repay_borrower ON repay_events(borrower, block_number, log_index);

CREATE TABLE IF NOT EXISTS indexer_checkpoint (
    chain_id INTEGER PRIMARY KEY,
    last_processed_block INTEGER NOT NULL,
    updated_utc INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS offer_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    worker TEXT NOT NULL,
    trust_score INTEGER NOT NULL,
    pd INTEGER NOT NULL,
    credit_limit INTEGER NOT NULL,
    apr_bps INTEGER NOT NULL,
    tenure_days INTEGER NOT NULL,
    fraud_flags INTEGER NOT NULL,
    anomaly_score INTEGER NOT NULL,
    integrity_score INTEGER NOT NULL,
    risk_score INTEGER NOT NULL,
    forecast_14d REAL NOT NULL,
    forecast_confidence REAL NOT NULL,
    created_utc INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_offer_audit_created ON offer_audit(created_utc);
CREATE INDEX IF NOT EXISTS idx_offer_audit_worker ON offer_audit(worker, created_utc);
"#;

/// Outcome of one ingested chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCounts {
    pub work_proofs: u64,
    pub loans: u64,
    pub repays: u64,
}

/// Append-only store. Worker and borrower addresses are stored lowercase.
#[derive(Debug)]
pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    /// Open or create the store at `path`. Creates parent dirs if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()).into())
    }

    /// Cheap reachability check used by the health endpoint.
    pub fn ping(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }

    pub fn checkpoint(&self, chain_id: u64) -> Result<Option<u64>, StoreError> {
        let conn = self.lock()?;
        let v = conn
            .query_row(
                "SELECT last_processed_block FROM indexer_checkpoint WHERE chain_id = ?1",
                [chain_id as i64],
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        Ok(v.map(|b| b as u64))
    }

    /// Read the checkpoint, creating it so that `start_block` is the first block indexed.
    pub fn checkpoint_or_init(&self, chain_id: u64, start_block: u64) -> Result<u64, StoreError> {
        let initial = start_block.saturating_sub(1);
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO indexer_checkpoint (chain_id, last_processed_block, updated_utc)
             VALUES (?1, ?2, ?3)",
            params![chain_id as i64, initial as i64, now_utc()],
        )?;
        let v: i64 = conn.query_row(
            "SELECT last_processed_block FROM indexer_checkpoint WHERE chain_id = ?1",
            [chain_id as i64],
            |r| r.get(0),
        )?;
        Ok(v as u64)
    }

    /// Insert a decoded chunk and advance the checkpoint to `to_block` in one transaction.
    /// Rows whose tx hash is already present are skipped, so replaying a range is a no-op.
    /// The checkpoint never moves backwards.
    pub fn ingest_chunk(
        &self,
        chain_id: u64,
        events: &[ChainEvent],
        to_block: u64,
    ) -> Result<IngestReport, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut report = IngestReport::default();
        for ev in events {
            if insert_event(&tx, ev)? {
                report.inserted += 1;
            } else {
                report.duplicates += 1;
            }
        }
        tx.execute(
            "INSERT INTO indexer_checkpoint (chain_id, last_processed_block, updated_utc)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(chain_id) DO UPDATE SET
                last_processed_block = MAX(last_processed_block, excluded.last_processed_block),
                updated_utc = excluded.updated_utc",
            params![chain_id as i64, to_block as i64, now_utc()],
        )?;
        tx.commit()?;
        debug!(
            chain_id,
            to_block,
            inserted = report.inserted,
            duplicates = report.duplicates,
            "chunk committed"
        );
        Ok(report)
    }

    /// All events for `worker`, each list in store order (block number, log index).
    pub fn worker_history(&self, worker: &str) -> Result<WorkerHistory, StoreError> {
        let worker = worker.to_ascii_lowercase();
        let conn = self.lock()?;
        let work = query_work(
            &conn,
            "WHERE worker = ?1 ORDER BY block_number ASC, log_index ASC",
            params![worker],
        )?;
        let loans = query_loans(
            &conn,
            "WHERE borrower = ?1 ORDER BY block_number ASC, log_index ASC",
            params![worker],
        )?;
        let repays = query_repays(
            &conn,
            "WHERE borrower = ?1 ORDER BY block_number ASC, log_index ASC",
            params![worker],
        )?;
        Ok(WorkerHistory {
            worker,
            work,
            loans,
            repays,
        })
    }

    pub fn event_counts(&self) -> Result<EventCounts, StoreError> {
        let conn = self.lock()?;
        let count = |table: &str| -> Result<u64, rusqlite::Error> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| {
                r.get::<_, i64>(0)
            })
            .map(|n| n as u64)
        };
        Ok(EventCounts {
            work_proofs: count("work_events")?,
            loans: count("loan_events")?,
            repays: count("repay_events")?,
        })
    }

    /// Most recent events across all tables, newest first, optionally for one address.
    pub fn latest_events(
        &self,
        worker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChainEvent>, StoreError> {
        let conn = self.lock()?;
        let lim = limit as i64;
        let (work, loans, repays) = match worker {
            Some(w) => {
                let w = w.to_ascii_lowercase();
                (
                    query_work(
                        &conn,
                        "WHERE worker = ?1 ORDER BY block_number DESC, log_index DESC LIMIT ?2",
                        params![w, lim],
                    )?,
                    query_loans(
                        &conn,
                        "WHERE borrower = ?1 ORDER BY block_number DESC, log_index DESC LIMIT ?2",
                        params![w, lim],
                    )?,
                    query_repays(
                        &conn,
                        "WHERE borrower = ?1 ORDER BY block_number DESC, log_index DESC LIMIT ?2",
                        params![w, lim],
                    )?,
                )
            }
            None => (
                query_work(
                    &conn,
                    "ORDER BY block_number DESC, log_index DESC LIMIT ?1",
                    params![lim],
                )?,
                query_loans(
                    &conn,
                    "ORDER BY block_number DESC, log_index DESC LIMIT ?1",
                    params![lim],
                )?,
                query_repays(
                    &conn,
                    "ORDER BY block_number DESC, log_index DESC LIMIT ?1",
                    params![lim],
                )?,
            ),
        };
        let mut all: Vec<ChainEvent> = work
            .into_iter()
            .map(ChainEvent::WorkProof)
            .chain(loans.into_iter().map(ChainEvent::Loan))
            .chain(repays.into_iter().map(ChainEvent::Repay))
            .collect();
        all.sort_by(|a, b| {
            (b.block_number(), b.log_index()).cmp(&(a.block_number(), a.log_index()))
        });
        all.truncate(limit);
        Ok(all)
    }

    pub fn insert_offer_audit(&self, rec: &OfferAuditRecord) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO offer_audit (worker, trust_score, pd, credit_limit, apr_bps, tenure_days,
                fraud_flags, anomaly_score, integrity_score, risk_score, forecast_14d,
                forecast_confidence, created_utc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                rec.worker.to_ascii_lowercase(),
                rec.trust_score,
                rec.pd,
                rec.credit_limit as i64,
                rec.apr_bps,
                rec.tenure_days,
                rec.fraud_flags,
                rec.anomaly_score,
                rec.integrity_score,
                rec.risk_score,
                rec.forecast_14d,
                rec.forecast_confidence,
                rec.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Audit rows created at or after `since` (unix seconds), oldest first.
    pub fn offer_audits_since(&self, since: i64) -> Result<Vec<OfferAuditRecord>, StoreError> {
        let conn = self.lock()?;
        query_audits(
            &conn,
            "WHERE created_utc >= ?1 ORDER BY created_utc ASC, id ASC",
            params![since],
        )
    }

    /// Latest audit rows for one worker, newest first.
    pub fn offer_history(
        &self,
        worker: &str,
        limit: usize,
    ) -> Result<Vec<OfferAuditRecord>, StoreError> {
        let conn = self.lock()?;
        query_audits(
            &conn,
            "WHERE worker = ?1 ORDER BY created_utc DESC, id DESC LIMIT ?2",
            params![worker.to_ascii_lowercase(), limit as i64],
        )
    }
}

fn now_utc() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

fn exists(tx: &Transaction<'_>, table: &str, tx_hash: &str) -> Result<bool, rusqlite::Error> {
    tx.query_row(
        &format!("SELECT 1 FROM {table} WHERE tx_hash = ?1"),
        [tx_hash],
        |_| Ok(()),
    )
    .optional()
    .map(|r| r.is_some())
}

/// Returns false when a row with the same tx hash already exists.
fn insert_event(tx: &Transaction<'_>, ev: &ChainEvent) -> Result<bool, rusqlite::Error> {
    match ev {
        ChainEvent::WorkProof(e) => {
            if exists(tx, "work_events", &e.tx_hash)? {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO work_events (proof_id, worker, proof_hash, work_units, earned_amount,
                    event_timestamp, block_number, tx_hash, log_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    e.proof_id,
                    e.worker.to_ascii_lowercase(),
                    e.proof_hash,
                    e.work_units as i64,
                    e.earned_amount,
                    e.event_timestamp,
                    e.block_number as i64,
                    e.tx_hash,
                    e.log_index as i64,
                ],
            )?;
        }
        ChainEvent::Loan(e) => {
            if exists(tx, "loan_events", &e.tx_hash)? {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO loan_events (borrower, principal, interest_amount, due_date, nonce,
                    block_number, block_timestamp, tx_hash, log_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    e.borrower.to_ascii_lowercase(),
                    e.principal,
                    e.interest_amount,
                    e.due_date as i64,
                    e.nonce as i64,
                    e.block_number as i64,
                    e.block_timestamp,
                    e.tx_hash,
                    e.log_index as i64,
                ],
            )?;
        }
        ChainEvent::Repay(e) => {
            if exists(tx, "repay_events", &e.tx_hash)? {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO repay_events (borrower, amount, remaining, block_number,
                    block_timestamp, tx_hash, log_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    e.borrower.to_ascii_lowercase(),
                    e.amount,
                    e.remaining,
                    e.block_number as i64,
                    e.block_timestamp,
                    e.tx_hash,
                    e.log_index as i64,
                ],
            )?;
        }
    }
    Ok(true)
}

fn query_work(
    conn: &Connection,
    tail: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<WorkEvent>, StoreError> {
    let sql = format!(
        "SELECT proof_id, worker, proof_hash, work_units, earned_amount, event_timestamp,
                block_number, tx_hash, log_index FROM work_events {tail}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, |r| {
        Ok(WorkEvent {
            proof_id: r.get(0)?,
            worker: r.get(1)?,
            proof_hash: r.get(2)?,
            work_units: r.get::<_, i64>(3)? as u64,
            earned_amount: r.get(4)?,
            event_timestamp: r.get(5)?,
            block_number: r.get::<_, i64>(6)? as u64,
            tx_hash: r.get(7)?,
            log_index: r.get::<_, i64>(8)? as u64,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn query_loans(
    conn: &Connection,
    tail: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<LoanEvent>, StoreError> {
    let sql = format!(
        "SELECT borrower, principal, interest_amount, due_date, nonce, block_number,
                block_timestamp, tx_hash, log_index FROM loan_events {tail}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, |r| {
        Ok(LoanEvent {
            borrower: r.get(0)?,
            principal: r.get(1)?,
            interest_amount: r.get(2)?,
            due_date: r.get::<_, i64>(3)? as u64,
            nonce: r.get::<_, i64>(4)? as u64,
            block_number: r.get::<_, i64>(5)? as u64,
            block_timestamp: r.get(6)?,
            tx_hash: r.get(7)?,
            log_index: r.get::<_, i64>(8)? as u64,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn query_repays(
    conn: &Connection,
    tail: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<RepayEvent>, StoreError> {
    let sql = format!(
        "SELECT borrower, amount, remaining, block_number, block_timestamp, tx_hash, log_index
         FROM repay_events {tail}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, |r| {
        Ok(RepayEvent {
            borrower: r.get(0)?,
            amount: r.get(1)?,
            remaining: r.get(2)?,
            block_number: r.get::<_, i64>(3)? as u64,
            block_timestamp: r.get(4)?,
            tx_hash: r.get(5)?,
            log_index: r.get::<_, i64>(6)? as u64,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn query_audits(
    conn: &Connection,
    tail: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<OfferAuditRecord>, StoreError> {
    let sql = format!(
        "SELECT worker, trust_score, pd, credit_limit, apr_bps, tenure_days, fraud_flags,
                anomaly_score, integrity_score, risk_score, forecast_14d, forecast_confidence,
                created_utc FROM offer_audit {tail}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, |r| {
        Ok(OfferAuditRecord {
            worker: r.get(0)?,
            trust_score: r.get(1)?,
            pd: r.get(2)?,
            credit_limit: r.get::<_, i64>(3)?.max(0) as u64,
            apr_bps: r.get(4)?,
            tenure_days: r.get(5)?,
            fraud_flags: r.get(6)?,
            anomaly_score: r.get(7)?,
            integrity_score: r.get(8)?,
            risk_score: r.get(9)?,
            forecast_14d: r.get(10)?,
            forecast_confidence: r.get(11)?,
            created_at: r.get(12)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
