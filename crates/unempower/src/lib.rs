//! unempower — work-proof indexing, credit scoring and signed credit attestations.
//!
//! Indexes WorkProof and LoanVault events into SQLite, derives behavioural features,
//! scores them, fuses four risk signals into final terms and signs an EIP-712
//! attestation the on-chain verifier accepts.

pub mod attest;
pub mod chain;
pub mod config;
pub mod events;
pub mod features;
pub mod offer;
pub mod scoring;
pub mod signals;
pub mod store;

pub use attest::{AttestationSigner, CreditAttestation, Eip712Domain, SignedAttestation};
pub use chain::{ChainIndexer, IndexerConfig, LogSource, RpcClient, RpcConfig};
pub use config::{ConfigError, Settings};
pub use events::{ChainEvent, WorkerHistory};
pub use features::{extract_features, FeatureVector};
pub use offer::{ChainFallback, CreditPipeline, FraudFlags, OfferError, OfferResponse};
pub use scoring::{score, BaseOffer, CreditModel};
pub use signals::{analyze_worker, WorkerAnalysis};
pub use store::{EventStore, StoreError};
