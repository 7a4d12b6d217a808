//! Credit attestations: the typed struct the on-chain verifier checks, its
//! EIP-712 hashing and the signer.

pub mod eip712;
pub mod signer;

pub use eip712::{Eip712Domain, TypedDataHashes};
pub use signer::{recover_signer, AttestationSigner, SignerError};

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TTL_SECS: u64 = 900;

/// Field order and widths match the verifier's `CreditAttestation` struct.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "AttestationWire")]
pub struct CreditAttestation {
    pub worker: Address,
    pub trust_score: u32,
    pub pd: u32,
    pub credit_limit: U256,
    pub apr_bps: u16,
    pub tenure_days: u16,
    pub fraud_flags: u32,
    pub issued_at: u64,
    pub expires_at: u64,
    pub nonce: u64,
}

/// JSON form. `creditLimit` is a decimal string so it survives JS number precision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationWire {
    pub worker: String,
    pub trust_score: u32,
    pub pd: u32,
    pub credit_limit: String,
    pub apr_bps: u16,
    pub tenure_days: u16,
    pub fraud_flags: u32,
    pub issued_at: u64,
    pub expires_at: u64,
    pub nonce: u64,
}

impl From<CreditAttestation> for AttestationWire {
    fn from(a: CreditAttestation) -> Self {
        Self {
            worker: a.worker.to_checksum(None),
            trust_score: a.trust_score,
            pd: a.pd,
            credit_limit: a.credit_limit.to_string(),
            apr_bps: a.apr_bps,
            tenure_days: a.tenure_days,
            fraud_flags: a.fraud_flags,
            issued_at: a.issued_at,
            expires_at: a.expires_at,
            nonce: a.nonce,
        }
    }
}

/// `issued_at * 1000 + keccak256(lowercase worker) mod 1000`.
///
/// Two requests for the same worker in the same second get the same nonce;
/// the verifier decides what to do with a repeat.
pub fn attestation_nonce(worker: &Address, issued_at: u64) -> u64 {
    let lower = format!("0x{}", hex::encode(worker.as_slice()));
    let h = keccak256(lower.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&h[..8]);
    issued_at * 1000 + u64::from_be_bytes(head) % 1000
}

/// Terms to be attested, before timestamps and nonce are assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttestedTerms {
    pub trust_score: u32,
    pub pd: u32,
    pub credit_limit: u64,
    pub apr_bps: u16,
    pub tenure_days: u16,
    pub fraud_flags: u32,
}

impl CreditAttestation {
    pub fn issue(worker: Address, terms: AttestedTerms, issued_at: u64, ttl_secs: u64) -> Self {
        Self {
            worker,
            trust_score: terms.trust_score,
            pd: terms.pd,
            credit_limit: U256::from(terms.credit_limit),
            apr_bps: terms.apr_bps,
            tenure_days: terms.tenure_days,
            fraud_flags: terms.fraud_flags,
            issued_at,
            expires_at: issued_at + ttl_secs,
            nonce: attestation_nonce(&worker, issued_at),
        }
    }

    pub fn to_wire(&self) -> AttestationWire {
        self.clone().into()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedAttestation {
    pub attestation: CreditAttestation,
    /// `0x`-prefixed 65-byte signature.
    pub signature: String,
    /// EIP-55 signer address.
    pub signer: String,
    pub digest: B256,
}
