//! EIP-712 hashing for `CreditAttestation` under the verifier's domain.

use super::CreditAttestation;
use alloy_primitives::{keccak256, Address, B256, U256};
use serde::Serialize;

pub const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
pub const ATTESTATION_TYPE: &str = "CreditAttestation(address worker,uint32 trustScore,uint32 pd,uint256 creditLimit,uint16 aprBps,uint16 tenureDays,uint32 fraudFlags,uint64 issuedAt,uint64 expiresAt,uint64 nonce)";

pub const DOMAIN_NAME: &str = "UnEmpower";
pub const DOMAIN_VERSION: &str = "1";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Eip712Domain {
    /// The attestation verifier's domain on `chain_id`.
    pub fn unempower(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            name: DOMAIN_NAME.to_string(),
            version: DOMAIN_VERSION.to_string(),
            chain_id,
            verifying_contract,
        }
    }

    pub fn separator(&self) -> B256 {
        let mut buf = Vec::with_capacity(5 * 32);
        buf.extend_from_slice(keccak256(DOMAIN_TYPE.as_bytes()).as_slice());
        buf.extend_from_slice(keccak256(self.name.as_bytes()).as_slice());
        buf.extend_from_slice(keccak256(self.version.as_bytes()).as_slice());
        buf.extend_from_slice(&uint_word(U256::from(self.chain_id)));
        buf.extend_from_slice(&address_word(&self.verifying_contract));
        keccak256(&buf)
    }
}

fn uint_word(v: U256) -> [u8; 32] {
    v.to_be_bytes::<32>()
}

fn address_word(a: &Address) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(a.as_slice());
    w
}

pub fn attestation_typehash() -> B256 {
    keccak256(ATTESTATION_TYPE.as_bytes())
}

/// `encodeData`: typehash followed by each field as a 32-byte word, in declaration order.
pub fn encode_attestation(att: &CreditAttestation) -> Vec<u8> {
    let mut buf = Vec::with_capacity(11 * 32);
    buf.extend_from_slice(attestation_typehash().as_slice());
    buf.extend_from_slice(&address_word(&att.worker));
    for word in [
        U256::from(att.trust_score),
        U256::from(att.pd),
        att.credit_limit,
        U256::from(att.apr_bps),
        U256::from(att.tenure_days),
        U256::from(att.fraud_flags),
        U256::from(att.issued_at),
        U256::from(att.expires_at),
        U256::from(att.nonce),
    ] {
        buf.extend_from_slice(&uint_word(word));
    }
    buf
}

pub fn struct_hash(att: &CreditAttestation) -> B256 {
    keccak256(encode_attestation(att))
}

/// `keccak256(0x19 0x01 ‖ domainSeparator ‖ structHash)`.
pub fn typed_data_digest(domain_separator: &B256, struct_hash: &B256) -> B256 {
    let mut buf = [0u8; 66];
    buf[0] = 0x19;
    buf[1] = 0x01;
    buf[2..34].copy_from_slice(domain_separator.as_slice());
    buf[34..].copy_from_slice(struct_hash.as_slice());
    keccak256(buf)
}

/// The three hashes a verifier recomputes, hex encoded with `0x`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TypedDataHashes {
    pub domain_hash: String,
    pub struct_hash: String,
    pub message_digest: String,
}

impl TypedDataHashes {
    pub fn compute(domain: &Eip712Domain, att: &CreditAttestation) -> Self {
        let sep = domain.separator();
        let sh = struct_hash(att);
        Self {
            domain_hash: sep.to_string(),
            struct_hash: sh.to_string(),
            message_digest: typed_data_digest(&sep, &sh).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ether_mail_domain_separator() {
        let domain = Eip712Domain {
            name: "Ether Mail".into(),
            version: "1".into(),
            chain_id: 1,
            verifying_contract: "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC"
                .parse()
                .unwrap(),
        };
        assert_eq!(
            domain.separator().to_string(),
            "0xf2cee375fa42b42143804025fc449deafd50cc031ca257e0b194a650a912090f"
        );
    }

    #[test]
    fn encoding_is_eleven_words_in_field_order() {
        let att = CreditAttestation {
            worker: Address::repeat_byte(0x11),
            trust_score: 5000,
            pd: 100_000,
            credit_limit: U256::from(500_000_000u64),
            apr_bps: 1200,
            tenure_days: 14,
            fraud_flags: 2,
            issued_at: 1_700_000_000,
            expires_at: 1_700_000_900,
            nonce: 42,
        };
        let enc = encode_attestation(&att);
        assert_eq!(enc.len(), 11 * 32);
        assert_eq!(&enc[32 + 12..64], &[0x11u8; 20]);
        assert_eq!(enc[3 * 32 - 1], 0x88); // 5000 = 0x1388
        assert_eq!(enc[11 * 32 - 1], 42);
    }

    #[test]
    fn digest_changes_with_any_field() {
        let domain = Eip712Domain::unempower(31337, Address::repeat_byte(0x22));
        let mut att = CreditAttestation {
            worker: Address::repeat_byte(0x11),
            trust_score: 1,
            pd: 1,
            credit_limit: U256::from(1u8),
            apr_bps: 1,
            tenure_days: 1,
            fraud_flags: 0,
            issued_at: 1,
            expires_at: 2,
            nonce: 3,
        };
        let a = TypedDataHashes::compute(&domain, &att);
        att.fraud_flags = 1;
        let b = TypedDataHashes::compute(&domain, &att);
        assert_eq!(a.domain_hash, b.domain_hash);
        assert_ne!(a.message_digest, b.message_digest);
    }
}
