//! secp256k1 signing of attestation digests with 65-byte `r ‖ s ‖ v` output.

use super::eip712::{typed_data_digest, Eip712Domain, TypedDataHashes};
use super::{CreditAttestation, SignedAttestation};
use crate::chain::normalize::{decode_hex, NormalizeError};
use alloy_primitives::{keccak256, Address, B256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("recovery failed: {0}")]
    Recovery(String),
    #[error("hex: {0}")]
    Hex(#[from] NormalizeError),
}

/// Ethereum address of a public key: the last 20 bytes of keccak256 of the
/// uncompressed point without its 0x04 prefix.
pub fn public_key_address(key: &VerifyingKey) -> Address {
    let point = key.as_affine().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Recover the signer of a 32-byte digest from a 65-byte signature (`v` of 0/1 or 27/28).
pub fn recover_signer(digest: &B256, signature: &[u8]) -> Result<Address, SignerError> {
    if signature.len() != 65 {
        return Err(SignerError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            signature.len()
        )));
    }
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    let v = match signature[64] {
        27 | 28 => signature[64] - 27,
        0 | 1 => signature[64],
        other => {
            return Err(SignerError::InvalidSignature(format!("bad v {}", other)));
        }
    };
    let recid = RecoveryId::from_byte(v)
        .ok_or_else(|| SignerError::InvalidSignature(format!("bad v {}", v)))?;
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &sig, recid)
        .map_err(|e| SignerError::Recovery(e.to_string()))?;
    Ok(public_key_address(&key))
}

/// Holds the long-lived attestation key. Signing is pure given the input, so one
/// signer may be shared across concurrent requests.
pub struct AttestationSigner {
    key: SigningKey,
    address: Address,
    domain: Eip712Domain,
}

impl fmt::Debug for AttestationSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationSigner")
            .field("address", &self.address)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl AttestationSigner {
    pub fn from_private_key_hex(key_hex: &str, domain: Eip712Domain) -> Result<Self, SignerError> {
        let bytes = decode_hex(key_hex)?;
        if bytes.len() != 32 {
            return Err(SignerError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key =
            SigningKey::from_slice(&bytes).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let address = public_key_address(key.verifying_key());
        Ok(Self {
            key,
            address,
            domain,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// EIP-55 form of the signer address.
    pub fn address_checksum(&self) -> String {
        self.address.to_checksum(None)
    }

    pub fn domain(&self) -> &Eip712Domain {
        &self.domain
    }

    pub fn hashes(&self, att: &CreditAttestation) -> TypedDataHashes {
        TypedDataHashes::compute(&self.domain, att)
    }

    pub fn digest(&self, att: &CreditAttestation) -> B256 {
        typed_data_digest(&self.domain.separator(), &super::eip712::struct_hash(att))
    }

    /// Sign the typed-data digest. The signature is low-S with `v` in {27, 28}.
    pub fn sign_digest(&self, digest: &B256) -> Result<[u8; 65], SignerError> {
        let (mut sig, mut recid) = self
            .key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        if let Some(normalized) = sig.normalize_s() {
            sig = normalized;
            recid = RecoveryId::new(!recid.is_y_odd(), recid.is_x_reduced());
        }
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = 27 + recid.to_byte();
        Ok(out)
    }

    pub fn sign(&self, att: &CreditAttestation) -> Result<SignedAttestation, SignerError> {
        let digest = self.digest(att);
        let sig = self.sign_digest(&digest)?;
        Ok(SignedAttestation {
            attestation: att.clone(),
            signature: format!("0x{}", hex::encode(sig)),
            signer: self.address_checksum(),
            digest,
        })
    }

    /// Recover the address that signed `att` under this signer's domain.
    pub fn recover(&self, att: &CreditAttestation, signature_hex: &str) -> Result<Address, SignerError> {
        let sig = decode_hex(signature_hex)?;
        recover_signer(&self.digest(att), &sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    // Second Hardhat/Anvil development account.
    const DEV_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const DEV_ADDRESS: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    fn signer() -> AttestationSigner {
        AttestationSigner::from_private_key_hex(
            DEV_KEY,
            Eip712Domain::unempower(31337, Address::repeat_byte(0x42)),
        )
        .unwrap()
    }

    fn attestation(nonce: u64) -> CreditAttestation {
        CreditAttestation {
            worker: Address::repeat_byte(0x11),
            trust_score: 6400,
            pd: 52_000,
            credit_limit: U256::from(625_000_000u64),
            apr_bps: 1200,
            tenure_days: 21,
            fraud_flags: 0,
            issued_at: 1_700_000_000,
            expires_at: 1_700_000_900,
            nonce,
        }
    }

    #[test]
    fn derives_known_address() {
        assert_eq!(signer().address_checksum(), DEV_ADDRESS);
    }

    #[test]
    fn signature_recovers_to_signer() {
        let s = signer();
        for nonce in [1u64, 2, 3, 1_700_000_000_123] {
            let signed = s.sign(&attestation(nonce)).unwrap();
            assert!(signed.signature.starts_with("0x"));
            assert_eq!(signed.signature.len(), 2 + 130);
            let v = u8::from_str_radix(&signed.signature[130..], 16).unwrap();
            assert!(v == 27 || v == 28);
            assert_eq!(s.recover(&attestation(nonce), &signed.signature).unwrap(), s.address());
        }
    }

    #[test]
    fn tampered_attestation_recovers_elsewhere() {
        let s = signer();
        let signed = s.sign(&attestation(9)).unwrap();
        let mut other = attestation(9);
        other.credit_limit = U256::from(999_000_000u64);
        let recovered = s.recover(&other, &signed.signature).unwrap();
        assert_ne!(recovered, s.address());
    }

    #[test]
    fn rejects_bad_keys_and_signatures() {
        let domain = Eip712Domain::unempower(1, Address::ZERO);
        assert!(AttestationSigner::from_private_key_hex("0x1234", domain.clone()).is_err());
        assert!(AttestationSigner::from_private_key_hex(&format!("0x{}", "00".repeat(32)), domain).is_err());
        assert!(recover_signer(&B256::ZERO, &[0u8; 10]).is_err());
    }
}
