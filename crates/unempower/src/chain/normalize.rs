//! Normalization of addresses, hex quantities and 32-byte words for deterministic storage.

use alloy_primitives::Address;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

/// Validate a `0x`-prefixed 20-byte hex address and return it lowercased.
pub fn normalize_address(s: &str) -> Result<String, NormalizeError> {
    let s = s.trim();
    let body = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| NormalizeError::InvalidAddress(s.to_string()))?;
    if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(NormalizeError::InvalidAddress(s.to_string()));
    }
    Ok(format!("0x{}", body.to_ascii_lowercase()))
}

/// Parse an address into its typed form.
pub fn parse_address(s: &str) -> Result<Address, NormalizeError> {
    let lower = normalize_address(s)?;
    lower
        .parse::<Address>()
        .map_err(|_| NormalizeError::InvalidAddress(s.to_string()))
}

/// EIP-55 mixed-case form of an address.
pub fn checksum_address(s: &str) -> Result<String, NormalizeError> {
    Ok(parse_address(s)?.to_checksum(None))
}

/// Address left-padded to a 32-byte topic, as used for indexed event arguments.
pub fn address_topic(s: &str) -> Result<String, NormalizeError> {
    let lower = normalize_address(s)?;
    Ok(format!("0x{}{}", "0".repeat(24), &lower[2..]))
}

/// Parse a JSON-RPC quantity (`0x1a`). Decimal strings are accepted too.
pub fn parse_quantity(s: &str) -> Result<u64, NormalizeError> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some("") => Err(NormalizeError::InvalidQuantity(s.to_string())),
        Some(hex) => u64::from_str_radix(hex, 16)
            .map_err(|_| NormalizeError::InvalidQuantity(s.to_string())),
        None => s
            .parse::<u64>()
            .map_err(|_| NormalizeError::InvalidQuantity(s.to_string())),
    }
}

pub fn format_quantity(n: u64) -> String {
    format!("0x{:x}", n)
}

/// Decode `0x`-prefixed hex into bytes.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, NormalizeError> {
    let s = s.trim();
    let body = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(body).map_err(|e| NormalizeError::InvalidHex(format!("{}: {}", s, e)))
}

/// Canonical lowercase `0x` form of a 32-byte hash.
pub fn normalize_hash(s: &str) -> Result<String, NormalizeError> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 32 {
        return Err(NormalizeError::InvalidHex(s.to_string()));
    }
    Ok(format!("0x{}", hex::encode(bytes)))
}
