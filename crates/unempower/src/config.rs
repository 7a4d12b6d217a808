//! Runtime settings. Built once by the caller and passed down; nothing here is global.

use crate::attest::{AttestationSigner, Eip712Domain, SignerError, DEFAULT_TTL_SECS};
use crate::chain::fallback::DEFAULT_LOOKBACK_BLOCKS;
use crate::chain::indexer::{IndexerConfig, DEFAULT_CHUNK_SIZE, DEFAULT_POLL_INTERVAL_SECS};
use crate::chain::normalize::{normalize_address, parse_address};
use crate::chain::rpc::RpcConfig;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DATABASE_PATH: &str = "data/unempower.db";
pub const DEFAULT_MODEL_PATH: &str = "data/credit_model.json";
pub const DEFAULT_API_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_CHAIN_ID: u64 = 31337;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing setting {0}")]
    Missing(&'static str),
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("signer: {0}")]
    Signer(#[from] SignerError),
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

#[derive(Clone, Debug)]
pub struct IndexerSettings {
    pub chunk_size: u64,
    pub poll_interval_secs: u64,
    pub start_block: u64,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            start_block: 0,
        }
    }
}

#[derive(Clone, Default)]
pub struct SignerConfig {
    /// Hex secp256k1 key. Only needed by commands that sign.
    pub private_key: Option<String>,
    pub verifying_contract: String,
    pub ttl_secs: u64,
}

impl std::fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerConfig")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("verifying_contract", &self.verifying_contract)
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub bind: String,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    /// When set, `/audit/*` requires `Authorization: Bearer <token>`.
    pub admin_token: Option<String>,
    pub request_timeout_secs: u64,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_API_BIND.to_string(),
            cors_origins: Vec::new(),
            admin_token: None,
            request_timeout_secs: 30,
            rate_limit_requests: 10,
            rate_limit_window_secs: 60,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub rpc: RpcConfig,
    pub chain_id: u64,
    pub workproof_address: String,
    pub loan_vault_address: String,
    pub indexer: IndexerSettings,
    pub signer: SignerConfig,
    pub api: ApiConfig,
    pub database_path: PathBuf,
    pub model_path: PathBuf,
    pub fallback_lookback_blocks: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            chain_id: DEFAULT_CHAIN_ID,
            workproof_address: String::new(),
            loan_vault_address: String::new(),
            indexer: IndexerSettings::default(),
            signer: SignerConfig {
                ttl_secs: DEFAULT_TTL_SECS,
                ..SignerConfig::default()
            },
            api: ApiConfig::default(),
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            fallback_lookback_blocks: DEFAULT_LOOKBACK_BLOCKS,
        }
    }
}

fn require_address(name: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(name));
    }
    normalize_address(value)
        .map(|_| ())
        .map_err(|e| invalid(name, e.to_string()))
}

impl Settings {
    /// Checks everything the indexer and HTTP service need. The verifier address
    /// and signing key are checked by [`Settings::signer`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.url.trim().is_empty() {
            return Err(ConfigError::Missing("RPC_URL"));
        }
        if self.chain_id == 0 {
            return Err(invalid("CHAIN_ID", "must be non-zero"));
        }
        require_address("WORKPROOF_ADDRESS", &self.workproof_address)?;
        require_address("LOAN_VAULT_ADDRESS", &self.loan_vault_address)?;
        if self.indexer.chunk_size == 0 {
            return Err(invalid("INDEXER_CHUNK_SIZE", "must be at least 1"));
        }
        if self.indexer.poll_interval_secs == 0 {
            return Err(invalid("INDEXER_POLL_INTERVAL", "must be at least 1 second"));
        }
        if self.fallback_lookback_blocks == 0 {
            return Err(invalid("FALLBACK_LOOKBACK_BLOCKS", "must be at least 1"));
        }
        if self.signer.ttl_secs == 0 {
            return Err(invalid("ATTESTATION_TTL_SECS", "must be non-zero"));
        }
        if self.api.rate_limit_requests == 0 || self.api.rate_limit_window_secs == 0 {
            return Err(invalid("rate limit", "requests and window must be non-zero"));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(invalid("request timeout", "must be non-zero"));
        }
        if let Some(token) = &self.api.admin_token {
            if token.trim().is_empty() {
                return Err(invalid("ADMIN_TOKEN", "must not be blank when set"));
            }
        }
        Ok(())
    }

    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            chunk_size: self.indexer.chunk_size,
            poll_interval: Duration::from_secs(self.indexer.poll_interval_secs),
            start_block: self.indexer.start_block,
            ..IndexerConfig::new(
                self.chain_id,
                &self.workproof_address,
                &self.loan_vault_address,
            )
        }
    }

    pub fn domain(&self) -> Result<Eip712Domain, ConfigError> {
        if self.signer.verifying_contract.trim().is_empty() {
            return Err(ConfigError::Missing("ATTESTATION_VERIFIER_ADDRESS"));
        }
        let contract = parse_address(&self.signer.verifying_contract)
            .map_err(|e| invalid("ATTESTATION_VERIFIER_ADDRESS", e.to_string()))?;
        Ok(Eip712Domain::unempower(self.chain_id, contract))
    }

    pub fn signer(&self) -> Result<AttestationSigner, ConfigError> {
        let key = self
            .signer
            .private_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::Missing("AI_SIGNER_PRIVATE_KEY"))?;
        Ok(AttestationSigner::from_private_key_hex(key, self.domain()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Settings {
        Settings {
            workproof_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".into(),
            loan_vault_address: "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512".into(),
            signer: SignerConfig {
                private_key: Some(
                    "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d".into(),
                ),
                verifying_contract: "0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0".into(),
                ttl_secs: DEFAULT_TTL_SECS,
            },
            ..Settings::default()
        }
    }

    #[test]
    fn defaults_need_addresses() {
        let err = Settings::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("WORKPROOF_ADDRESS")));
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn bad_values_name_the_setting() {
        let mut s = complete();
        s.loan_vault_address = "0x1234".into();
        let msg = s.validate().unwrap_err().to_string();
        assert!(msg.contains("LOAN_VAULT_ADDRESS"), "{msg}");

        let mut s = complete();
        s.indexer.chunk_size = 0;
        assert!(s.validate().unwrap_err().to_string().contains("INDEXER_CHUNK_SIZE"));

        let mut s = complete();
        s.fallback_lookback_blocks = 0;
        assert!(s
            .validate()
            .unwrap_err()
            .to_string()
            .contains("FALLBACK_LOOKBACK_BLOCKS"));
    }

    #[test]
    fn indexer_config_carries_overrides() {
        let mut s = complete();
        s.indexer.chunk_size = 25;
        s.indexer.start_block = 1_000;
        let cfg = s.indexer_config();
        assert_eq!(cfg.chunk_size, 25);
        assert_eq!(cfg.start_block, 1_000);
        assert_eq!(cfg.chain_id, DEFAULT_CHAIN_ID);
    }

    #[test]
    fn signer_requires_key() {
        let mut s = complete();
        assert!(s.signer().is_ok());
        s.signer.private_key = None;
        assert!(matches!(
            s.signer().unwrap_err(),
            ConfigError::Missing("AI_SIGNER_PRIVATE_KEY")
        ));
    }

    #[test]
    fn debug_redacts_key() {
        let dbg = format!("{:?}", complete().signer);
        assert!(!dbg.contains("59c6995e"));
        assert!(dbg.contains("redacted"));
    }
}
