//! Node configuration: genesis accounts, governance oracle policy and logging.
//!
//! Loaded from a JSON file by the CLI. Every section has defaults so a minimal file only needs
//! `chain_id` and the genesis accounts.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ConcordError;
use crate::signature::parse_public_key;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("cannot parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for ConcordError {
    fn from(err: ConfigError) -> Self {
        ConcordError::Config(err.to_string())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NodeConfig {
    pub chain_id: String,
    /// Default `tracing` filter, overridden by `RUST_LOG`.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    pub genesis: GenesisConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct GenesisConfig {
    pub accounts: Vec<GenesisAccount>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GenesisAccount {
    /// Compressed secp256k1 public key (hex).
    pub pubkey: String,
    #[serde(default)]
    pub balance: u128,
    /// Voting power; accounts with non-zero power start as validators.
    #[serde(default)]
    pub power: u64,
}

/// Policy for the built-in governance oracle.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OracleConfig {
    #[serde(default = "default_max_grant_amount")]
    pub max_grant_amount: u128,
    #[serde(default = "default_accept")]
    pub accept_proposals: bool,
    #[serde(default = "default_accept")]
    pub accept_settlements: bool,
    /// Grants whose statement contains any of these words (case-insensitive) are rejected.
    #[serde(default)]
    pub blocked_words: Vec<String>,
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_max_grant_amount() -> u128 {
    1_000_000
}

fn default_accept() -> bool {
    true
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_grant_amount: default_max_grant_amount(),
            accept_proposals: default_accept(),
            accept_settlements: default_accept(),
            blocked_words: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::from_json(&raw)?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id.trim().is_empty() {
            return Err(ConfigError::Invalid("chain_id must not be empty".into()));
        }
        self.genesis.validate()
    }
}

impl GenesisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for (i, account) in self.accounts.iter().enumerate() {
            parse_public_key(&account.pubkey)
                .map_err(|e| ConfigError::Invalid(format!("account {}: {}", i, e)))?;
            if !seen.insert(account.pubkey.to_ascii_lowercase()) {
                return Err(ConfigError::Invalid(format!("account {}: duplicate pubkey", i)));
            }
        }
        if !self.accounts.iter().any(|a| a.power > 0) {
            return Err(ConfigError::Invalid("genesis needs at least one validator".into()));
        }
        Ok(())
    }
}
