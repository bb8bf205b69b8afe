use anyhow::{Context, Result, anyhow};
use ck_client::{MockChains, default_mock_chains};
use serde::Deserialize;

use crate::signature::DEFAULT_DURATION_DAYS;

pub const DEFAULT_MAX_DURATION_DAYS: u32 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Validity window given to newly signed decryption authorizations.
    pub signature_duration_days: u32,
    /// Stored authorizations with a longer window are ignored.
    pub max_signature_duration_days: u32,
    pub mock_chains: MockChains,
    /// RocksDB directory for persisted signatures; in-memory when unset.
    pub storage_path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signature_duration_days: DEFAULT_DURATION_DAYS,
            max_signature_duration_days: DEFAULT_MAX_DURATION_DAYS,
            mock_chains: default_mock_chains(),
            storage_path: None,
        }
    }
}

impl SessionConfig {
    /// Reads `CK_SIGNATURE_DURATION_DAYS`, `CK_MAX_SIGNATURE_DURATION_DAYS`,
    /// `CK_MOCK_CHAINS` and `CK_SIGNATURE_DB_PATH`, keeping defaults for
    /// anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup("CK_SIGNATURE_DURATION_DAYS") {
            config.signature_duration_days = raw
                .trim()
                .parse()
                .with_context(|| format!("CK_SIGNATURE_DURATION_DAYS is not a number: {raw}"))?;
        }

        if let Some(raw) = lookup("CK_MAX_SIGNATURE_DURATION_DAYS") {
            config.max_signature_duration_days = raw
                .trim()
                .parse()
                .with_context(|| format!("CK_MAX_SIGNATURE_DURATION_DAYS is not a number: {raw}"))?;
        }

        if let Some(raw) = lookup("CK_MOCK_CHAINS") {
            config.mock_chains.extend(parse_mock_chains(&raw)?);
        }

        config.storage_path = lookup("CK_SIGNATURE_DB_PATH").filter(|path| !path.trim().is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.signature_duration_days == 0 {
            return Err(anyhow!("signature_duration_days must be greater than zero"));
        }
        if self.signature_duration_days > self.max_signature_duration_days {
            return Err(anyhow!(
                "signature_duration_days ({}) exceeds max_signature_duration_days ({})",
                self.signature_duration_days,
                self.max_signature_duration_days
            ));
        }
        Ok(())
    }
}

/// Parses `31337=http://localhost:8545,1337=http://anvil:8545`.
pub fn parse_mock_chains(raw: &str) -> Result<MockChains> {
    let mut chains = MockChains::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (chain_id, url) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("mock chain entry must be <chainId>=<rpcUrl>: {entry}"))?;
        let chain_id: u64 = chain_id
            .trim()
            .parse()
            .with_context(|| format!("invalid mock chain id: {chain_id}"))?;
        let url = url.trim();
        if url.is_empty() {
            return Err(anyhow!("mock chain {chain_id} has an empty RPC URL"));
        }
        chains.insert(chain_id, url.to_owned());
    }
    Ok(chains)
}
