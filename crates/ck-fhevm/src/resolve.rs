use ck_api_types::RelayerMetadata;
use ck_client::{Eip1193Provider, InstanceCreationError, MockChains, default_mock_chains};
use tracing::debug;

/// Outcome of resolving a wallet provider against the mock-chain table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChain {
    pub chain_id: u64,
    pub rpc_url: Option<String>,
    pub is_mock: bool,
}

/// Caller overrides take precedence over the built-in defaults.
pub fn merge_mock_chains(overrides: &MockChains) -> MockChains {
    let mut merged = default_mock_chains();
    for (chain_id, url) in overrides {
        merged.insert(*chain_id, url.clone());
    }
    merged
}

pub fn classify(chain_id: u64, rpc_url: Option<&str>, overrides: &MockChains) -> ResolvedChain {
    let mock_chains = merge_mock_chains(overrides);
    match mock_chains.get(&chain_id) {
        Some(mock_url) => ResolvedChain {
            chain_id,
            rpc_url: Some(rpc_url.map(str::to_owned).unwrap_or_else(|| mock_url.clone())),
            is_mock: true,
        },
        None => ResolvedChain {
            chain_id,
            rpc_url: rpc_url.map(str::to_owned),
            is_mock: false,
        },
    }
}

/// Accepts hex quantities (`"0x7a69"`), decimal strings and plain numbers.
pub fn parse_chain_id(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::String(text) => match text.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => text.parse().ok(),
        },
        serde_json::Value::Number(number) => number.as_u64(),
        _ => None,
    }
}

pub async fn fetch_chain_id(provider: &dyn Eip1193Provider) -> Result<u64, InstanceCreationError> {
    let value = provider
        .request("eth_chainId", serde_json::json!([]))
        .await
        .map_err(|err| InstanceCreationError::ProviderConnection(format!("{err:#}")))?;

    parse_chain_id(&value).ok_or_else(|| {
        InstanceCreationError::ProviderConnection(format!("eth_chainId returned an unexpected value: {value}"))
    })
}

/// Probes a node for the FHEVM mock relayer metadata. Plain dev nodes do not
/// implement the method, which is reported as `None`.
pub async fn try_fetch_relayer_metadata(provider: &dyn Eip1193Provider) -> Option<RelayerMetadata> {
    let value = match provider.request("fhevm_relayer_metadata", serde_json::json!([])).await {
        Ok(value) => value,
        Err(err) => {
            debug!("node does not expose fhevm_relayer_metadata: {:#}", err);
            return None;
        }
    };

    match serde_json::from_value::<RelayerMetadata>(value) {
        Ok(metadata) => Some(metadata),
        Err(err) => {
            debug!("fhevm_relayer_metadata payload is malformed: {}", err);
            None
        }
    }
}

pub fn is_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}
