use anyhow::Result;
use async_trait::async_trait;
use ck_api_types::{
    ClearValue, DecryptRequest, Eip712Domain, EncryptedInput, InputValue, KeyPair, PublicParams,
    UserDecryptMessage, UserDecryptTypedData,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MOCK_CHAIN_ID: u64 = 31337;
pub const DEFAULT_MOCK_CHAIN_RPC: &str = "http://localhost:8545";

/// Chain id to RPC URL for chains served by a local mock node instead of a relayer.
pub type MockChains = BTreeMap<u64, String>;

pub fn default_mock_chains() -> MockChains {
    let mut chains = MockChains::new();
    chains.insert(DEFAULT_MOCK_CHAIN_ID, DEFAULT_MOCK_CHAIN_RPC.to_owned());
    chains
}

// ── Errors ──

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstanceCreationError {
    #[error("encryption client creation was aborted")]
    Aborted,
    #[error("could not reach wallet provider: {0}")]
    ProviderConnection(String),
    #[error("relayer metadata unavailable: {0}")]
    RelayerMetadata(String),
    #[error("invalid ACL contract address: {0}")]
    InvalidAclAddress(String),
    #[error("chain {0} is not supported")]
    UnsupportedChain(u64),
    #[error("encryption client factory failed: {0}")]
    Factory(String),
}

impl InstanceCreationError {
    pub fn code(&self) -> &'static str {
        match self {
            InstanceCreationError::Aborted => "FHEVM_ABORT_ERROR",
            InstanceCreationError::ProviderConnection(_) => "WEB3_CLIENTCONNECTION_ERROR",
            InstanceCreationError::RelayerMetadata(_) => "FHEVM_RELAYER_METADATA_ERROR",
            InstanceCreationError::InvalidAclAddress(_) => "FHEVM_INVALID_ACL_ADDRESS",
            InstanceCreationError::UnsupportedChain(_) => "FHEVM_UNSUPPORTED_CHAIN",
            InstanceCreationError::Factory(_) => "FHEVM_CREATE_INSTANCE_ERROR",
        }
    }
}

/// Failure reported by an encryption client call. `code` is whatever
/// discriminator the remote service supplied, if any.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ClientError {
    pub code: Option<String>,
    pub message: String,
}

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

// ── Wallet provider ──

/// Minimal EIP-1193 surface: a JSON-RPC `request` call.
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    async fn request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value>;
}

/// Either an RPC endpoint or an injected wallet provider. URLs compare by
/// value, injected providers by identity.
#[derive(Clone)]
pub enum WalletProvider {
    RpcUrl(String),
    Injected(Arc<dyn Eip1193Provider>),
}

impl WalletProvider {
    pub fn rpc_url(&self) -> Option<&str> {
        match self {
            WalletProvider::RpcUrl(url) => Some(url),
            WalletProvider::Injected(_) => None,
        }
    }
}

impl PartialEq for WalletProvider {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (WalletProvider::RpcUrl(a), WalletProvider::RpcUrl(b)) => a == b,
            (WalletProvider::Injected(a), WalletProvider::Injected(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for WalletProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletProvider::RpcUrl(url) => f.debug_tuple("RpcUrl").field(url).finish(),
            WalletProvider::Injected(provider) => {
                write!(f, "Injected({:p})", Arc::as_ptr(provider) as *const ())
            }
        }
    }
}

// ── Encryption client ──

/// Accumulates clear values bound to one contract and user, then encrypts
/// them together with a single input proof.
#[async_trait]
pub trait EncryptedInputBuilder: Send {
    fn add(&mut self, value: InputValue);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn encrypt(self: Box<Self>) -> Result<EncryptedInput, ClientError>;
}

#[derive(Clone)]
pub struct UserDecryptParams {
    pub requests: Vec<DecryptRequest>,
    pub private_key: String,
    pub public_key: String,
    pub signature: String,
    pub contract_addresses: Vec<String>,
    pub user_address: String,
    pub start_timestamp: u64,
    pub duration_days: u32,
}

impl fmt::Debug for UserDecryptParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDecryptParams")
            .field("requests", &self.requests)
            .field("contract_addresses", &self.contract_addresses)
            .field("user_address", &self.user_address)
            .field("start_timestamp", &self.start_timestamp)
            .field("duration_days", &self.duration_days)
            .finish_non_exhaustive()
    }
}

/// Opaque handle able to build encrypted inputs and run authorized decryption
/// for one chain.
#[async_trait]
pub trait EncryptionClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// `verifyingContract` of the user-decryption EIP-712 domain.
    fn verifying_contract(&self) -> &str;

    fn generate_keypair(&self) -> KeyPair;

    fn create_eip712(
        &self,
        public_key: &str,
        contract_addresses: &[String],
        start_timestamp: u64,
        duration_days: u32,
    ) -> UserDecryptTypedData {
        UserDecryptTypedData::new(
            Eip712Domain {
                name: "Decryption".to_owned(),
                version: "1".to_owned(),
                chain_id: self.chain_id(),
                verifying_contract: self.verifying_contract().to_owned(),
            },
            UserDecryptMessage {
                public_key: public_key.to_owned(),
                contract_addresses: contract_addresses.to_vec(),
                start_timestamp,
                duration_days,
            },
        )
    }

    fn create_encrypted_input(&self, contract_address: &str, user_address: &str) -> Box<dyn EncryptedInputBuilder>;

    fn public_params(&self) -> Option<PublicParams> {
        None
    }

    async fn user_decrypt(&self, params: UserDecryptParams) -> Result<HashMap<String, ClearValue>, ClientError>;
}

// ── Provider ──

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub provider: WalletProvider,
    /// Chain the caller believes the provider is on; resolution is authoritative.
    pub chain_id: Option<u64>,
    /// Caller overrides, merged over [`default_mock_chains`].
    pub mock_chains: MockChains,
}

/// Produces encryption clients. Implementations should observe `cancel`
/// between suspension points and fail with [`InstanceCreationError::Aborted`].
#[async_trait]
pub trait CryptoProvider: Send + Sync {
    async fn create(
        &self,
        request: CreateRequest,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn EncryptionClient>, InstanceCreationError>;
}
