//! In-process stand-ins for a local FHEVM dev chain.
//!
//! `MockNode` answers the two JSON-RPC calls resolution needs, and
//! `MockEncryptionClient` keeps "ciphertexts" in a shared `MockCoprocessor`
//! so that encrypt and user-decrypt can be exercised without a relayer.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use ck_api_types::{
    ClearValue, EncryptedInput, FheType, InputValue, KeyPair, RelayerMetadata, canonical_address_set,
    normalize_address,
};
use ck_client::{
    ClientError, Eip1193Provider, EncryptedInputBuilder, EncryptionClient, InstanceCreationError,
    UserDecryptParams,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{ClientConfig, ClientFactory};

const SECONDS_PER_DAY: u64 = 86_400;

pub fn hardhat_relayer_metadata(chain_id: u64) -> RelayerMetadata {
    RelayerMetadata {
        chain_id,
        acl_contract_address: "0x50157CFfD6bBFA2DECe204a89ec419c23ef5755D".to_owned(),
        input_verifier_contract_address: "0x901F8942346f7AB3a01F6D7613119Bca447Bb030".to_owned(),
        kms_verifier_contract_address: "0x1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC".to_owned(),
        verifying_contract_address_decryption: "0x5ffdaAB0373E62E2ea2944776209aEf29E631A64".to_owned(),
        verifying_contract_address_input_verification: "0x812b06e1CDCE800494b79fFE4f925A504a9A9810"
            .to_owned(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

// ── Node ──

/// EIP-1193 provider backed by memory, standing in for a Hardhat FHEVM node.
pub struct MockNode {
    chain_id: u64,
    metadata: Option<RelayerMetadata>,
    requests: AtomicUsize,
}

impl MockNode {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            metadata: Some(hardhat_relayer_metadata(chain_id)),
            requests: AtomicUsize::new(0),
        }
    }

    /// A plain dev node that does not speak `fhevm_relayer_metadata`.
    pub fn without_relayer_metadata(chain_id: u64) -> Self {
        Self {
            chain_id,
            metadata: None,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Eip1193Provider for MockNode {
    async fn request(&self, method: &str, _params: serde_json::Value) -> Result<serde_json::Value> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match method {
            "eth_chainId" => Ok(serde_json::Value::String(format!("0x{:x}", self.chain_id))),
            "fhevm_relayer_metadata" => match &self.metadata {
                Some(metadata) => Ok(serde_json::to_value(metadata)?),
                None => Err(anyhow!("the method fhevm_relayer_metadata does not exist")),
            },
            other => Err(anyhow!("the method {other} does not exist")),
        }
    }
}

// ── Coprocessor ──

#[derive(Debug, Clone)]
struct StoredCiphertext {
    value: ClearValue,
    contract_address: String,
    user_address: String,
}

/// Shared handle table. One coprocessor can back many clients, which is how
/// a recreated client still decrypts handles produced by its predecessor.
#[derive(Debug, Default)]
pub struct MockCoprocessor {
    ciphertexts: Mutex<HashMap<String, StoredCiphertext>>,
    nonce: AtomicU64,
}

impl MockCoprocessor {
    pub fn handle_count(&self) -> usize {
        lock(&self.ciphertexts).len()
    }

    fn register(&self, chain_id: u64, contract_address: &str, user_address: &str, values: &[InputValue]) -> Vec<String> {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let contract_address = normalize_address(contract_address);
        let user_address = normalize_address(user_address);

        let mut table = lock(&self.ciphertexts);
        values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let handle = derive_handle(chain_id, &contract_address, &user_address, nonce, index, value.fhe_type());
                table.insert(
                    handle.clone(),
                    StoredCiphertext {
                        value: value.to_clear_value(),
                        contract_address: contract_address.clone(),
                        user_address: user_address.clone(),
                    },
                );
                handle
            })
            .collect()
    }

    fn lookup(&self, handle: &str) -> Option<StoredCiphertext> {
        lock(&self.ciphertexts).get(&normalize_address(handle)).cloned()
    }
}

/// 32-byte handle: 30 bytes of digest, the FHE type byte, and a version byte.
fn derive_handle(
    chain_id: u64,
    contract_address: &str,
    user_address: &str,
    nonce: u64,
    index: usize,
    fhe_type: FheType,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chain_id.to_be_bytes());
    hasher.update(contract_address.as_bytes());
    hasher.update(user_address.as_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update((index as u64).to_be_bytes());
    let digest = hasher.finalize();

    let mut handle = [0_u8; 32];
    handle[..30].copy_from_slice(&digest[..30]);
    handle[30] = fhe_type.type_byte();
    handle[31] = 0;
    format!("0x{}", hex::encode(handle))
}

// ── Client ──

pub struct MockEncryptionClient {
    instance_id: Uuid,
    chain_id: u64,
    metadata: RelayerMetadata,
    coprocessor: Arc<MockCoprocessor>,
    decrypt_calls: AtomicUsize,
    decrypt_failure: Mutex<Option<ClientError>>,
}

impl MockEncryptionClient {
    pub fn new(chain_id: u64, metadata: RelayerMetadata, coprocessor: Arc<MockCoprocessor>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            chain_id,
            metadata,
            coprocessor,
            decrypt_calls: AtomicUsize::new(0),
            decrypt_failure: Mutex::new(None),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn decrypt_call_count(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    /// Makes every following `user_decrypt` fail with `failure` until cleared.
    pub fn set_decrypt_failure(&self, failure: Option<ClientError>) {
        *lock(&self.decrypt_failure) = failure;
    }
}

#[async_trait]
impl EncryptionClient for MockEncryptionClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn verifying_contract(&self) -> &str {
        &self.metadata.verifying_contract_address_decryption
    }

    fn generate_keypair(&self) -> KeyPair {
        ck_crypto::generate_keypair()
    }

    fn create_encrypted_input(&self, contract_address: &str, user_address: &str) -> Box<dyn EncryptedInputBuilder> {
        Box::new(MockInputBuilder {
            coprocessor: Arc::clone(&self.coprocessor),
            chain_id: self.chain_id,
            contract_address: contract_address.to_owned(),
            user_address: user_address.to_owned(),
            values: Vec::new(),
        })
    }

    async fn user_decrypt(&self, params: UserDecryptParams) -> Result<HashMap<String, ClearValue>, ClientError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = lock(&self.decrypt_failure).clone() {
            return Err(failure);
        }

        if params.signature.trim().is_empty() {
            return Err(ClientError::with_code("INVALID_SIGNATURE", "signature is empty"));
        }

        let expires_at = params
            .start_timestamp
            .saturating_add(u64::from(params.duration_days).saturating_mul(SECONDS_PER_DAY));
        if now_seconds() >= expires_at {
            return Err(ClientError::with_code("SIGNATURE_EXPIRED", "user decryption request has expired"));
        }

        let authorized = canonical_address_set(&params.contract_addresses);
        let user_address = normalize_address(&params.user_address);
        let mut results = HashMap::with_capacity(params.requests.len());

        for request in &params.requests {
            let Some(stored) = self.coprocessor.lookup(&request.handle) else {
                return Err(ClientError::with_code(
                    "HANDLE_NOT_FOUND",
                    format!("unknown handle {}", request.handle),
                ));
            };

            let contract_address = normalize_address(&request.contract_address);
            if !authorized.contains(&contract_address) || stored.contract_address != contract_address {
                return Err(ClientError::with_code(
                    "CONTRACT_NOT_AUTHORIZED",
                    format!("contract {} is not covered by the signature", request.contract_address),
                ));
            }

            if stored.user_address != user_address {
                return Err(ClientError::with_code(
                    "USER_NOT_AUTHORIZED",
                    format!("{} may not decrypt {}", params.user_address, request.handle),
                ));
            }

            results.insert(request.handle.clone(), stored.value);
        }

        debug!("mock client {} decrypted {} handles", self.instance_id, results.len());
        Ok(results)
    }
}

struct MockInputBuilder {
    coprocessor: Arc<MockCoprocessor>,
    chain_id: u64,
    contract_address: String,
    user_address: String,
    values: Vec<InputValue>,
}

#[async_trait]
impl EncryptedInputBuilder for MockInputBuilder {
    fn add(&mut self, value: InputValue) {
        self.values.push(value);
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    async fn encrypt(self: Box<Self>) -> Result<EncryptedInput, ClientError> {
        if self.values.is_empty() {
            return Err(ClientError::with_code("EMPTY_INPUT", "no values were added to the input"));
        }

        let handles = self
            .coprocessor
            .register(self.chain_id, &self.contract_address, &self.user_address, &self.values);

        let mut hasher = Sha256::new();
        for handle in &handles {
            hasher.update(handle.as_bytes());
        }
        hasher.update(normalize_address(&self.user_address).as_bytes());

        Ok(EncryptedInput {
            handles,
            input_proof: format!("0x{}", hex::encode(hasher.finalize())),
        })
    }
}

// ── Factory ──

pub struct MockClientFactory {
    coprocessor: Arc<MockCoprocessor>,
}

impl MockClientFactory {
    pub fn new(coprocessor: Arc<MockCoprocessor>) -> Self {
        Self { coprocessor }
    }
}

#[async_trait]
impl ClientFactory for MockClientFactory {
    async fn create_client(
        &self,
        config: ClientConfig,
        _cancel: &CancellationToken,
    ) -> Result<Arc<dyn EncryptionClient>, InstanceCreationError> {
        let metadata = config.relayer_metadata.ok_or_else(|| {
            InstanceCreationError::RelayerMetadata("mock clients need the node's relayer metadata".to_owned())
        })?;

        let client = MockEncryptionClient::new(config.chain_id, metadata, Arc::clone(&self.coprocessor));
        info!("created mock encryption client {} for chain {}", client.instance_id(), config.chain_id);
        Ok(Arc::new(client))
    }
}
