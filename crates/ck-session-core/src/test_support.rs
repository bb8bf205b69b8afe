use async_trait::async_trait;
use ck_api_types::UserDecryptTypedData;
use ck_crypto::{Ed25519Signer, SignerCapability, SignerError};
use ck_fhevm::mock::{MockCoprocessor, MockEncryptionClient, hardhat_relayer_metadata};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const CONTRACT_A: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
pub const CONTRACT_B: &str = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512";

pub fn mock_client() -> MockEncryptionClient {
    MockEncryptionClient::new(31337, hardhat_relayer_metadata(31337), Arc::new(MockCoprocessor::default()))
}

/// Real signer that records every typed-data payload it signs. When gated,
/// each signing waits for one `notify_one()` on the gate.
pub struct RecordingSigner {
    inner: Ed25519Signer,
    signed: Mutex<Vec<UserDecryptTypedData>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl RecordingSigner {
    pub fn new() -> Self {
        Self {
            inner: Ed25519Signer::new_random(),
            signed: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn signed(&self) -> Vec<UserDecryptTypedData> {
        self.signed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignerCapability for RecordingSigner {
    async fn address(&self) -> Result<String, SignerError> {
        self.inner.address().await
    }

    async fn sign_typed_data(&self, typed_data: &UserDecryptTypedData) -> Result<String, SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.signed.lock().unwrap().push(typed_data.clone());
        self.inner.sign_typed_data(typed_data).await
    }
}

pub struct RejectingSigner {
    pub calls: AtomicUsize,
}

impl RejectingSigner {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SignerCapability for RejectingSigner {
    async fn address(&self) -> Result<String, SignerError> {
        Ok("0x70997970C51812dc3A010C7d01b50e0d17dc79C8".to_owned())
    }

    async fn sign_typed_data(&self, _typed_data: &UserDecryptTypedData) -> Result<String, SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SignerError::Rejected("user denied message signature".to_owned()))
    }
}

/// Lets spawned tasks run up to their next suspension point.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
