use ck_api_types::{ClearValue, DecryptErrorInfo, DecryptRequest, canonical_address_set, normalize_address};
use ck_client::{EncryptionClient, UserDecryptParams};
use ck_crypto::SignerCapability;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::cache::DecryptionSignatureCache;
use crate::error::{DecryptError, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DecryptPhase {
    Idle,
    Started,
    Signing,
    Calling,
    Completed,
    Failed,
}

impl DecryptPhase {
    pub fn message(&self) -> &'static str {
        match self {
            DecryptPhase::Idle => "",
            DecryptPhase::Started => "Start decrypt",
            DecryptPhase::Signing => "Requesting decryption signature",
            DecryptPhase::Calling => "Calling user decrypt",
            DecryptPhase::Completed => "Decrypt completed",
            DecryptPhase::Failed => "Decrypt failed",
        }
    }
}

/// What the UI renders.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptState {
    pub is_decrypting: bool,
    pub results: HashMap<String, ClearValue>,
    pub error: Option<DecryptErrorInfo>,
    pub message: String,
    pub phase: DecryptPhase,
}

impl Default for DecryptState {
    fn default() -> Self {
        Self {
            is_decrypting: false,
            results: HashMap::new(),
            error: None,
            message: String::new(),
            phase: DecryptPhase::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecryptOutcome {
    /// Missing inputs or another decrypt already running.
    Skipped,
    Completed(HashMap<String, ClearValue>),
    Failed(DecryptError),
    /// The context moved on while the signature was being obtained.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    chain_id: Option<u64>,
    signer: Option<usize>,
    requests_key: String,
}

fn signer_identity(signer: Option<&Arc<dyn SignerCapability>>) -> Option<usize> {
    signer.map(|signer| Arc::as_ptr(signer).cast::<()>() as usize)
}

/// Order-independent identity of a request batch.
pub fn requests_key(requests: &[DecryptRequest]) -> String {
    let mut entries: Vec<String> = requests
        .iter()
        .map(|request| format!("{}:{}", normalize_address(&request.contract_address), request.handle))
        .collect();
    entries.sort();
    entries.dedup();
    entries.join(",")
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs one batched user decryption at a time against the current client,
/// signer and signature cache.
pub struct DecryptionOrchestrator {
    cache: Arc<DecryptionSignatureCache>,
    context: Mutex<Snapshot>,
    busy: AtomicBool,
    state: watch::Sender<DecryptState>,
    phases: broadcast::Sender<DecryptPhase>,
}

const PHASE_BUFFER: usize = 16;

impl DecryptionOrchestrator {
    pub fn new(cache: Arc<DecryptionSignatureCache>) -> Self {
        let (state, _) = watch::channel(DecryptState::default());
        let (phases, _) = broadcast::channel(PHASE_BUFFER);
        Self {
            cache,
            context: Mutex::new(Snapshot {
                chain_id: None,
                signer: None,
                requests_key: String::new(),
            }),
            busy: AtomicBool::new(false),
            state,
            phases,
        }
    }

    fn context(&self) -> MutexGuard<'_, Snapshot> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the application's current chain, signer and request batch.
    /// A decrypt whose snapshot no longer matches is discarded after signing.
    pub fn update_context(
        &self,
        chain_id: Option<u64>,
        signer: Option<&Arc<dyn SignerCapability>>,
        requests: &[DecryptRequest],
    ) {
        let next = Snapshot {
            chain_id,
            signer: signer_identity(signer),
            requests_key: requests_key(requests),
        };
        let mut context = self.context();
        if *context != next {
            debug!("decrypt context changed");
            *context = next;
        }
    }

    pub fn can_decrypt(
        &self,
        requests: &[DecryptRequest],
        client: Option<&Arc<dyn EncryptionClient>>,
        signer: Option<&Arc<dyn SignerCapability>>,
    ) -> bool {
        client.is_some() && signer.is_some() && !requests.is_empty() && !self.busy.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> DecryptState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DecryptState> {
        self.state.subscribe()
    }

    /// Every phase transition, in order. [`Self::subscribe`] only keeps the
    /// latest state.
    pub fn phases(&self) -> broadcast::Receiver<DecryptPhase> {
        self.phases.subscribe()
    }

    fn enter(&self, phase: DecryptPhase) {
        self.state.send_modify(|state| {
            state.phase = phase;
            state.message = phase.message().to_owned();
        });
        let _ = self.phases.send(phase);
    }

    fn is_stale(&self, snapshot: &Snapshot) -> bool {
        *self.context() != *snapshot
    }

    pub async fn decrypt(
        &self,
        requests: &[DecryptRequest],
        client: Option<&Arc<dyn EncryptionClient>>,
        signer: Option<&Arc<dyn SignerCapability>>,
        chain_id: Option<u64>,
    ) -> DecryptOutcome {
        self.update_context(chain_id, signer, requests);

        let (Some(client), Some(signer)) = (client, signer) else {
            return DecryptOutcome::Skipped;
        };
        if requests.is_empty() {
            return DecryptOutcome::Skipped;
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("decrypt already in flight, skipping");
            return DecryptOutcome::Skipped;
        }
        let _busy = BusyGuard(&self.busy);

        let snapshot = self.context().clone();
        self.state.send_modify(|state| {
            state.is_decrypting = true;
            state.error = None;
        });
        self.enter(DecryptPhase::Started);

        let contract_addresses: Vec<String> = canonical_address_set(requests.iter().map(|r| &r.contract_address))
            .into_iter()
            .collect();

        self.enter(DecryptPhase::Signing);
        let signed = self
            .cache
            .try_load_or_sign(client.as_ref(), &contract_addresses, signer.as_ref(), None)
            .await;

        if self.is_stale(&snapshot) {
            debug!("{}", SessionError::StaleOperationDiscarded);
            self.state.send_modify(|state| state.is_decrypting = false);
            return DecryptOutcome::Discarded;
        }

        let signature = match signed {
            Ok(signature) => signature,
            Err(err) => return self.fail(DecryptError::Signature(err)),
        };

        self.enter(DecryptPhase::Calling);
        let params = UserDecryptParams {
            requests: requests.to_vec(),
            private_key: signature.private_key().to_owned(),
            public_key: signature.public_key().to_owned(),
            signature: signature.signature().to_owned(),
            contract_addresses: signature.contract_addresses().to_vec(),
            user_address: signature.user_address().to_owned(),
            start_timestamp: signature.start_timestamp(),
            duration_days: signature.duration_days(),
        };

        match client.user_decrypt(params).await {
            Ok(results) => {
                info!("decrypted {} handles", results.len());
                self.state.send_modify(|state| {
                    state.is_decrypting = false;
                    state.results = results.clone();
                    state.phase = DecryptPhase::Completed;
                    state.message = DecryptPhase::Completed.message().to_owned();
                });
                let _ = self.phases.send(DecryptPhase::Completed);
                DecryptOutcome::Completed(results)
            }
            Err(err) => self.fail(DecryptError::from(err)),
        }
    }

    fn fail(&self, err: DecryptError) -> DecryptOutcome {
        warn!("decrypt failed [{}]: {}", err.code(), err);
        let info = err.info();
        self.state.send_modify(|state| {
            state.is_decrypting = false;
            state.message = format!("{}: {}", DecryptPhase::Failed.message(), info.message);
            state.error = Some(info);
            state.phase = DecryptPhase::Failed;
        });
        let _ = self.phases.send(DecryptPhase::Failed);
        DecryptOutcome::Failed(err)
    }
}
