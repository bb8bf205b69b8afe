//! Encryption client lifecycle.
//!
//! One creation attempt is live at a time. Every attempt gets a generation
//! number and a cancellation token; a finished attempt publishes only if its
//! generation is still current and its token was not cancelled. Anything
//! else is dropped without touching the published state.

use ck_api_types::LifecycleStatus;
use ck_client::{CreateRequest, CryptoProvider, EncryptionClient, InstanceCreationError, MockChains, WalletProvider};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;

#[derive(Clone)]
pub enum LifecycleState {
    Idle,
    Loading,
    Ready(Arc<dyn EncryptionClient>),
    Error(InstanceCreationError),
}

impl LifecycleState {
    pub fn status(&self) -> LifecycleStatus {
        match self {
            LifecycleState::Idle => LifecycleStatus::Idle,
            LifecycleState::Loading => LifecycleStatus::Loading,
            LifecycleState::Ready(_) => LifecycleStatus::Ready,
            LifecycleState::Error(_) => LifecycleStatus::Error,
        }
    }

    pub fn client(&self) -> Option<Arc<dyn EncryptionClient>> {
        match self {
            LifecycleState::Ready(client) => Some(Arc::clone(client)),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&InstanceCreationError> {
        match self {
            LifecycleState::Error(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Debug for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Idle => f.write_str("Idle"),
            LifecycleState::Loading => f.write_str("Loading"),
            LifecycleState::Ready(client) => write!(f, "Ready(chain {})", client.chain_id()),
            LifecycleState::Error(err) => f.debug_tuple("Error").field(err).finish(),
        }
    }
}

/// Declarative inputs. Applying the same input twice is a no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleInput {
    pub provider: Option<WalletProvider>,
    pub chain_id: Option<u64>,
    pub enabled: bool,
    pub mock_chains: MockChains,
}

impl LifecycleInput {
    pub fn new(provider: Option<WalletProvider>, chain_id: Option<u64>) -> Self {
        Self {
            provider,
            chain_id,
            enabled: true,
            mock_chains: MockChains::new(),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_mock_chains(mut self, mock_chains: MockChains) -> Self {
        self.mock_chains = mock_chains;
        self
    }

    fn wants_client(&self) -> bool {
        self.enabled && self.provider.is_some()
    }

    /// Whether moving from `self` to `next` invalidates the current attempt.
    /// Mock-chain overrides alone do not; they apply to the next attempt.
    fn requires_restart(&self, next: &LifecycleInput) -> bool {
        self.provider != next.provider || self.chain_id != next.chain_id || self.enabled != next.enabled
    }
}

#[derive(Default)]
struct Generation {
    input: Option<LifecycleInput>,
    epoch: u64,
    token: Option<CancellationToken>,
}

struct Inner {
    provider: Arc<dyn CryptoProvider>,
    generation: Mutex<Generation>,
    state: watch::Sender<LifecycleState>,
    events: broadcast::Sender<LifecycleStatus>,
}

fn lock(mutex: &Mutex<Generation>) -> MutexGuard<'_, Generation> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn publish(&self, next: LifecycleState) {
        let status = next.status();
        self.state.send_replace(next);
        let _ = self.events.send(status);
    }

    /// Invalidates any attempt in flight and returns to `Idle`.
    fn reset(&self, generation: &mut Generation) {
        if let Some(token) = generation.token.take() {
            token.cancel();
        }
        generation.epoch += 1;

        if self.state.borrow().status() != LifecycleStatus::Idle {
            self.publish(LifecycleState::Idle);
        }
    }

    fn start(self: &Arc<Self>, generation: &mut Generation) {
        let Some(input) = generation.input.clone() else {
            return;
        };
        let Some(provider) = input.provider else {
            return;
        };

        if let Some(token) = generation.token.take() {
            token.cancel();
        }
        generation.epoch += 1;
        let epoch = generation.epoch;
        let token = CancellationToken::new();
        generation.token = Some(token.clone());

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!("cannot create an encryption client outside a Tokio runtime: {}", err);
                self.publish(LifecycleState::Error(InstanceCreationError::Factory(
                    "no async runtime available".to_owned(),
                )));
                return;
            }
        };

        self.publish(LifecycleState::Loading);
        debug!("starting encryption client generation {}", epoch);

        let request = CreateRequest {
            provider,
            chain_id: input.chain_id,
            mock_chains: input.mock_chains,
        };
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            let outcome = inner.provider.create(request, token.clone()).await;
            inner.complete(epoch, &token, outcome);
        });
    }

    fn complete(
        &self,
        epoch: u64,
        token: &CancellationToken,
        outcome: Result<Arc<dyn EncryptionClient>, InstanceCreationError>,
    ) {
        let generation = lock(&self.generation);
        if generation.epoch != epoch || token.is_cancelled() {
            debug!(
                "discarding result of superseded generation {} (current {})",
                epoch, generation.epoch
            );
            return;
        }

        match outcome {
            Ok(client) => {
                info!("encryption client ready for chain {}", client.chain_id());
                self.publish(LifecycleState::Ready(client));
            }
            Err(err) => {
                warn!("encryption client creation failed [{}]: {}", err.code(), err);
                self.publish(LifecycleState::Error(err));
            }
        }
    }
}

/// Owns the live encryption client and recreates it when the wallet
/// provider or chain changes. Must be driven from within a Tokio runtime.
pub struct InstanceLifecycle {
    inner: Arc<Inner>,
}

impl InstanceLifecycle {
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                provider,
                generation: Mutex::new(Generation::default()),
                state,
                events,
            }),
        }
    }

    pub fn configure(&self, input: LifecycleInput) {
        let mut generation = lock(&self.inner.generation);

        let restart = match &generation.input {
            Some(current) if *current == input => return,
            Some(current) => current.requires_restart(&input),
            None => true,
        };

        generation.input = Some(input);
        if !restart {
            debug!("lifecycle inputs updated without restart");
            return;
        }

        self.inner.reset(&mut generation);
        if generation.input.as_ref().is_some_and(LifecycleInput::wants_client) {
            self.inner.start(&mut generation);
        }
    }

    /// Drops the current client or attempt and starts over from the current
    /// inputs.
    pub fn refresh(&self) {
        let mut generation = lock(&self.inner.generation);
        self.inner.reset(&mut generation);
        if generation.input.as_ref().is_some_and(LifecycleInput::wants_client) {
            self.inner.start(&mut generation);
        }
    }

    /// Unmount: cancels everything and forgets the inputs.
    pub fn teardown(&self) {
        let mut generation = lock(&self.inner.generation);
        self.inner.reset(&mut generation);
        generation.input = None;
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> LifecycleStatus {
        self.inner.state.borrow().status()
    }

    pub fn current_error(&self) -> Option<InstanceCreationError> {
        self.inner.state.borrow().error().cloned()
    }

    pub fn instance(&self) -> Option<Arc<dyn EncryptionClient>> {
        self.inner.state.borrow().client()
    }

    pub fn generation(&self) -> u64 {
        lock(&self.inner.generation).epoch
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state.subscribe()
    }

    /// Every published status, in order.
    pub fn events(&self) -> broadcast::Receiver<LifecycleStatus> {
        self.inner.events.subscribe()
    }

    /// Waits until the lifecycle reaches `Ready` or `Error`. Never resolves
    /// while the lifecycle stays `Idle`.
    pub async fn settled(&self) -> LifecycleState {
        let mut receiver = self.inner.state.subscribe();
        let settled = receiver
            .wait_for(|state| matches!(state, LifecycleState::Ready(_) | LifecycleState::Error(_)))
            .await
            .map(|state| state.clone());
        match settled {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }
}

impl Drop for InstanceLifecycle {
    fn drop(&mut self) {
        self.teardown();
    }
}
