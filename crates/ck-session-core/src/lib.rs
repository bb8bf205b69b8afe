//! Session core: keeps one encryption client alive per wallet/chain,
//! caches decryption authorizations and runs batched user decryption.

pub mod cache;
pub mod clock;
pub mod config;
pub mod encryption;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod signature;

#[cfg(test)]
mod test_support;

pub use cache::{DecryptionSignatureCache, storage_key};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use encryption::{EncryptionOrchestrator, parse_input_value};
pub use error::{DecryptError, EncryptError, SessionError, SignatureError};
pub use lifecycle::{InstanceLifecycle, LifecycleInput, LifecycleState};
pub use orchestrator::{DecryptOutcome, DecryptPhase, DecryptState, DecryptionOrchestrator};
pub use signature::{DecryptionSignature, SignatureParts};
