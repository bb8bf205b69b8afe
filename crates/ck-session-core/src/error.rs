use ck_api_types::DecryptErrorInfo;
use ck_client::{ClientError, InstanceCreationError};
use ck_crypto::SignerError;
use thiserror::Error;

pub const SIGNATURE_ERROR_CODE: &str = "SIGNATURE_ERROR";
pub const DECRYPT_ERROR_CODE: &str = "DECRYPT_ERROR";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("no contract addresses were given")]
    EmptyContractSet,
    #[error("signer unavailable: {0}")]
    SignerUnavailable(String),
    #[error("signature request rejected: {0}")]
    Rejected(String),
    #[error("signature is malformed: {0}")]
    Malformed(String),
    /// Stored data could not be parsed or failed shape validation. Callers
    /// treat this as a cache miss.
    #[error("stored signature is corrupt: {0}")]
    Corrupt(String),
    #[error("signature storage failed: {0}")]
    Storage(String),
}

impl From<SignerError> for SignatureError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Rejected(reason) => SignatureError::Rejected(reason),
            SignerError::Unavailable(reason) => SignatureError::SignerUnavailable(reason),
            SignerError::Encoding(reason) => SignatureError::Malformed(reason),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecryptError {
    #[error("failed to create decryption signature: {0}")]
    Signature(#[from] SignatureError),
    #[error("{message}")]
    Remote { code: Option<String>, message: String },
}

impl DecryptError {
    pub fn code(&self) -> &str {
        match self {
            DecryptError::Signature(_) => SIGNATURE_ERROR_CODE,
            DecryptError::Remote { code, .. } => code.as_deref().unwrap_or(DECRYPT_ERROR_CODE),
        }
    }

    pub fn info(&self) -> DecryptErrorInfo {
        DecryptErrorInfo {
            code: self.code().to_owned(),
            message: self.to_string(),
        }
    }
}

impl From<ClientError> for DecryptError {
    fn from(err: ClientError) -> Self {
        DecryptError::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncryptError {
    #[error("contract address is required")]
    MissingContractAddress,
    #[error("unsupported encrypted type: {0}")]
    UnsupportedType(String),
    #[error("invalid {abi_type} value: {raw}")]
    InvalidValue { abi_type: String, raw: String },
    #[error("could not determine the signer address: {0}")]
    Signer(#[from] SignatureError),
    #[error("encryption failed: {0}")]
    Client(#[from] ClientError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    InstanceCreation(#[from] InstanceCreationError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Decrypt(#[from] DecryptError),
    /// Internal signal: the operation's context was superseded. Never shown
    /// to users.
    #[error("operation superseded by a newer context")]
    StaleOperationDiscarded,
}
