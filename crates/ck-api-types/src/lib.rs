use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Lowercases and trims an address so that set membership and storage keys
/// do not depend on checksum casing.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Deduplicated, normalized, ordered contract address set. Empty entries are dropped.
pub fn canonical_address_set<I, S>(addresses: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    addresses
        .into_iter()
        .map(|address| normalize_address(address.as_ref()))
        .filter(|address| !address.is_empty())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct DecryptRequest {
    pub handle: String,
    pub contract_address: String,
}

impl DecryptRequest {
    pub fn new(handle: impl Into<String>, contract_address: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            contract_address: contract_address.into(),
        }
    }
}

/// Clear value produced by an authorized decryption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ClearValue {
    Bool(bool),
    U64(u64),
    /// Values wider than 64 bits and addresses, as decimal or hex text.
    Text(String),
}

impl fmt::Display for ClearValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearValue::Bool(value) => write!(f, "{value}"),
            ClearValue::U64(value) => write!(f, "{value}"),
            ClearValue::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FheType {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Uint128,
    Uint256,
    Address,
}

impl FheType {
    /// Accepts both internal (`euint64`) and external (`externalEuint64`) ABI names.
    pub fn from_abi_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let base = match name.strip_prefix("external") {
            Some(rest) => rest.to_lowercase(),
            None => name.to_owned(),
        };

        match base.as_str() {
            "ebool" => Some(FheType::Bool),
            "euint8" => Some(FheType::Uint8),
            "euint16" => Some(FheType::Uint16),
            "euint32" => Some(FheType::Uint32),
            "euint64" => Some(FheType::Uint64),
            "euint128" => Some(FheType::Uint128),
            "euint256" => Some(FheType::Uint256),
            "eaddress" => Some(FheType::Address),
            _ => None,
        }
    }

    /// Name of the encrypted-input builder operation for this type.
    pub fn builder_method(self) -> &'static str {
        match self {
            FheType::Bool => "addBool",
            FheType::Uint8 => "add8",
            FheType::Uint16 => "add16",
            FheType::Uint32 => "add32",
            FheType::Uint64 => "add64",
            FheType::Uint128 => "add128",
            FheType::Uint256 => "add256",
            FheType::Address => "addAddress",
        }
    }

    /// Type discriminant embedded in handles.
    pub fn type_byte(self) -> u8 {
        match self {
            FheType::Bool => 0,
            FheType::Uint8 => 2,
            FheType::Uint16 => 3,
            FheType::Uint32 => 4,
            FheType::Uint64 => 5,
            FheType::Uint128 => 6,
            FheType::Address => 7,
            FheType::Uint256 => 8,
        }
    }

    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(FheType::Bool),
            2 => Some(FheType::Uint8),
            3 => Some(FheType::Uint16),
            4 => Some(FheType::Uint32),
            5 => Some(FheType::Uint64),
            6 => Some(FheType::Uint128),
            7 => Some(FheType::Address),
            8 => Some(FheType::Uint256),
            _ => None,
        }
    }
}

/// Value handed to an encrypted-input builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    /// Decimal or 0x-prefixed hex text.
    U256(String),
    Address(String),
}

impl InputValue {
    pub fn fhe_type(&self) -> FheType {
        match self {
            InputValue::Bool(_) => FheType::Bool,
            InputValue::U8(_) => FheType::Uint8,
            InputValue::U16(_) => FheType::Uint16,
            InputValue::U32(_) => FheType::Uint32,
            InputValue::U64(_) => FheType::Uint64,
            InputValue::U128(_) => FheType::Uint128,
            InputValue::U256(_) => FheType::Uint256,
            InputValue::Address(_) => FheType::Address,
        }
    }

    pub fn to_clear_value(&self) -> ClearValue {
        match self {
            InputValue::Bool(value) => ClearValue::Bool(*value),
            InputValue::U8(value) => ClearValue::U64(u64::from(*value)),
            InputValue::U16(value) => ClearValue::U64(u64::from(*value)),
            InputValue::U32(value) => ClearValue::U64(u64::from(*value)),
            InputValue::U64(value) => ClearValue::U64(*value),
            InputValue::U128(value) => ClearValue::Text(value.to_string()),
            InputValue::U256(value) => ClearValue::Text(value.clone()),
            InputValue::Address(value) => ClearValue::Text(normalize_address(value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedInput {
    pub handles: Vec<String>,
    pub input_proof: String,
}

/// Re-encryption keypair used for user decryption. Both halves are hex strings.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

// ── EIP-712 payload ──

pub const USER_DECRYPT_PRIMARY_TYPE: &str = "UserDecryptRequestVerification";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Eip712Field {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl Eip712Field {
    fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_owned(),
            type_name: type_name.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserDecryptMessage {
    pub public_key: String,
    pub contract_addresses: Vec<String>,
    pub start_timestamp: u64,
    pub duration_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserDecryptTypedData {
    pub domain: Eip712Domain,
    pub primary_type: String,
    pub types: BTreeMap<String, Vec<Eip712Field>>,
    pub message: UserDecryptMessage,
}

impl UserDecryptTypedData {
    pub fn new(domain: Eip712Domain, message: UserDecryptMessage) -> Self {
        let mut types = BTreeMap::new();
        types.insert(
            "EIP712Domain".to_owned(),
            vec![
                Eip712Field::new("name", "string"),
                Eip712Field::new("version", "string"),
                Eip712Field::new("chainId", "uint256"),
                Eip712Field::new("verifyingContract", "address"),
            ],
        );
        types.insert(
            USER_DECRYPT_PRIMARY_TYPE.to_owned(),
            vec![
                Eip712Field::new("publicKey", "bytes"),
                Eip712Field::new("contractAddresses", "address[]"),
                Eip712Field::new("startTimestamp", "uint256"),
                Eip712Field::new("durationDays", "uint256"),
            ],
        );

        Self {
            domain,
            primary_type: USER_DECRYPT_PRIMARY_TYPE.to_owned(),
            types,
            message,
        }
    }
}

// ── Lifecycle / orchestration views ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

impl LifecycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStatus::Idle => "idle",
            LifecycleStatus::Loading => "loading",
            LifecycleStatus::Ready => "ready",
            LifecycleStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecryptErrorInfo {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelayerMetadata {
    pub chain_id: u64,
    pub acl_contract_address: String,
    pub input_verifier_contract_address: String,
    pub kms_verifier_contract_address: String,
    pub verifying_contract_address_decryption: String,
    pub verifying_contract_address_input_verification: String,
}

/// Network public key and public parameters, cached per ACL contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicParams {
    pub public_key_id: String,
    pub public_key: String,
    pub public_params: String,
}
