use ck_api_types::{UserDecryptTypedData, canonical_address_set, normalize_address};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::SignatureError;

pub const SECONDS_PER_DAY: u64 = 86_400;
pub const DEFAULT_DURATION_DAYS: u32 = 7;

/// Raw fields of a decryption authorization, as produced by signing or read
/// back from storage. Turned into a [`DecryptionSignature`] by validation.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureParts {
    pub public_key: String,
    pub private_key: String,
    pub signature: String,
    pub start_timestamp: u64,
    pub duration_days: u32,
    pub user_address: String,
    pub contract_addresses: Vec<String>,
    pub eip712: UserDecryptTypedData,
}

/// Signed, time-bounded permission for one user to decrypt handles of a set
/// of contracts. Immutable once constructed.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptionSignature {
    public_key: String,
    private_key: String,
    signature: String,
    start_timestamp: u64,
    duration_days: u32,
    user_address: String,
    contract_addresses: Vec<String>,
    eip712: UserDecryptTypedData,
}

impl DecryptionSignature {
    pub fn new(parts: SignatureParts) -> Result<Self, SignatureError> {
        if parts.duration_days == 0 {
            return Err(SignatureError::Malformed("durationDays must be greater than zero".to_owned()));
        }

        for (field, value) in [
            ("publicKey", &parts.public_key),
            ("privateKey", &parts.private_key),
            ("signature", &parts.signature),
            ("userAddress", &parts.user_address),
        ] {
            if value.trim().is_empty() {
                return Err(SignatureError::Malformed(format!("{field} is empty")));
            }
        }

        let contracts = canonical_address_set(&parts.contract_addresses);
        if contracts.is_empty() {
            return Err(SignatureError::Malformed("contractAddresses is empty".to_owned()));
        }

        let message = &parts.eip712.message;
        if message.start_timestamp != parts.start_timestamp
            || message.duration_days != parts.duration_days
            || message.public_key != parts.public_key
            || canonical_address_set(&message.contract_addresses) != contracts
        {
            return Err(SignatureError::Malformed(
                "EIP-712 message does not match the signature fields".to_owned(),
            ));
        }

        Ok(Self {
            public_key: parts.public_key,
            private_key: parts.private_key,
            signature: parts.signature,
            start_timestamp: parts.start_timestamp,
            duration_days: parts.duration_days,
            user_address: normalize_address(&parts.user_address),
            contract_addresses: contracts.into_iter().collect(),
            eip712: parts.eip712,
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn start_timestamp(&self) -> u64 {
        self.start_timestamp
    }

    pub fn duration_days(&self) -> u32 {
        self.duration_days
    }

    pub fn user_address(&self) -> &str {
        &self.user_address
    }

    /// Normalized and sorted.
    pub fn contract_addresses(&self) -> &[String] {
        &self.contract_addresses
    }

    pub fn eip712(&self) -> &UserDecryptTypedData {
        &self.eip712
    }

    pub fn contract_set(&self) -> BTreeSet<String> {
        self.contract_addresses.iter().cloned().collect()
    }

    pub fn expires_at(&self) -> u64 {
        self.start_timestamp
            .saturating_add(u64::from(self.duration_days).saturating_mul(SECONDS_PER_DAY))
    }

    pub fn is_valid_at(&self, now_seconds: u64) -> bool {
        now_seconds < self.expires_at()
    }

    /// True when every requested contract is covered by this authorization.
    pub fn covers(&self, requested: &BTreeSet<String>) -> bool {
        requested
            .iter()
            .all(|address| self.contract_addresses.binary_search(address).is_ok())
    }

    pub fn to_value(&self) -> Result<serde_json::Value, SignatureError> {
        serde_json::to_value(self).map_err(|err| SignatureError::Malformed(err.to_string()))
    }

    pub fn to_json(&self) -> Result<String, SignatureError> {
        serde_json::to_string(self).map_err(|err| SignatureError::Malformed(err.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, SignatureError> {
        let parts: SignatureParts =
            serde_json::from_value(value).map_err(|err| SignatureError::Corrupt(err.to_string()))?;
        Self::new(parts).map_err(into_corrupt)
    }

    pub fn from_json(raw: &str) -> Result<Self, SignatureError> {
        let parts: SignatureParts =
            serde_json::from_str(raw).map_err(|err| SignatureError::Corrupt(err.to_string()))?;
        Self::new(parts).map_err(into_corrupt)
    }
}

fn into_corrupt(err: SignatureError) -> SignatureError {
    match err {
        SignatureError::Malformed(reason) => SignatureError::Corrupt(reason),
        other => other,
    }
}

/// Interchangeable when user, signature and contract set all match.
impl PartialEq for DecryptionSignature {
    fn eq(&self, other: &Self) -> bool {
        self.user_address == other.user_address
            && self.signature == other.signature
            && self.contract_set() == other.contract_set()
    }
}

impl Eq for DecryptionSignature {}

impl fmt::Debug for DecryptionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionSignature")
            .field("user_address", &self.user_address)
            .field("contract_addresses", &self.contract_addresses)
            .field("start_timestamp", &self.start_timestamp)
            .field("duration_days", &self.duration_days)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ck_api_types::{Eip712Domain, UserDecryptMessage};

    const T: u64 = 1_700_000_000;

    fn parts(user: &str, contracts: &[&str], start: u64, days: u32) -> SignatureParts {
        let contracts: Vec<String> = contracts.iter().map(|c| (*c).to_owned()).collect();
        SignatureParts {
            public_key: "0xpub".to_owned(),
            private_key: "0xpriv".to_owned(),
            signature: "0xsig".to_owned(),
            start_timestamp: start,
            duration_days: days,
            user_address: user.to_owned(),
            contract_addresses: contracts.clone(),
            eip712: UserDecryptTypedData::new(
                Eip712Domain {
                    name: "Decryption".to_owned(),
                    version: "1".to_owned(),
                    chain_id: 11155111,
                    verifying_contract: "0xverifier".to_owned(),
                },
                UserDecryptMessage {
                    public_key: "0xpub".to_owned(),
                    contract_addresses: contracts,
                    start_timestamp: start,
                    duration_days: days,
                },
            ),
        }
    }

    #[test]
    fn validity_window_boundary() {
        let sig = DecryptionSignature::new(parts("0xuser", &["0xc1"], T, 7)).unwrap();
        assert!(sig.is_valid_at(T));
        assert!(sig.is_valid_at(T + 7 * 86_400 - 1));
        assert!(!sig.is_valid_at(T + 7 * 86_400));
        assert!(!sig.is_valid_at(T + 7 * 86_400 + 1));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let err = DecryptionSignature::new(parts("0xuser", &["0xc1"], T, 0)).unwrap_err();
        assert!(matches!(err, SignatureError::Malformed(_)));
    }

    #[test]
    fn equality_ignores_contract_order_and_case() {
        let a = DecryptionSignature::new(parts("0xUser", &["0xC1", "0xc2"], T, 7)).unwrap();
        let b = DecryptionSignature::new(parts("0xuser", &["0xc2", "0xc1", "0xC1"], T + 5, 7)).unwrap();
        assert_eq!(a, b);

        let c = DecryptionSignature::new(parts("0xuser", &["0xc1"], T, 7)).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let sig = DecryptionSignature::new(parts(
            "0xüser-ñame",
            &["0xc3", "0xC1", "0xcafé"],
            u64::MAX - 10,
            30,
        ))
        .unwrap();

        let restored = DecryptionSignature::from_json(&sig.to_json().unwrap()).unwrap();
        assert_eq!(restored, sig);
        assert_eq!(restored.start_timestamp(), u64::MAX - 10);
        assert_eq!(restored.contract_addresses(), sig.contract_addresses());
        assert_eq!(restored.private_key(), "0xpriv");
        assert_eq!(restored.eip712(), sig.eip712());

        let via_value = DecryptionSignature::from_value(sig.to_value().unwrap()).unwrap();
        assert_eq!(via_value, sig);
    }

    #[test]
    fn serialized_form_uses_camel_case_keys() {
        let sig = DecryptionSignature::new(parts("0xuser", &["0xc1"], T, 7)).unwrap();
        let value = sig.to_value().unwrap();
        assert_eq!(value["userAddress"], "0xuser");
        assert_eq!(value["durationDays"], 7);
        assert_eq!(value["contractAddresses"][0], "0xc1");
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        assert!(matches!(
            DecryptionSignature::from_json("{not json"),
            Err(SignatureError::Corrupt(_))
        ));
        assert!(matches!(
            DecryptionSignature::from_json(r#"{"signature":"0x01"}"#),
            Err(SignatureError::Corrupt(_))
        ));
    }

    #[test]
    fn tampered_message_is_reported_as_corrupt() {
        let sig = DecryptionSignature::new(parts("0xuser", &["0xc1"], T, 7)).unwrap();
        let mut value = sig.to_value().unwrap();
        value["durationDays"] = serde_json::json!(365);
        assert!(matches!(
            DecryptionSignature::from_value(value),
            Err(SignatureError::Corrupt(_))
        ));
    }

    #[test]
    fn covers_subsets_only() {
        let sig = DecryptionSignature::new(parts("0xuser", &["0xc1", "0xc2"], T, 7)).unwrap();
        assert!(sig.covers(&canonical_address_set(["0xC1"])));
        assert!(sig.covers(&canonical_address_set(["0xc1", "0xc2"])));
        assert!(!sig.covers(&canonical_address_set(["0xc1", "0xc3"])));
    }

    #[test]
    fn expiry_saturates_instead_of_overflowing() {
        let sig = DecryptionSignature::new(parts("0xuser", &["0xc1"], u64::MAX - 1, 7)).unwrap();
        assert_eq!(sig.expires_at(), u64::MAX);
    }
}
