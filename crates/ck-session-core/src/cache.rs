use ck_api_types::{KeyPair, canonical_address_set, normalize_address};
use ck_client::EncryptionClient;
use ck_crypto::SignerCapability;
use ck_storage::SignatureStorage;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{DEFAULT_MAX_DURATION_DAYS, SessionConfig};
use crate::error::SignatureError;
use crate::signature::{DEFAULT_DURATION_DAYS, DecryptionSignature, SignatureParts};

const KEY_PREFIX: &str = "fhevm-decryption-signature";

/// Storage key for one (chain, verifying contract, user, contract set) scope.
/// A caller-supplied public key narrows the scope further.
pub fn storage_key(
    chain_id: u64,
    verifying_contract: &str,
    user_address: &str,
    contracts: &BTreeSet<String>,
    public_key: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_address(verifying_contract).as_bytes());
    for contract in contracts {
        hasher.update(b"|");
        hasher.update(contract.as_bytes());
    }
    if let Some(public_key) = public_key {
        hasher.update(b"#");
        hasher.update(public_key.as_bytes());
    }
    let digest = hasher.finalize();

    format!(
        "{KEY_PREFIX}:{chain_id}:{}:{}",
        normalize_address(user_address),
        hex::encode(digest)
    )
}

/// Loads, validates, signs and persists decryption authorizations.
///
/// Concurrent calls for the same scope are not coalesced: both may sign, both
/// results are valid and the storage key keeps whichever was written last.
pub struct DecryptionSignatureCache {
    storage: Arc<dyn SignatureStorage>,
    duration_days: u32,
    max_duration_days: u32,
    clock: Arc<dyn Clock>,
}

impl DecryptionSignatureCache {
    pub fn new(storage: Arc<dyn SignatureStorage>) -> Self {
        Self {
            storage,
            duration_days: DEFAULT_DURATION_DAYS,
            max_duration_days: DEFAULT_MAX_DURATION_DAYS,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_config(storage: Arc<dyn SignatureStorage>, config: &SessionConfig) -> Self {
        Self {
            max_duration_days: config.max_signature_duration_days.max(1),
            ..Self::new(storage)
        }
        .with_duration_days(config.signature_duration_days)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Signing window for new authorizations, clamped to the policy maximum
    /// so that freshly signed entries are always reusable.
    pub fn with_duration_days(mut self, duration_days: u32) -> Self {
        let duration_days = duration_days.max(1);
        if duration_days > self.max_duration_days {
            warn!(
                "signature window of {} days exceeds the {} day policy, using {}",
                duration_days, self.max_duration_days, self.max_duration_days
            );
        }
        self.duration_days = duration_days.min(self.max_duration_days);
        self
    }

    pub fn duration_days(&self) -> u32 {
        self.duration_days
    }

    fn key_for(
        client: &dyn EncryptionClient,
        user_address: &str,
        contracts: &BTreeSet<String>,
        public_key: Option<&str>,
    ) -> String {
        storage_key(
            client.chain_id(),
            client.verifying_contract(),
            user_address,
            contracts,
            public_key,
        )
    }

    /// Returns a stored signature only when it is well formed, belongs to
    /// this client's domain and user, is still valid and covers `contracts`.
    /// Unparseable entries surface as [`SignatureError::Corrupt`].
    pub async fn load_from_storage(
        &self,
        client: &dyn EncryptionClient,
        contracts: &BTreeSet<String>,
        user_address: &str,
        public_key_override: Option<&str>,
    ) -> Result<Option<DecryptionSignature>, SignatureError> {
        let key = Self::key_for(client, user_address, contracts, public_key_override);
        let raw = self
            .storage
            .get_item(&key)
            .await
            .map_err(|err| SignatureError::Storage(format!("{err:#}")))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let signature = DecryptionSignature::from_json(&raw)?;

        let domain = &signature.eip712().domain;
        if domain.chain_id != client.chain_id()
            || normalize_address(&domain.verifying_contract) != normalize_address(client.verifying_contract())
        {
            debug!("stored signature {} belongs to another domain", key);
            return Ok(None);
        }

        if signature.user_address() != normalize_address(user_address) {
            debug!("stored signature {} belongs to another user", key);
            return Ok(None);
        }

        if let Some(public_key) = public_key_override {
            if signature.public_key() != public_key {
                return Ok(None);
            }
        }

        if signature.duration_days() > self.max_duration_days {
            warn!(
                "stored signature {} has a {} day window, above the {} day policy",
                key,
                signature.duration_days(),
                self.max_duration_days
            );
            return Ok(None);
        }

        if !signature.is_valid_at(self.clock.now_seconds()) {
            debug!("stored signature {} has expired", key);
            if let Err(err) = self.storage.remove_item(&key).await {
                warn!("failed to remove expired signature {}: {:#}", key, err);
            }
            return Ok(None);
        }

        if !signature.covers(contracts) {
            return Ok(None);
        }

        Ok(Some(signature))
    }

    pub async fn save_to_storage(
        &self,
        client: &dyn EncryptionClient,
        signature: &DecryptionSignature,
        public_key_override: Option<&str>,
    ) -> Result<(), SignatureError> {
        let key = Self::key_for(
            client,
            signature.user_address(),
            &signature.contract_set(),
            public_key_override,
        );
        let value = signature.to_json()?;
        self.storage
            .set_item(&key, &value)
            .await
            .map_err(|err| SignatureError::Storage(format!("{err:#}")))?;
        debug!("persisted decryption signature {}", key);
        Ok(())
    }

    /// Like [`Self::try_load_or_sign`], with every failure folded into `None`.
    pub async fn load_or_sign(
        &self,
        client: &dyn EncryptionClient,
        contract_addresses: &[String],
        signer: &dyn SignerCapability,
        key_pair_override: Option<&KeyPair>,
    ) -> Option<DecryptionSignature> {
        match self
            .try_load_or_sign(client, contract_addresses, signer, key_pair_override)
            .await
        {
            Ok(signature) => Some(signature),
            Err(err) => {
                warn!("could not obtain a decryption signature: {}", err);
                None
            }
        }
    }

    pub async fn try_load_or_sign(
        &self,
        client: &dyn EncryptionClient,
        contract_addresses: &[String],
        signer: &dyn SignerCapability,
        key_pair_override: Option<&KeyPair>,
    ) -> Result<DecryptionSignature, SignatureError> {
        let contracts = canonical_address_set(contract_addresses);
        if contracts.is_empty() {
            return Err(SignatureError::EmptyContractSet);
        }

        let user_address = normalize_address(&signer.address().await?);
        let public_key_override = key_pair_override.map(|pair| pair.public_key.as_str());

        match self
            .load_from_storage(client, &contracts, &user_address, public_key_override)
            .await
        {
            Ok(Some(signature)) => {
                debug!("reusing stored decryption signature for {}", user_address);
                return Ok(signature);
            }
            Ok(None) => {}
            Err(SignatureError::Corrupt(reason)) => {
                warn!("discarding corrupt stored signature for {}: {}", user_address, reason);
                let key = Self::key_for(client, &user_address, &contracts, public_key_override);
                if let Err(err) = self.storage.remove_item(&key).await {
                    warn!("failed to remove corrupt signature {}: {:#}", key, err);
                }
            }
            Err(err) => warn!("signature lookup failed, signing a new one: {}", err),
        }

        let key_pair = match key_pair_override {
            Some(pair) => pair.clone(),
            None => client.generate_keypair(),
        };

        let contract_addresses: Vec<String> = contracts.iter().cloned().collect();
        let start_timestamp = self.clock.now_seconds();
        let eip712 = client.create_eip712(
            &key_pair.public_key,
            &contract_addresses,
            start_timestamp,
            self.duration_days,
        );

        let signature = signer.sign_typed_data(&eip712).await?;

        let signature = DecryptionSignature::new(SignatureParts {
            public_key: key_pair.public_key,
            private_key: key_pair.private_key,
            signature,
            start_timestamp,
            duration_days: self.duration_days,
            user_address,
            contract_addresses,
            eip712,
        })?;

        if let Err(err) = self.save_to_storage(client, &signature, public_key_override).await {
            warn!("signature obtained but could not be persisted: {}", err);
        }

        info!(
            "signed decryption authorization for {} over {} contracts",
            signature.user_address(),
            signature.contract_addresses().len()
        );
        Ok(signature)
    }
}
