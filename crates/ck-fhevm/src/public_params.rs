use anyhow::{Context, Result};
use ck_api_types::{PublicParams, normalize_address};
use ck_storage::SignatureStorage;
use std::sync::Arc;
use tracing::{debug, warn};

/// Caches the network public key and public parameters per ACL contract so
/// that recreating a client does not refetch them.
#[derive(Clone)]
pub struct PublicParamsCache {
    storage: Arc<dyn SignatureStorage>,
}

impl PublicParamsCache {
    pub fn new(storage: Arc<dyn SignatureStorage>) -> Self {
        Self { storage }
    }

    fn key(acl_address: &str) -> String {
        format!("fhevm-public-params:{}", normalize_address(acl_address))
    }

    /// Missing or unreadable entries are both reported as `None`.
    pub async fn load(&self, acl_address: &str) -> Option<PublicParams> {
        match self.try_load(acl_address).await {
            Ok(found) => found,
            Err(err) => {
                warn!("ignoring cached public params for {}: {:#}", acl_address, err);
                None
            }
        }
    }

    async fn try_load(&self, acl_address: &str) -> Result<Option<PublicParams>> {
        let Some(raw) = self.storage.get_item(&Self::key(acl_address)).await? else {
            return Ok(None);
        };
        let params = serde_json::from_str(&raw).context("cached public params are malformed")?;
        Ok(Some(params))
    }

    pub async fn store(&self, acl_address: &str, params: &PublicParams) -> Result<()> {
        let value = serde_json::to_string(params)?;
        self.storage.set_item(&Self::key(acl_address), &value).await?;
        debug!("cached public params {} for {}", params.public_key_id, acl_address);
        Ok(())
    }
}
