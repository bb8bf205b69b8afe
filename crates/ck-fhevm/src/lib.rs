pub mod http;
pub mod mock;
pub mod public_params;
pub mod resolve;

use async_trait::async_trait;
use ck_api_types::{PublicParams, RelayerMetadata};
use ck_client::{CreateRequest, CryptoProvider, Eip1193Provider, EncryptionClient, InstanceCreationError, WalletProvider};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use http::HttpRpcProvider;
pub use mock::{MockClientFactory, MockCoprocessor, MockEncryptionClient, MockNode};
pub use public_params::PublicParamsCache;
pub use resolve::ResolvedChain;

/// Contract addresses and relayer endpoint of a network served by a relayer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayerNetworkConfig {
    pub chain_id: u64,
    pub acl_contract_address: String,
    pub kms_contract_address: String,
    pub input_verifier_contract_address: String,
    pub verifying_contract_address_decryption: String,
    pub verifying_contract_address_input_verification: String,
    pub gateway_chain_id: u64,
    pub relayer_url: String,
}

impl RelayerNetworkConfig {
    pub fn sepolia() -> Self {
        Self {
            chain_id: 11155111,
            acl_contract_address: "0x687820221192C5B662b25367F70076A37bc79b6c".to_owned(),
            kms_contract_address: "0x1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC".to_owned(),
            input_verifier_contract_address: "0xbc91f3daD1A5F19F8390c400196e58073B6a0BC4".to_owned(),
            verifying_contract_address_decryption: "0xb6E160B1ff80D67Bfe90A85eE06Ce0A2613607D1".to_owned(),
            verifying_contract_address_input_verification: "0x7048C39f048125eDa9d678AEbaDfB22F7900a29F"
                .to_owned(),
            gateway_chain_id: 55815,
            relayer_url: "https://relayer.testnet.zama.cloud".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationPhase {
    SdkLoading,
    SdkLoaded,
    SdkInitializing,
    SdkInitialized,
    Creating,
}

/// Everything a factory needs to build one client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub chain_id: u64,
    pub provider: WalletProvider,
    pub rpc_url: Option<String>,
    pub network: Option<RelayerNetworkConfig>,
    pub relayer_metadata: Option<RelayerMetadata>,
    pub public_params: Option<PublicParams>,
}

/// Builds encryption clients. The relayer-backed factory comes from the
/// cryptographic library; [`MockClientFactory`] serves local dev chains.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Fetches the library code, if it is loaded lazily.
    async fn load(&self) -> Result<(), InstanceCreationError> {
        Ok(())
    }

    async fn initialize(&self) -> Result<(), InstanceCreationError> {
        Ok(())
    }

    async fn create_client(
        &self,
        config: ClientConfig,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn EncryptionClient>, InstanceCreationError>;
}

type PhaseListener = Arc<dyn Fn(CreationPhase) + Send + Sync>;

/// [`CryptoProvider`] that resolves the provider's chain, routes mock chains
/// to a local factory and everything else to the relayer factory.
pub struct FhevmCryptoProvider {
    relayer: Option<Arc<dyn ClientFactory>>,
    mock: Option<Arc<dyn ClientFactory>>,
    networks: BTreeMap<u64, RelayerNetworkConfig>,
    endpoints: HashMap<String, Arc<dyn Eip1193Provider>>,
    public_params: Option<PublicParamsCache>,
    phase_listener: Option<PhaseListener>,
}

impl Default for FhevmCryptoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FhevmCryptoProvider {
    pub fn new() -> Self {
        let mut networks = BTreeMap::new();
        let sepolia = RelayerNetworkConfig::sepolia();
        networks.insert(sepolia.chain_id, sepolia);

        Self {
            relayer: None,
            mock: None,
            networks,
            endpoints: HashMap::new(),
            public_params: None,
            phase_listener: None,
        }
    }

    pub fn with_relayer_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.relayer = Some(factory);
        self
    }

    pub fn with_mock_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.mock = Some(factory);
        self
    }

    pub fn with_network(mut self, network: RelayerNetworkConfig) -> Self {
        self.networks.insert(network.chain_id, network);
        self
    }

    pub fn with_public_params_cache(mut self, cache: PublicParamsCache) -> Self {
        self.public_params = Some(cache);
        self
    }

    pub fn with_phase_listener(mut self, listener: impl Fn(CreationPhase) + Send + Sync + 'static) -> Self {
        self.phase_listener = Some(Arc::new(listener));
        self
    }

    /// Routes an RPC URL to a specific provider instead of plain HTTP.
    pub fn register_endpoint(&mut self, url: &str, provider: Arc<dyn Eip1193Provider>) {
        self.endpoints.insert(url.trim_end_matches('/').to_owned(), provider);
    }

    fn endpoint(&self, url: &str) -> Arc<dyn Eip1193Provider> {
        let url = url.trim_end_matches('/');
        match self.endpoints.get(url) {
            Some(provider) => Arc::clone(provider),
            None => Arc::new(HttpRpcProvider::new(Some(url.to_owned()))),
        }
    }

    fn rpc_for(&self, provider: &WalletProvider) -> Arc<dyn Eip1193Provider> {
        match provider {
            WalletProvider::RpcUrl(url) => self.endpoint(url),
            WalletProvider::Injected(injected) => Arc::clone(injected),
        }
    }

    fn notify(&self, phase: CreationPhase) {
        debug!("encryption client creation phase: {:?}", phase);
        if let Some(listener) = &self.phase_listener {
            listener(phase);
        }
    }

    pub async fn resolve(
        &self,
        request: &CreateRequest,
        cancel: &CancellationToken,
    ) -> Result<ResolvedChain, InstanceCreationError> {
        let rpc = self.rpc_for(&request.provider);
        let chain_id = abortable(cancel, resolve::fetch_chain_id(rpc.as_ref())).await?;

        if let Some(expected) = request.chain_id {
            if expected != chain_id {
                warn!("provider reports chain {} but caller expected {}", chain_id, expected);
            }
        }

        Ok(resolve::classify(chain_id, request.provider.rpc_url(), &request.mock_chains))
    }

    async fn create_mock(
        &self,
        request: &CreateRequest,
        resolved: &ResolvedChain,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<dyn EncryptionClient>>, InstanceCreationError> {
        let Some(factory) = &self.mock else {
            return Ok(None);
        };

        // An injected provider is the node itself; only URL providers go
        // through the mock-chain map.
        let node = match (&request.provider, &resolved.rpc_url) {
            (WalletProvider::Injected(injected), _) => Arc::clone(injected),
            (WalletProvider::RpcUrl(_), Some(rpc_url)) => self.endpoint(rpc_url),
            (WalletProvider::RpcUrl(_), None) => return Ok(None),
        };
        let Some(metadata) = abortable(cancel, async { Ok(resolve::try_fetch_relayer_metadata(node.as_ref()).await) }).await?
        else {
            info!("chain {} is a mock chain but its node is not an FHEVM node", resolved.chain_id);
            return Ok(None);
        };

        self.notify(CreationPhase::Creating);
        let config = ClientConfig {
            chain_id: resolved.chain_id,
            provider: request.provider.clone(),
            rpc_url: resolved.rpc_url.clone(),
            network: None,
            relayer_metadata: Some(metadata),
            public_params: None,
        };
        let client = abortable(cancel, factory.create_client(config, cancel)).await?;
        Ok(Some(client))
    }

    async fn create_relayer(
        &self,
        request: &CreateRequest,
        resolved: &ResolvedChain,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn EncryptionClient>, InstanceCreationError> {
        let network = self
            .networks
            .get(&resolved.chain_id)
            .cloned()
            .ok_or(InstanceCreationError::UnsupportedChain(resolved.chain_id))?;

        let Some(factory) = &self.relayer else {
            return Err(InstanceCreationError::Factory(
                "no relayer client factory is configured".to_owned(),
            ));
        };

        self.notify(CreationPhase::SdkLoading);
        abortable(cancel, factory.load()).await?;
        self.notify(CreationPhase::SdkLoaded);

        self.notify(CreationPhase::SdkInitializing);
        abortable(cancel, factory.initialize()).await?;
        self.notify(CreationPhase::SdkInitialized);

        if !resolve::is_address(&network.acl_contract_address) {
            return Err(InstanceCreationError::InvalidAclAddress(network.acl_contract_address));
        }

        let cached = match &self.public_params {
            Some(cache) => cache.load(&network.acl_contract_address).await,
            None => None,
        };
        if cancel.is_cancelled() {
            return Err(InstanceCreationError::Aborted);
        }

        self.notify(CreationPhase::Creating);
        let acl_address = network.acl_contract_address.clone();
        let config = ClientConfig {
            chain_id: resolved.chain_id,
            provider: request.provider.clone(),
            rpc_url: resolved.rpc_url.clone(),
            network: Some(network),
            relayer_metadata: None,
            public_params: cached,
        };
        let client = abortable(cancel, factory.create_client(config, cancel)).await?;

        if let (Some(cache), Some(params)) = (&self.public_params, client.public_params()) {
            if let Err(err) = cache.store(&acl_address, &params).await {
                warn!("failed to cache public params for {}: {:#}", acl_address, err);
            }
        }

        if cancel.is_cancelled() {
            return Err(InstanceCreationError::Aborted);
        }
        Ok(client)
    }
}

#[async_trait]
impl CryptoProvider for FhevmCryptoProvider {
    async fn create(
        &self,
        request: CreateRequest,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn EncryptionClient>, InstanceCreationError> {
        if cancel.is_cancelled() {
            return Err(InstanceCreationError::Aborted);
        }

        let resolved = self.resolve(&request, &cancel).await?;
        debug!(
            "resolved provider to chain {} (mock: {}, rpc: {:?})",
            resolved.chain_id, resolved.is_mock, resolved.rpc_url
        );

        if resolved.is_mock {
            if let Some(client) = self.create_mock(&request, &resolved, &cancel).await? {
                return Ok(client);
            }
        }

        self.create_relayer(&request, &resolved, &cancel).await
    }
}

/// Races `future` against cancellation of `cancel`.
async fn abortable<T, F>(cancel: &CancellationToken, future: F) -> Result<T, InstanceCreationError>
where
    F: Future<Output = Result<T, InstanceCreationError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(InstanceCreationError::Aborted),
        outcome = future => outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ck_api_types::KeyPair;
    use ck_client::{ClientError, EncryptedInputBuilder, MockChains, UserDecryptParams};
    use ck_storage::{InMemoryStorage, SignatureStorage};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RelayerClient;

    #[async_trait]
    impl EncryptionClient for RelayerClient {
        fn chain_id(&self) -> u64 {
            11155111
        }

        fn verifying_contract(&self) -> &str {
            "0xb6E160B1ff80D67Bfe90A85eE06Ce0A2613607D1"
        }

        fn generate_keypair(&self) -> KeyPair {
            ck_crypto::generate_keypair()
        }

        fn create_encrypted_input(&self, _contract: &str, _user: &str) -> Box<dyn EncryptedInputBuilder> {
            unimplemented!("not exercised")
        }

        fn public_params(&self) -> Option<PublicParams> {
            Some(PublicParams {
                public_key_id: "sepolia-key".to_owned(),
                public_key: "0xaa".to_owned(),
                public_params: "0xbb".to_owned(),
            })
        }

        async fn user_decrypt(
            &self,
            _params: UserDecryptParams,
        ) -> Result<HashMap<String, ck_api_types::ClearValue>, ClientError> {
            Ok(HashMap::new())
        }
    }

    #[derive(Default)]
    struct RecordingRelayerFactory {
        created: AtomicUsize,
        seen_public_params: Mutex<Vec<Option<PublicParams>>>,
    }

    #[async_trait]
    impl ClientFactory for RecordingRelayerFactory {
        async fn create_client(
            &self,
            config: ClientConfig,
            _cancel: &CancellationToken,
        ) -> Result<Arc<dyn EncryptionClient>, InstanceCreationError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            self.seen_public_params
                .lock()
                .unwrap()
                .push(config.public_params.clone());
            Ok(Arc::new(RelayerClient))
        }
    }

    fn request(provider: WalletProvider) -> CreateRequest {
        CreateRequest {
            provider,
            chain_id: None,
            mock_chains: MockChains::new(),
        }
    }

    #[tokio::test]
    async fn hardhat_node_yields_mock_client() {
        let node = Arc::new(MockNode::new(31337));
        let provider = FhevmCryptoProvider::new()
            .with_mock_factory(Arc::new(MockClientFactory::new(Arc::new(MockCoprocessor::default()))));

        let client = provider
            .create(request(WalletProvider::Injected(node.clone())), CancellationToken::new())
            .await
            .expect("mock chain resolves");
        assert_eq!(client.chain_id(), 31337);
        assert_eq!(client.verifying_contract(), "0x5ffdaAB0373E62E2ea2944776209aEf29E631A64");
        // eth_chainId and the relayer metadata query both hit the injected node
        assert_eq!(node.request_count(), 2);
    }

    #[tokio::test]
    async fn injected_node_is_queried_even_with_a_mock_chain_override() {
        let node = Arc::new(MockNode::new(1337));
        let provider = FhevmCryptoProvider::new()
            .with_mock_factory(Arc::new(MockClientFactory::new(Arc::new(MockCoprocessor::default()))));

        let client = provider
            .create(
                CreateRequest {
                    provider: WalletProvider::Injected(node.clone()),
                    chain_id: Some(1337),
                    mock_chains: MockChains::from([(1337, "http://127.0.0.1:1".to_owned())]),
                },
                CancellationToken::new(),
            )
            .await
            .expect("injected dev node resolves without touching the map url");
        assert_eq!(client.chain_id(), 1337);
        assert_eq!(node.request_count(), 2);
    }

    #[tokio::test]
    async fn rpc_url_is_routed_through_registered_endpoint() {
        let node = Arc::new(MockNode::new(31337));
        let mut provider = FhevmCryptoProvider::new()
            .with_mock_factory(Arc::new(MockClientFactory::new(Arc::new(MockCoprocessor::default()))));
        provider.register_endpoint("http://localhost:8545/", node.clone());

        let client = provider
            .create(
                request(WalletProvider::RpcUrl("http://localhost:8545".to_owned())),
                CancellationToken::new(),
            )
            .await
            .expect("mock chain resolves");
        assert_eq!(client.chain_id(), 31337);
        assert_eq!(node.request_count(), 2);
    }

    #[tokio::test]
    async fn plain_dev_node_falls_through_to_relayer() {
        let node: Arc<dyn Eip1193Provider> = Arc::new(MockNode::without_relayer_metadata(31337));
        let provider = FhevmCryptoProvider::new()
            .with_mock_factory(Arc::new(MockClientFactory::new(Arc::new(MockCoprocessor::default()))));

        let err = provider
            .create(request(WalletProvider::Injected(node)), CancellationToken::new())
            .await
            .err()
            .expect("no relayer network for hardhat");
        assert_eq!(err, InstanceCreationError::UnsupportedChain(31337));
    }

    #[tokio::test]
    async fn relayer_path_reports_phases_and_caches_public_params() -> anyhow::Result<()> {
        let node: Arc<dyn Eip1193Provider> = Arc::new(MockNode::without_relayer_metadata(11155111));
        let storage = Arc::new(InMemoryStorage::default());
        let factory = Arc::new(RecordingRelayerFactory::default());
        let phases = Arc::new(Mutex::new(Vec::new()));
        let phases_seen = Arc::clone(&phases);

        let provider = FhevmCryptoProvider::new()
            .with_relayer_factory(factory.clone())
            .with_public_params_cache(PublicParamsCache::new(storage.clone()))
            .with_phase_listener(move |phase| phases_seen.lock().unwrap().push(phase));

        provider
            .create(request(WalletProvider::Injected(Arc::clone(&node))), CancellationToken::new())
            .await?;
        provider
            .create(request(WalletProvider::Injected(node)), CancellationToken::new())
            .await?;

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        let seen = factory.seen_public_params.lock().unwrap().clone();
        assert_eq!(seen[0], None);
        assert_eq!(seen[1].as_ref().map(|p| p.public_key_id.as_str()), Some("sepolia-key"));
        assert!(
            storage
                .get_item("fhevm-public-params:0x687820221192c5b662b25367f70076a37bc79b6c")
                .await?
                .is_some()
        );

        let phases = phases.lock().unwrap().clone();
        assert_eq!(
            &phases[..5],
            &[
                CreationPhase::SdkLoading,
                CreationPhase::SdkLoaded,
                CreationPhase::SdkInitializing,
                CreationPhase::SdkInitialized,
                CreationPhase::Creating,
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_any_request() {
        let node = Arc::new(MockNode::new(31337));
        let provider = FhevmCryptoProvider::new()
            .with_mock_factory(Arc::new(MockClientFactory::new(Arc::new(MockCoprocessor::default()))));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = provider
            .create(request(WalletProvider::Injected(node.clone())), cancel)
            .await
            .err()
            .expect("aborted");
        assert_eq!(err, InstanceCreationError::Aborted);
        assert_eq!(node.request_count(), 0);
    }
}
