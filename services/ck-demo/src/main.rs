use anyhow::{Context, anyhow};
use ck_api_types::DecryptRequest;
use ck_client::{DEFAULT_MOCK_CHAIN_ID, DEFAULT_MOCK_CHAIN_RPC, EncryptionClient, WalletProvider};
use ck_crypto::{Ed25519Signer, SignerCapability};
use ck_fhevm::{FhevmCryptoProvider, MockClientFactory, MockCoprocessor, MockNode, PublicParamsCache};
use ck_session_core::{
    DecryptOutcome, DecryptionOrchestrator, DecryptionSignatureCache, EncryptionOrchestrator, InstanceLifecycle,
    LifecycleInput, LifecycleState, SessionConfig, parse_input_value,
};
use ck_storage::{InMemoryStorage, RocksDbStorage, SignatureStorage};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const COUNTER_CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SessionConfig::from_env()?;

    let storage: Arc<dyn SignatureStorage> = match &config.storage_path {
        Some(path) => {
            info!("persisting signatures in {}", path);
            Arc::new(RocksDbStorage::open_default(path)?)
        }
        None => Arc::new(InMemoryStorage::default()),
    };

    let rpc_url = config
        .mock_chains
        .get(&DEFAULT_MOCK_CHAIN_ID)
        .cloned()
        .unwrap_or_else(|| DEFAULT_MOCK_CHAIN_RPC.to_owned());

    let mut provider = FhevmCryptoProvider::new()
        .with_mock_factory(Arc::new(MockClientFactory::new(Arc::new(MockCoprocessor::default()))))
        .with_public_params_cache(PublicParamsCache::new(Arc::clone(&storage)))
        .with_phase_listener(|phase| info!("creation phase {:?}", phase));
    provider.register_endpoint(&rpc_url, Arc::new(MockNode::new(DEFAULT_MOCK_CHAIN_ID)));

    let lifecycle = InstanceLifecycle::new(Arc::new(provider));
    lifecycle.configure(
        LifecycleInput::new(Some(WalletProvider::RpcUrl(rpc_url.clone())), Some(DEFAULT_MOCK_CHAIN_ID))
            .with_mock_chains(config.mock_chains.clone()),
    );

    let client: Arc<dyn EncryptionClient> = match tokio::time::timeout(SETTLE_TIMEOUT, lifecycle.settled())
        .await
        .context("encryption client did not settle")?
    {
        LifecycleState::Ready(client) => client,
        LifecycleState::Error(err) => return Err(anyhow!("encryption client failed [{}]: {}", err.code(), err)),
        other => return Err(anyhow!("unexpected lifecycle state {:?}", other)),
    };
    info!("connected to chain {} via {}", client.chain_id(), rpc_url);

    let signer: Arc<dyn SignerCapability> = Arc::new(Ed25519Signer::new_random());
    info!("user {}", signer.address().await?);

    let count = parse_input_value("externalEuint32", "42")?;
    let flag = parse_input_value("externalEbool", "true")?;
    let input = EncryptionOrchestrator::encrypt(client.as_ref(), signer.as_ref(), COUNTER_CONTRACT, |builder| {
        builder.add(count);
        builder.add(flag);
    })
    .await?;
    info!("encrypted {} values, proof {}", input.handles.len(), input.input_proof);

    let requests: Vec<DecryptRequest> = input
        .handles
        .iter()
        .map(|handle| DecryptRequest::new(handle.clone(), COUNTER_CONTRACT))
        .collect();

    let cache = Arc::new(DecryptionSignatureCache::from_config(storage, &config));
    let orchestrator = DecryptionOrchestrator::new(cache);

    for round in 1..=2 {
        match orchestrator
            .decrypt(&requests, Some(&client), Some(&signer), Some(client.chain_id()))
            .await
        {
            DecryptOutcome::Completed(results) => {
                for request in &requests {
                    info!("round {}: {} = {:?}", round, request.handle, results.get(&request.handle));
                }
            }
            DecryptOutcome::Failed(err) => {
                return Err(anyhow!("decrypt failed [{}]: {}", err.code(), err));
            }
            outcome => info!("round {}: {:?}", round, outcome),
        }
    }

    lifecycle.teardown();
    Ok(())
}
