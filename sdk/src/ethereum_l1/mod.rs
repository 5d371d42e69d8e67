pub mod blob_tx_builder;
pub mod config;
pub mod execution_client;
pub mod l1_contracts_bindings;
pub mod storage_contract;
pub mod tools;
pub mod transaction_error;
pub mod transaction_result;
pub mod tx_sender;

use std::sync::Arc;

use alloy::providers::DynProvider;
use tracing::info;

use crate::{crypto::CommitmentEngine, metrics::Metrics, shared::alloy_tools};
use blob_tx_builder::BlobTxBuilder;
use config::{EthStorageConfig, Network};
use execution_client::{AlloyExecutionClient, ExecutionClient};
use tx_sender::TxSender;

/// Connections to the execution layer shared by the storage clients.
pub struct EthereumL1 {
    pub network: Network,
    pub execution: Arc<dyn ExecutionClient>,
    pub tx_sender: Arc<TxSender>,
    pub blob_tx_builder: Arc<BlobTxBuilder>,
    /// Provider for `rpc_url`, signing when a private key is configured.
    pub provider: DynProvider,
    /// Provider for the storage read endpoint, if one is configured.
    pub read_provider: Option<DynProvider>,
}

impl EthereumL1 {
    pub async fn new(
        config: &EthStorageConfig,
        engine: Arc<CommitmentEngine>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, anyhow::Error> {
        let (provider, signer_address) =
            alloy_tools::construct_alloy_provider(config.private_key.as_deref(), &config.rpc_url)
                .await?;
        let read_provider = match &config.ethstorage_rpc_url {
            Some(url) => Some(alloy_tools::construct_alloy_provider(None, url).await?.0),
            None => None,
        };

        let retry = config.retry_policy.clone().with_metrics(metrics.clone());
        let execution: Arc<dyn ExecutionClient> = Arc::new(AlloyExecutionClient::new(
            provider.clone(),
            signer_address,
            config.receipt_timeout,
        ));

        let client = &execution;
        let chain_id = retry.run("chain_id", move || client.chain_id()).await?;
        let network = Network::from_chain_id(chain_id);
        info!(
            "Connected to {} (chain id {}), signer: {:?}",
            network.name, chain_id, signer_address
        );

        Ok(Self {
            network,
            tx_sender: Arc::new(TxSender::new(execution.clone(), retry.clone(), metrics)),
            blob_tx_builder: Arc::new(BlobTxBuilder::new(execution.clone(), engine, retry)),
            execution,
            provider,
            read_provider,
        })
    }
}
