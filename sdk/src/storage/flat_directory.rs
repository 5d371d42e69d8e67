use std::sync::Arc;

use alloy::primitives::{Address, B256};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{
    diff::fetch_remote_state,
    download::DownloadOrchestrator,
    error::StorageError,
    types::{CostEstimate, DownloadEvent, UploadEvent, UploadRequest},
    upload::{UploadOrchestrator, UploadSettings},
};
use crate::{
    crypto::CommitmentEngine,
    ethereum_l1::{
        EthereumL1,
        blob_tx_builder::BlobTxBuilder,
        config::{EthStorageConfig, Network},
        storage_contract::{AlloyStorageContract, StorageContract, remove_tx},
        transaction_result::TransactionResult,
        tx_sender::TxSender,
    },
    metrics::Metrics,
    utils::retry::RetryPolicy,
};

/// Major version of the flat directory contract interface this client speaks.
pub const SUPPORTED_MAJOR_VERSION: u64 = 1;

/// Accepts `1.x.y`, with or without a leading `v`.
pub fn check_contract_version(version: &str) -> Result<(), StorageError> {
    let major = version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .next()
        .and_then(|major| major.parse::<u64>().ok());
    if major == Some(SUPPORTED_MAJOR_VERSION) {
        return Ok(());
    }
    Err(StorageError::Capability(format!(
        "flat directory contract version {version:?} is not supported, expected {SUPPORTED_MAJOR_VERSION}.x"
    )))
}

/// Client for one flat directory contract: chunked uploads with change detection, ordered
/// downloads and key removal.
pub struct FlatDirectory {
    network: Network,
    version: String,
    supports_blob: bool,
    contract: Arc<dyn StorageContract>,
    read_contract: Arc<dyn StorageContract>,
    tx_sender: Arc<TxSender>,
    engine: Arc<CommitmentEngine>,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
    uploader: Arc<UploadOrchestrator>,
    downloader: Arc<DownloadOrchestrator>,
}

impl FlatDirectory {
    /// Connects to the directory at `config.flat_directory_address`.
    pub async fn new(config: &EthStorageConfig) -> Result<Self, StorageError> {
        let address = config.flat_directory_address.ok_or_else(|| {
            StorageError::Validation(
                "a flat directory address is required, set FLAT_DIRECTORY_ADDRESS".to_string(),
            )
        })?;

        let metrics = Arc::new(Metrics::new());
        let engine = Arc::new(CommitmentEngine::new(config.compute_mode));
        let l1 = EthereumL1::new(config, engine, metrics.clone()).await?;

        let contract: Arc<dyn StorageContract> =
            Arc::new(AlloyStorageContract::new(address, l1.provider.clone()));
        let read_contract: Arc<dyn StorageContract> = match l1.read_provider {
            Some(provider) => Arc::new(AlloyStorageContract::new(address, provider)),
            None => {
                warn!("No EthStorage RPC configured, blob contents may not be readable");
                contract.clone()
            }
        };

        Self::with_clients(
            config,
            l1.network,
            contract,
            read_contract,
            l1.tx_sender,
            l1.blob_tx_builder,
            metrics,
        )
        .await
    }

    /// Assembles a directory from already connected clients. Reads the contract version, which
    /// must be supported, and whether it accepts blobs.
    pub async fn with_clients(
        config: &EthStorageConfig,
        network: Network,
        contract: Arc<dyn StorageContract>,
        read_contract: Arc<dyn StorageContract>,
        tx_sender: Arc<TxSender>,
        blob_tx_builder: Arc<BlobTxBuilder>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, StorageError> {
        let retry = config.retry_policy.clone().with_metrics(metrics.clone());

        let client = &contract;
        let version = retry.run("version", move || client.version()).await?;
        check_contract_version(&version)?;
        let supports_blob = retry
            .run("is_support_blob", move || client.is_support_blob())
            .await?;
        info!(
            "📂 Flat directory {} on {}, version {}, blobs supported: {}",
            contract.address(),
            network.name,
            version,
            supports_blob
        );

        let uploader = Arc::new(UploadOrchestrator::new(
            contract.clone(),
            tx_sender.clone(),
            blob_tx_builder.clone(),
            retry.clone(),
            metrics.clone(),
            UploadSettings {
                encoding: network.encoding,
                calldata_fee: network.calldata_fee,
                concurrency: config.upload_concurrency,
                gas_increase_pct: config.gas_increase_percentage,
            },
        ));
        let downloader = Arc::new(DownloadOrchestrator::new(
            read_contract.clone(),
            retry.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            network,
            version,
            supports_blob,
            contract,
            read_contract,
            tx_sender,
            engine: blob_tx_builder.engine().clone(),
            retry,
            metrics,
            uploader,
            downloader,
        })
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn supports_blob(&self) -> bool {
        self.supports_blob
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn upload(&self, request: UploadRequest) -> mpsc::Receiver<UploadEvent> {
        self.uploader.upload(request)
    }

    pub async fn estimate_cost(&self, request: &UploadRequest) -> Result<CostEstimate, StorageError> {
        self.uploader.estimate_cost(request).await
    }

    pub fn download(&self, key: impl Into<String>) -> mpsc::Receiver<DownloadEvent> {
        self.downloader.download(key)
    }

    pub async fn download_to_vec(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.downloader.download_to_vec(key).await
    }

    /// Chunk hashes currently recorded for `key`. Can be handed back to an upload through
    /// [`UploadRequest::with_chunk_hashes`].
    pub async fn fetch_hashes(&self, key: &str) -> Result<Vec<B256>, StorageError> {
        if key.is_empty() {
            return Err(StorageError::Validation("key must not be empty".to_string()));
        }
        let contract = &self.read_contract;
        let name = key.as_bytes();
        let chunk_count = self
            .retry
            .run("get_chunk_count", move || contract.get_chunk_count(name))
            .await?;
        Ok(fetch_remote_state(self.read_contract.as_ref(), &self.retry, name, chunk_count).await?)
    }

    /// Deletes every chunk stored under `key`.
    pub async fn remove(&self, key: &str) -> Result<TransactionResult, StorageError> {
        if key.is_empty() {
            return Err(StorageError::Validation("key must not be empty".to_string()));
        }
        let tx = remove_tx(self.contract.address(), key.as_bytes());
        let tx_hash = self.tx_sender.send_tx_locked(tx, false).await?;
        let result = self.tx_sender.get_transaction_result(tx_hash).await?;
        if result.success {
            info!("🗑️ Removed {}", key);
        }
        Ok(result)
    }

    /// Releases the commitment backend. Later uploads load it again.
    pub async fn close(&self) {
        self.engine.close().await;
    }
}
