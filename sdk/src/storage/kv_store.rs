use std::sync::Arc;

use alloy::{
    consensus::Blob,
    network::{TransactionBuilder, TransactionBuilder4844},
    primitives::{Address, B256, U256, keccak256},
};
use tracing::{debug, info};

use super::{error::StorageError, types::CostEstimate};
use crate::{
    crypto::CommitmentEngine,
    ethereum_l1::{
        EthereumL1,
        blob_tx_builder::{BlobTxBuilder, GAS_PER_BLOB, increase_by_percentage},
        config::EthStorageConfig,
        storage_contract::{AlloyKvContract, DecodeType, KvContract, put_blob_tx, put_blobs_tx},
        transaction_result::TransactionResult,
        tx_sender::TxSender,
    },
    metrics::Metrics,
    utils::{
        blob::{
            BlobEncoding,
            constants::{BLOB_SIZE, MAX_BLOBS_PER_TX},
        },
        retry::RetryPolicy,
    },
};

/// Single blob values stored under `keccak256(key)` for the signer.
pub struct KvStore {
    contract: Arc<dyn KvContract>,
    read_contract: Option<Arc<dyn KvContract>>,
    tx_sender: Arc<TxSender>,
    blob_tx_builder: Arc<BlobTxBuilder>,
    retry: RetryPolicy,
    encoding: BlobEncoding,
    gas_increase_pct: u64,
}

impl KvStore {
    pub fn new(
        contract: Arc<dyn KvContract>,
        tx_sender: Arc<TxSender>,
        blob_tx_builder: Arc<BlobTxBuilder>,
        retry: RetryPolicy,
        encoding: BlobEncoding,
    ) -> Self {
        Self {
            contract,
            read_contract: None,
            tx_sender,
            blob_tx_builder,
            retry,
            encoding,
            gas_increase_pct: 0,
        }
    }

    /// Serves reads from a different endpoint than writes.
    pub fn with_read_contract(mut self, contract: Arc<dyn KvContract>) -> Self {
        self.read_contract = Some(contract);
        self
    }

    pub fn with_gas_increase_pct(mut self, pct: u64) -> Self {
        self.gas_increase_pct = pct;
        self
    }

    /// Connects to the contract named in `config`, or the network's default one.
    pub async fn connect(config: &EthStorageConfig) -> Result<Self, StorageError> {
        let metrics = Arc::new(Metrics::new());
        let engine = Arc::new(CommitmentEngine::new(config.compute_mode));
        let l1 = EthereumL1::new(config, engine, metrics.clone()).await?;

        let address = config
            .ethstorage_address
            .or(l1.network.ethstorage_address)
            .ok_or_else(|| {
                StorageError::Validation(format!(
                    "no EthStorage contract known for {} (chain id {}), set ETHSTORAGE_ADDRESS",
                    l1.network.name, l1.network.chain_id
                ))
            })?;
        info!("Using EthStorage contract {} on {}", address, l1.network.name);

        let mut store = Self::new(
            Arc::new(AlloyKvContract::new(address, l1.provider.clone())),
            l1.tx_sender.clone(),
            l1.blob_tx_builder.clone(),
            config.retry_policy.clone().with_metrics(metrics),
            l1.network.encoding,
        )
        .with_gas_increase_pct(config.gas_increase_percentage);
        if let Some(provider) = l1.read_provider {
            store = store.with_read_contract(Arc::new(AlloyKvContract::new(address, provider)));
        }
        Ok(store)
    }

    pub fn content_key(key: &str) -> B256 {
        keccak256(key.as_bytes())
    }

    async fn upfront_payment(&self) -> Result<U256, StorageError> {
        let contract = &self.contract;
        Ok(self
            .retry
            .run("upfront_payment", move || contract.upfront_payment())
            .await?)
    }

    /// Encodes a value into the single blob it is stored in, returned on the heap.
    fn encode_value(&self, key: &str, data: &[u8]) -> Result<Vec<Blob>, StorageError> {
        if key.is_empty() {
            return Err(StorageError::Validation("key must not be empty".to_string()));
        }
        if data.is_empty() {
            return Err(StorageError::Validation(format!("no data to write for {key}")));
        }
        let max = self.encoding.max_payload();
        if data.len() > max {
            return Err(StorageError::Validation(format!(
                "{} byte(s) for {} exceed the single blob limit of {}",
                data.len(),
                key,
                max
            )));
        }
        let blobs = self.encoding.encode(data)?;
        if blobs.len() != 1 {
            return Err(StorageError::Validation(format!(
                "{} encoded into {} blobs instead of one",
                key,
                blobs.len()
            )));
        }
        Ok(blobs)
    }

    /// Stores `data` under `key` in one blob. A reverted transaction is reported through
    /// `success`, not as an error.
    pub async fn write(&self, key: &str, data: &[u8]) -> Result<TransactionResult, StorageError> {
        let blobs = self.encode_value(key, data)?;
        let value = self.upfront_payment().await?;

        let base_tx = put_blob_tx(
            self.contract.address(),
            Self::content_key(key),
            data.len() as u64,
            value,
        );
        let tx = self
            .blob_tx_builder
            .build_blob_tx(base_tx, blobs, None, self.gas_increase_pct)
            .await?;
        let tx_hash = self.tx_sender.send_tx_locked(tx, false).await?;
        let result = self.tx_sender.get_transaction_result(tx_hash).await?;
        info!(
            "Wrote {} byte(s) under {}, tx {} success: {}",
            data.len(),
            key,
            tx_hash,
            result.success
        );
        Ok(result)
    }

    /// Stores pre-encoded blobs, one per key, in a single transaction.
    pub async fn write_blobs(
        &self,
        keys: &[&str],
        blobs: Vec<Blob>,
    ) -> Result<TransactionResult, StorageError> {
        if keys.len() != blobs.len() {
            return Err(StorageError::Validation(format!(
                "{} key(s) for {} blob(s)",
                keys.len(),
                blobs.len()
            )));
        }
        if keys.is_empty() || keys.len() > MAX_BLOBS_PER_TX {
            return Err(StorageError::Validation(format!(
                "between 1 and {} blobs can be written at once, got {}",
                MAX_BLOBS_PER_TX,
                keys.len()
            )));
        }
        if keys.iter().any(|key| key.is_empty()) {
            return Err(StorageError::Validation("key must not be empty".to_string()));
        }

        let value = self.upfront_payment().await? * U256::from(keys.len());
        let content_keys: Vec<B256> = keys.iter().map(|key| Self::content_key(key)).collect();
        let lengths = vec![BLOB_SIZE as u64; keys.len()];
        let base_tx = put_blobs_tx(self.contract.address(), &content_keys, &lengths, value);
        let tx = self
            .blob_tx_builder
            .build_blob_tx(base_tx, blobs, None, self.gas_increase_pct)
            .await?;
        let tx_hash = self.tx_sender.send_tx_locked(tx, false).await?;
        let result = self.tx_sender.get_transaction_result(tx_hash).await?;
        info!(
            "Wrote {} blob(s), tx {} success: {}",
            keys.len(),
            tx_hash,
            result.success
        );
        Ok(result)
    }

    /// Reads the value the signer stored under `key`.
    pub async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let owner = self.tx_sender.signer_address()?;
        self.read_from(owner, key).await
    }

    pub async fn read_from(&self, owner: Address, key: &str) -> Result<Vec<u8>, StorageError> {
        let contract = self.read_contract.as_ref().unwrap_or(&self.contract);
        let content_key = Self::content_key(key);

        let size = self
            .retry
            .run("size", move || contract.size(owner, content_key))
            .await?;
        if size == 0 {
            return Err(StorageError::Validation(format!(
                "no data stored under {key} for {owner}"
            )));
        }

        let mut raw = self
            .retry
            .run("get", move || {
                contract.get(owner, content_key, DecodeType::RawData, 0, BLOB_SIZE as u64)
            })
            .await?;
        debug!("Fetched {} raw byte(s) for {}", raw.len(), key);
        raw.resize(BLOB_SIZE, 0);

        // legacy decoding drops trailing zeros, the stored size brings them back
        let size = usize::try_from(size)
            .unwrap_or(usize::MAX)
            .min(self.encoding.max_payload());
        let mut data = self.encoding.decode(&raw)?;
        data.resize(size, 0);
        Ok(data)
    }

    /// Prices a `write` of `data` under `key` without sending it.
    pub async fn estimate_cost(&self, key: &str, data: &[u8]) -> Result<CostEstimate, StorageError> {
        let blobs = self.encode_value(key, data)?;
        let storage_cost = self.upfront_payment().await?;

        let mut quote = put_blob_tx(
            self.contract.address(),
            Self::content_key(key),
            data.len() as u64,
            storage_cost,
        );
        self.blob_tx_builder
            .fill_execution_fees(&mut quote, self.gas_increase_pct)
            .await?;
        let max_fee_per_gas = U256::from(quote.max_fee_per_gas.unwrap_or_default());
        let blob_gas_price = increase_by_percentage(
            self.blob_tx_builder.blob_gas_price().await?,
            self.gas_increase_pct,
        );

        let commitments = self
            .blob_tx_builder
            .engine()
            .commit_batch(&blobs)
            .await
            .map_err(|e| StorageError::Commitment(e.to_string()))?;
        let mut tx = quote.with_max_fee_per_blob_gas(blob_gas_price);
        tx.blob_versioned_hashes = Some(
            commitments
                .iter()
                .map(CommitmentEngine::versioned_hash)
                .collect(),
        );
        if let Ok(from) = self.tx_sender.signer_address() {
            tx.set_from(from);
        }
        let gas = self.blob_tx_builder.estimate_gas(&tx).await?;

        Ok(CostEstimate {
            storage_cost,
            gas_cost: U256::from(gas) * max_fee_per_gas
                + U256::from(blob_gas_price) * U256::from(GAS_PER_BLOB),
        })
    }
}
