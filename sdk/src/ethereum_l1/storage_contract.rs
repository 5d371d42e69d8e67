use alloy::{
    network::TransactionBuilder,
    primitives::{Address, B256, Bytes, U256},
    providers::DynProvider,
    rpc::types::TransactionRequest,
};
use async_trait::async_trait;

use super::l1_contracts_bindings::{
    IEthStorageKv,
    IFlatDirectory::{self, FileChunk},
};
use crate::utils::retry::RpcFailure;

/// How a key's chunks are stored, as recorded by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Nothing stored under the key yet.
    Undefined,
    Calldata,
    Blob,
}

impl TryFrom<u8> for StorageMode {
    type Error = RpcFailure;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StorageMode::Undefined),
            1 => Ok(StorageMode::Calldata),
            2 => Ok(StorageMode::Blob),
            other => Err(RpcFailure::client(format!("Unknown storage mode {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadInfo {
    pub mode: StorageMode,
    pub chunk_count: u64,
    pub cost_per_chunk: U256,
}

/// How the storage node should decode blob contents before returning them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DecodeType {
    RawData = 0,
    PaddingPer31Bytes = 1,
    OptimismCompact = 2,
}

/// Read side of the flat directory contract.
#[async_trait]
pub trait StorageContract: Send + Sync {
    fn address(&self) -> Address;
    async fn version(&self) -> Result<String, RpcFailure>;
    async fn is_support_blob(&self) -> Result<bool, RpcFailure>;
    async fn get_upload_info(&self, key: &[u8]) -> Result<UploadInfo, RpcFailure>;
    async fn get_chunk_count(&self, key: &[u8]) -> Result<u64, RpcFailure>;
    async fn get_chunk_hashes_batch(
        &self,
        key: &[u8],
        chunk_ids: &[u64],
    ) -> Result<Vec<B256>, RpcFailure>;
    async fn read_chunk(&self, key: &[u8], chunk_id: u64) -> Result<Vec<u8>, RpcFailure>;
}

/// Read side of the EthStorage key-value contract. Keys are scoped by `owner`.
#[async_trait]
pub trait KvContract: Send + Sync {
    fn address(&self) -> Address;
    async fn upfront_payment(&self) -> Result<U256, RpcFailure>;
    async fn size(&self, owner: Address, key: B256) -> Result<u64, RpcFailure>;
    async fn get(
        &self,
        owner: Address,
        key: B256,
        decode_type: DecodeType,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, RpcFailure>;
}

fn to_u64(value: U256, what: &str) -> Result<u64, RpcFailure> {
    u64::try_from(value).map_err(|_| RpcFailure::client(format!("{what} {value} exceeds u64")))
}

pub struct AlloyStorageContract {
    contract: IFlatDirectory::IFlatDirectoryInstance<DynProvider>,
}

impl AlloyStorageContract {
    pub fn new(address: Address, provider: DynProvider) -> Self {
        Self {
            contract: IFlatDirectory::new(address, provider),
        }
    }
}

#[async_trait]
impl StorageContract for AlloyStorageContract {
    fn address(&self) -> Address {
        *self.contract.address()
    }

    async fn version(&self) -> Result<String, RpcFailure> {
        Ok(self.contract.version().call().await?)
    }

    async fn is_support_blob(&self) -> Result<bool, RpcFailure> {
        Ok(self.contract.isSupportBlob().call().await?)
    }

    async fn get_upload_info(&self, key: &[u8]) -> Result<UploadInfo, RpcFailure> {
        let info = self
            .contract
            .getUploadInfo(Bytes::copy_from_slice(key))
            .call()
            .await?;
        Ok(UploadInfo {
            mode: StorageMode::try_from(info.mode)?,
            chunk_count: to_u64(info.chunkCount, "chunk count")?,
            cost_per_chunk: info.storageCost,
        })
    }

    async fn get_chunk_count(&self, key: &[u8]) -> Result<u64, RpcFailure> {
        let count = self
            .contract
            .countChunks(Bytes::copy_from_slice(key))
            .call()
            .await?;
        to_u64(count, "chunk count")
    }

    async fn get_chunk_hashes_batch(
        &self,
        key: &[u8],
        chunk_ids: &[u64],
    ) -> Result<Vec<B256>, RpcFailure> {
        let file_chunk = FileChunk {
            name: Bytes::copy_from_slice(key),
            chunkIds: chunk_ids.iter().map(|id| U256::from(*id)).collect(),
        };
        Ok(self
            .contract
            .getChunkHashesBatch(vec![file_chunk])
            .call()
            .await?)
    }

    async fn read_chunk(&self, key: &[u8], chunk_id: u64) -> Result<Vec<u8>, RpcFailure> {
        let chunk = self
            .contract
            .readChunk(Bytes::copy_from_slice(key), U256::from(chunk_id))
            .call()
            .await?;
        Ok(chunk.data.to_vec())
    }
}

pub struct AlloyKvContract {
    contract: IEthStorageKv::IEthStorageKvInstance<DynProvider>,
}

impl AlloyKvContract {
    pub fn new(address: Address, provider: DynProvider) -> Self {
        Self {
            contract: IEthStorageKv::new(address, provider),
        }
    }
}

#[async_trait]
impl KvContract for AlloyKvContract {
    fn address(&self) -> Address {
        *self.contract.address()
    }

    async fn upfront_payment(&self) -> Result<U256, RpcFailure> {
        Ok(self.contract.upfrontPayment().call().await?)
    }

    async fn size(&self, owner: Address, key: B256) -> Result<u64, RpcFailure> {
        let size = self.contract.size(key).from(owner).call().await?;
        to_u64(size, "blob size")
    }

    async fn get(
        &self,
        owner: Address,
        key: B256,
        decode_type: DecodeType,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, RpcFailure> {
        let data = self
            .contract
            .get(key, decode_type as u8, U256::from(offset), U256::from(len))
            .from(owner)
            .call()
            .await?;
        Ok(data.to_vec())
    }
}

fn to_u256(values: &[u64]) -> Vec<U256> {
    values.iter().map(|value| U256::from(*value)).collect()
}

pub fn write_chunks_by_blobs_tx(
    contract: Address,
    key: &[u8],
    chunk_ids: &[u64],
    sizes: &[u64],
    value: U256,
) -> TransactionRequest {
    TransactionRequest::default()
        .with_to(contract)
        .with_value(value)
        .with_call(&IFlatDirectory::writeChunksByBlobsCall {
            name: Bytes::copy_from_slice(key),
            chunkIds: to_u256(chunk_ids),
            sizes: to_u256(sizes),
        })
}

pub fn write_chunk_by_calldata_tx(
    contract: Address,
    key: &[u8],
    chunk_id: u64,
    data: &[u8],
    value: U256,
) -> TransactionRequest {
    TransactionRequest::default()
        .with_to(contract)
        .with_value(value)
        .with_call(&IFlatDirectory::writeChunkByCalldataCall {
            name: Bytes::copy_from_slice(key),
            chunkId: U256::from(chunk_id),
            data: Bytes::copy_from_slice(data),
        })
}

pub fn truncate_tx(contract: Address, key: &[u8], chunk_count: u64) -> TransactionRequest {
    TransactionRequest::default()
        .with_to(contract)
        .with_call(&IFlatDirectory::truncateCall {
            name: Bytes::copy_from_slice(key),
            chunkId: U256::from(chunk_count),
        })
}

pub fn remove_tx(contract: Address, key: &[u8]) -> TransactionRequest {
    TransactionRequest::default()
        .with_to(contract)
        .with_call(&IFlatDirectory::removeCall {
            name: Bytes::copy_from_slice(key),
        })
}

pub fn put_blob_tx(contract: Address, key: B256, length: u64, value: U256) -> TransactionRequest {
    TransactionRequest::default()
        .with_to(contract)
        .with_value(value)
        .with_call(&IEthStorageKv::putBlobCall {
            key,
            blobIdx: U256::ZERO,
            length: U256::from(length),
        })
}

pub fn put_blobs_tx(
    contract: Address,
    keys: &[B256],
    lengths: &[u64],
    value: U256,
) -> TransactionRequest {
    TransactionRequest::default()
        .with_to(contract)
        .with_value(value)
        .with_call(&IEthStorageKv::putBlobsCall {
            keys: keys.to_vec(),
            blobIdxs: (0..keys.len() as u64).map(U256::from).collect(),
            lengths: to_u256(lengths),
        })
}
