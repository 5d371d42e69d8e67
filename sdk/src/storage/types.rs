use alloy::primitives::{B256, U256};

use super::error::StorageError;

/// Capacity of the event channels returned by the orchestrators.
pub const EVENT_QUEUE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// One chunk per blob, up to three blobs per transaction.
    Blob,
    /// One chunk per transaction, carried in the input data.
    Calldata,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub key: String,
    pub content: Vec<u8>,
    pub mode: UploadMode,
    /// Overrides the configured gas increase percentage.
    pub gas_increase_pct: Option<u64>,
    /// Remote chunk hashes the caller already holds, saves one round trip.
    pub chunk_hashes: Option<Vec<B256>>,
    /// Read the signer's nonce right before each send and submit batches one at a time.
    pub confirm_nonce: bool,
}

impl UploadRequest {
    pub fn new(key: impl Into<String>, content: impl Into<Vec<u8>>, mode: UploadMode) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
            mode,
            gas_increase_pct: None,
            chunk_hashes: None,
            confirm_nonce: false,
        }
    }

    pub fn with_gas_increase_pct(mut self, pct: u64) -> Self {
        self.gas_increase_pct = Some(pct);
        self
    }

    pub fn with_chunk_hashes(mut self, hashes: Vec<B256>) -> Self {
        self.chunk_hashes = Some(hashes);
        self
    }

    pub fn with_confirm_nonce(mut self, confirm_nonce: bool) -> Self {
        self.confirm_nonce = confirm_nonce;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), StorageError> {
        if self.key.is_empty() {
            return Err(StorageError::Validation("key must not be empty".to_string()));
        }
        if self.content.is_empty() {
            return Err(StorageError::Validation(format!(
                "no content to upload for key {}",
                self.key
            )));
        }
        Ok(())
    }
}

/// Totals over the chunks actually written. Skipped chunks are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadResult {
    pub total_chunks: u64,
    pub total_bytes: u64,
    /// Storage payments plus fees paid, in wei.
    pub total_cost: U256,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CostEstimate {
    /// Value sent to the contract for storage.
    pub storage_cost: U256,
    pub gas_cost: U256,
}

impl CostEstimate {
    pub fn total(&self) -> U256 {
        self.storage_cost + self.gas_cost
    }
}

#[derive(Debug)]
pub enum UploadEvent {
    /// `index` is the last chunk id of the unit just settled, `total` the chunk count of the
    /// content. Delivered in ascending order.
    Progress { index: u64, total: u64, written: bool },
    Failed(StorageError),
    /// Always the last event of an upload.
    Finished(UploadResult),
}

#[derive(Debug)]
pub enum DownloadEvent {
    Chunk { index: u64, total: u64, data: Vec<u8> },
    Failed(StorageError),
    Finished,
}
