use alloy::primitives::B256;

use crate::{
    ethereum_l1::transaction_error::TransactionError,
    utils::{blob::BlobError, retry::RetryError},
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Not supported by the storage contract: {0}")]
    Capability(String),
    #[error(transparent)]
    Rpc(#[from] RetryError),
    #[error(transparent)]
    Transaction(TransactionError),
    #[error("Transaction {hash} failed on chain")]
    TransactionFailed { hash: B256 },
    #[error("Blob codec error: {0}")]
    Codec(#[from] BlobError),
    #[error("Commitment computation failed: {0}")]
    Commitment(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<TransactionError> for StorageError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Rpc(err) => StorageError::Rpc(err),
            TransactionError::TransactionReverted(hash) => StorageError::TransactionFailed { hash },
            other => StorageError::Transaction(other),
        }
    }
}
