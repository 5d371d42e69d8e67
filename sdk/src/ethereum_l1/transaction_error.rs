use alloy::primitives::B256;

use crate::utils::retry::RetryError;

#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("RPC failure: {0}")]
    Rpc(#[from] RetryError),
    #[error("Failed to build transaction: {0}")]
    BuildTransactionFailed(String),
    #[error("No signer configured, client is read-only")]
    ReadOnly,
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Transaction {0} reverted")]
    TransactionReverted(B256),
}
