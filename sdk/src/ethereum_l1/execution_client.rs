use std::time::Duration;

use alloy::{
    eips::{BlockNumberOrTag, eip1559::Eip1559Estimation},
    primitives::{Address, B256},
    providers::{
        DynProvider, PendingTransactionBuilder, PendingTransactionError, Provider, WatchTxError,
    },
    rpc::types::TransactionRequest,
};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, warn};

use super::transaction_result::TxReceiptSummary;
use crate::utils::retry::{RpcErrorType, RpcFailure};

/// Raw execution layer calls. No retries happen at this level.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Account that signs outgoing transactions, `None` for a read-only client.
    fn signer_address(&self) -> Option<Address>;
    async fn chain_id(&self) -> Result<u64, RpcFailure>;
    /// Next nonce for `address`, counting transactions still in the mempool.
    async fn latest_nonce(&self, address: Address) -> Result<u64, RpcFailure>;
    async fn excess_blob_gas(&self) -> Result<u64, RpcFailure>;
    async fn estimate_eip1559_fees(&self) -> Result<Eip1559Estimation, RpcFailure>;
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, RpcFailure>;
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, RpcFailure>;
    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceiptSummary, RpcFailure>;
}

pub struct AlloyExecutionClient {
    provider: DynProvider,
    signer_address: Option<Address>,
    receipt_timeout: Duration,
}

impl AlloyExecutionClient {
    pub fn new(
        provider: DynProvider,
        signer_address: Option<Address>,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            signer_address,
            receipt_timeout,
        }
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }
}

fn pending_error(tx_hash: B256, err: PendingTransactionError) -> RpcFailure {
    match err {
        PendingTransactionError::TxWatcher(WatchTxError::Timeout) => RpcFailure::new(
            RpcErrorType::Timeout,
            format!("Timed out waiting for receipt of {tx_hash}"),
        ),
        PendingTransactionError::TransportError(e) => e.into(),
        other => RpcFailure::new(RpcErrorType::Unknown, other.to_string()),
    }
}

#[async_trait]
impl ExecutionClient for AlloyExecutionClient {
    fn signer_address(&self) -> Option<Address> {
        self.signer_address
    }

    async fn chain_id(&self) -> Result<u64, RpcFailure> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn latest_nonce(&self, address: Address) -> Result<u64, RpcFailure> {
        Ok(self.provider.get_transaction_count(address).pending().await?)
    }

    async fn excess_blob_gas(&self) -> Result<u64, RpcFailure> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| RpcFailure::new(RpcErrorType::Unknown, "Latest block not found"))?;
        // Pre-Cancun chains report no excess blob gas
        Ok(block.header.excess_blob_gas.unwrap_or_default())
    }

    async fn estimate_eip1559_fees(&self) -> Result<Eip1559Estimation, RpcFailure> {
        Ok(self.provider.estimate_eip1559_fees().await?)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, RpcFailure> {
        Ok(self.provider.estimate_gas(tx.clone()).await?)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, RpcFailure> {
        let pending = self.provider.send_transaction(tx).await?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceiptSummary, RpcFailure> {
        debug!("Waiting for receipt of {}", tx_hash);
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx_hash)
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| pending_error(tx_hash, e))?;

        if !receipt.status() {
            warn!("Transaction {} mined with failed status", tx_hash);
        }

        Ok(TxReceiptSummary {
            hash: tx_hash,
            success: receipt.status(),
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            blob_gas_used: receipt.blob_gas_used,
            blob_gas_price: receipt.blob_gas_price,
        })
    }
}
