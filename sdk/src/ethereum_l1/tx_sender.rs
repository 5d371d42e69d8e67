use std::sync::Arc;

use alloy::{
    network::TransactionBuilder,
    primitives::{Address, B256},
    rpc::types::TransactionRequest,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::{
    execution_client::ExecutionClient, tools, transaction_error::TransactionError,
    transaction_result::TransactionResult,
};
use crate::{metrics::Metrics, utils::retry::RetryPolicy};

/// Submits transactions for the client's signer.
///
/// Callers that prepare transactions concurrently should go through
/// [`TxSender::send_tx_locked`]: the lock covers reading the nonce and handing the transaction
/// to the node, so two sends never share a nonce.
pub struct TxSender {
    client: Arc<dyn ExecutionClient>,
    retry: RetryPolicy,
    nonce_lock: Mutex<()>,
    metrics: Arc<Metrics>,
}

impl TxSender {
    pub fn new(client: Arc<dyn ExecutionClient>, retry: RetryPolicy, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            retry,
            nonce_lock: Mutex::new(()),
            metrics,
        }
    }

    pub fn signer_address(&self) -> Result<Address, TransactionError> {
        self.client
            .signer_address()
            .ok_or(TransactionError::ReadOnly)
    }

    /// Sends without serialization. The nonce is whatever `tx` carries or the node assigns.
    pub async fn send_tx(&self, mut tx: TransactionRequest) -> Result<B256, TransactionError> {
        tx.set_from(self.signer_address()?);
        self.submit(tx).await
    }

    /// Sends while holding the nonce lock. With `confirm_nonce` the signer's nonce is read
    /// inside the lock, right before submission.
    pub async fn send_tx_locked(
        &self,
        mut tx: TransactionRequest,
        confirm_nonce: bool,
    ) -> Result<B256, TransactionError> {
        let from = self.signer_address()?;
        tx.set_from(from);

        let _guard = self.nonce_lock.lock().await;
        if confirm_nonce {
            let client = &self.client;
            let nonce = self
                .retry
                .run("latest_nonce", move || client.latest_nonce(from))
                .await?;
            debug!("Confirmed nonce {} for {}", nonce, from);
            tx.set_nonce(nonce);
        }
        self.submit(tx).await
    }

    async fn submit(&self, tx: TransactionRequest) -> Result<B256, TransactionError> {
        let nonce = tx.nonce;
        let client = &self.client;
        let result = self
            .retry
            .run("send_transaction", move || client.send_transaction(tx.clone()))
            .await;

        match result {
            Ok(tx_hash) => {
                self.metrics.inc_tx_sent();
                info!("🟢 Send tx {} nonce: {:?}", tx_hash, nonce);
                Ok(tx_hash)
            }
            Err(err) => {
                self.metrics.inc_tx_failed();
                error!("⛔ Failed to send transaction with nonce {:?}: {}", nonce, err);
                if tools::check_for_insufficient_funds(&err.source.message) {
                    return Err(TransactionError::InsufficientFunds(err.source.message));
                }
                Err(err.into())
            }
        }
    }

    /// Waits for `tx_hash` to be mined and reports what it cost and whether it succeeded.
    pub async fn get_transaction_result(
        &self,
        tx_hash: B256,
    ) -> Result<TransactionResult, TransactionError> {
        let client = &self.client;
        let receipt = self
            .retry
            .run("wait_for_receipt", move || client.wait_for_receipt(tx_hash))
            .await?;
        let cost = receipt.total_cost();

        if receipt.success {
            info!(
                "✅ Transaction {} confirmed in block {:?}, cost {} wei",
                tx_hash, receipt.block_number, cost
            );
            self.metrics.observe_tx_cost(cost);
        } else {
            error!(
                "⛔ Transaction {} failed in block {:?}",
                tx_hash, receipt.block_number
            );
            self.metrics.inc_tx_failed();
        }

        Ok(TransactionResult {
            hash: tx_hash,
            cost,
            success: receipt.success,
        })
    }

    /// Sends and waits for the receipt; a reverted transaction becomes an error.
    pub async fn send_and_confirm(
        &self,
        tx: TransactionRequest,
        confirm_nonce: bool,
    ) -> Result<TransactionResult, TransactionError> {
        let tx_hash = if confirm_nonce {
            self.send_tx_locked(tx, true).await?
        } else {
            self.send_tx(tx).await?
        };
        let result = self.get_transaction_result(tx_hash).await?;
        if !result.success {
            return Err(TransactionError::TransactionReverted(tx_hash));
        }
        Ok(result)
    }
}
