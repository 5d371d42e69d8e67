use alloy::primitives::{B256, U256};

/// Receipt fields the sender needs, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceiptSummary {
    pub hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub blob_gas_used: Option<u64>,
    pub blob_gas_price: Option<u128>,
}

impl TxReceiptSummary {
    /// Execution gas plus blob gas actually paid.
    pub fn total_cost(&self) -> U256 {
        let execution = U256::from(self.gas_used) * U256::from(self.effective_gas_price);
        let blob = match (self.blob_gas_used, self.blob_gas_price) {
            (Some(used), Some(price)) => U256::from(used) * U256::from(price),
            _ => U256::ZERO,
        };
        execution + blob
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionResult {
    pub hash: B256,
    pub cost: U256,
    pub success: bool,
}
