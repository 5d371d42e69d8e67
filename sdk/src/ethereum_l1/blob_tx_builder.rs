use std::sync::Arc;

use alloy::{
    consensus::{Blob, BlobTransactionSidecar},
    eips::{eip1559::Eip1559Estimation, eip4844::Bytes48},
    network::{TransactionBuilder, TransactionBuilder4844},
    primitives::U256,
    rpc::types::TransactionRequest,
};
use tracing::debug;

use super::{execution_client::ExecutionClient, transaction_error::TransactionError};
use crate::{crypto::CommitmentEngine, utils::retry::RetryPolicy};

/// Gas consumption of a single data blob (== blob byte size)
pub const GAS_PER_BLOB: u64 = 1 << 17;
/// Min blob gas price
pub const MIN_BLOB_GASPRICE: u64 = 1;
/// Controls the maximum rate of change for blob gas price
pub const BLOB_BASE_FEE_UPDATE_FRACTION: u64 = 3_338_477;

/// Approximates `factor * e ** (numerator / denominator)` using Taylor expansion.
pub fn fake_exponential(factor: U256, numerator: U256, denominator: U256) -> U256 {
    if denominator.is_zero() {
        return U256::ZERO;
    }
    let mut i = U256::from(1);
    let mut output = U256::ZERO;
    let mut numerator_accum = factor.saturating_mul(denominator);
    while !numerator_accum.is_zero() {
        output = output.saturating_add(numerator_accum);
        numerator_accum =
            numerator_accum.saturating_mul(numerator) / denominator.saturating_mul(i);
        i += U256::from(1);
    }
    output / denominator
}

/// Blob base fee for the given excess blob gas.
pub fn blob_base_fee(excess_blob_gas: u64) -> U256 {
    fake_exponential(
        U256::from(MIN_BLOB_GASPRICE),
        U256::from(excess_blob_gas),
        U256::from(BLOB_BASE_FEE_UPDATE_FRACTION),
    )
}

pub(crate) fn increase_by_percentage(value: u128, percentage: u64) -> u128 {
    value.saturating_mul(100 + u128::from(percentage)) / 100
}

fn to_u128(value: U256) -> u128 {
    u128::try_from(value).unwrap_or(u128::MAX)
}

/// Builds EIP-4844 transactions around pre-encoded blobs.
pub struct BlobTxBuilder {
    client: Arc<dyn ExecutionClient>,
    engine: Arc<CommitmentEngine>,
    retry: RetryPolicy,
}

impl BlobTxBuilder {
    pub fn new(
        client: Arc<dyn ExecutionClient>,
        engine: Arc<CommitmentEngine>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            engine,
            retry,
        }
    }

    pub fn engine(&self) -> &Arc<CommitmentEngine> {
        &self.engine
    }

    /// Current blob gas price with a 10% margin.
    pub async fn blob_gas_price(&self) -> Result<u128, TransactionError> {
        let client = &self.client;
        let excess_blob_gas = self
            .retry
            .run("excess_blob_gas", move || client.excess_blob_gas())
            .await?;
        let price = blob_base_fee(excess_blob_gas);
        Ok(to_u128(price.saturating_mul(U256::from(11)) / U256::from(10)))
    }

    pub async fn gas_fees(&self) -> Result<Eip1559Estimation, TransactionError> {
        let client = &self.client;
        Ok(self
            .retry
            .run("estimate_eip1559_fees", move || client.estimate_eip1559_fees())
            .await?)
    }

    pub async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, TransactionError> {
        let client = &self.client;
        Ok(self
            .retry
            .run("estimate_gas", move || client.estimate_gas(tx))
            .await?)
    }

    /// Fills unset EIP-1559 fee caps from the node's estimate, then raises both caps by
    /// `gas_increase_pct` percent.
    pub async fn fill_execution_fees(
        &self,
        tx: &mut TransactionRequest,
        gas_increase_pct: u64,
    ) -> Result<(), TransactionError> {
        if tx.max_fee_per_gas.is_none() || tx.max_priority_fee_per_gas.is_none() {
            let fees = self.gas_fees().await?;
            if tx.max_fee_per_gas.is_none() {
                tx.set_max_fee_per_gas(fees.max_fee_per_gas);
            }
            if tx.max_priority_fee_per_gas.is_none() {
                tx.set_max_priority_fee_per_gas(fees.max_priority_fee_per_gas);
            }
        }
        if gas_increase_pct > 0 {
            if let Some(fee) = tx.max_fee_per_gas {
                tx.set_max_fee_per_gas(increase_by_percentage(fee, gas_increase_pct));
            }
            if let Some(fee) = tx.max_priority_fee_per_gas {
                tx.set_max_priority_fee_per_gas(increase_by_percentage(fee, gas_increase_pct));
            }
        }
        Ok(())
    }

    /// Attaches `blobs` to `base_tx` with commitments, proofs and versioned hashes.
    ///
    /// `commitments` are reused when they match `blobs` one to one, otherwise recomputed.
    /// Proofs are always computed. Unset execution fees come from the node's EIP-1559 estimate;
    /// an unset blob fee comes from the blob fee curve. A non-zero `gas_increase_pct` scales
    /// all three fee caps.
    pub async fn build_blob_tx(
        &self,
        base_tx: TransactionRequest,
        blobs: Vec<Blob>,
        commitments: Option<Vec<Bytes48>>,
        gas_increase_pct: u64,
    ) -> Result<TransactionRequest, TransactionError> {
        if blobs.is_empty() {
            return Err(TransactionError::BuildTransactionFailed(
                "blob transaction without blobs".to_string(),
            ));
        }

        let commitments = match commitments {
            Some(commitments) if commitments.len() == blobs.len() => commitments,
            _ => self
                .engine
                .commit_batch(&blobs)
                .await
                .map_err(|e| TransactionError::BuildTransactionFailed(e.to_string()))?,
        };
        let proofs = self
            .engine
            .prove_batch(&blobs, &commitments)
            .await
            .map_err(|e| TransactionError::BuildTransactionFailed(e.to_string()))?;
        let versioned_hashes = commitments
            .iter()
            .map(CommitmentEngine::versioned_hash)
            .collect::<Vec<_>>();

        let mut tx = base_tx;
        self.fill_execution_fees(&mut tx, gas_increase_pct).await?;
        if tx.max_fee_per_blob_gas.is_none() {
            let blob_gas_price = self.blob_gas_price().await?;
            tx.set_max_fee_per_blob_gas(blob_gas_price);
        }
        if gas_increase_pct > 0 {
            if let Some(fee) = tx.max_fee_per_blob_gas {
                tx.set_max_fee_per_blob_gas(increase_by_percentage(fee, gas_increase_pct));
            }
        }

        let blob_count = blobs.len();
        let sidecar = BlobTransactionSidecar::new(blobs, commitments, proofs);
        let mut tx = tx.with_blob_sidecar(sidecar);
        tx.blob_versioned_hashes = Some(versioned_hashes);

        debug!(
            "Built blob tx with {} blob(s), max_fee_per_gas: {:?}, max_priority_fee_per_gas: {:?}, max_fee_per_blob_gas: {:?}",
            blob_count, tx.max_fee_per_gas, tx.max_priority_fee_per_gas, tx.max_fee_per_blob_gas
        );

        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::ComputeMode,
        ethereum_l1::execution_client::MockExecutionClient,
        test_utils::{fake_commitment, fake_engine},
        utils::blob::zeroed_blobs,
    };
    use proptest::prelude::*;

    fn builder(client: MockExecutionClient) -> BlobTxBuilder {
        BlobTxBuilder::new(
            Arc::new(client),
            Arc::new(fake_engine(ComputeMode::InProcess)),
            RetryPolicy::default(),
        )
    }

    /// Node quoting fixed EIP-1559 fees and excess blob gas, each read at most once.
    fn quoting_client(fees: Eip1559Estimation, excess_blob_gas: u64) -> MockExecutionClient {
        let mut client = MockExecutionClient::new();
        client
            .expect_estimate_eip1559_fees()
            .times(..=1)
            .returning(move || Ok(fees));
        client
            .expect_excess_blob_gas()
            .times(..=1)
            .returning(move || Ok(excess_blob_gas));
        client
    }

    fn blobs(bytes: &[u8]) -> Vec<Blob> {
        let mut blobs = zeroed_blobs(bytes.len());
        for (blob, byte) in blobs.iter_mut().zip(bytes) {
            blob[1..49].fill(*byte);
        }
        blobs
    }

    #[test]
    fn test_fake_exponential_known_values() {
        let one = U256::from(1);
        let d = U256::from(BLOB_BASE_FEE_UPDATE_FRACTION);
        assert_eq!(fake_exponential(one, U256::ZERO, d), one);
        assert_eq!(fake_exponential(one, U256::from(2), U256::from(5)), one);
        assert_eq!(
            fake_exponential(U256::from(38493), U256::ZERO, U256::from(1000)),
            U256::from(38493)
        );
        assert_eq!(fake_exponential(one, U256::from(5), U256::from(2)), U256::from(11));
        assert_eq!(blob_base_fee(10_000_000), U256::from(19));
    }

    proptest! {
        #[test]
        fn fee_curve_is_monotonic(a in 0u64..100_000_000, b in 0u64..100_000_000) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(blob_base_fee(low) <= blob_base_fee(high));
        }
    }

    #[test]
    fn test_increase_by_percentage() {
        assert_eq!(increase_by_percentage(100, 0), 100);
        assert_eq!(increase_by_percentage(100, 25), 125);
        assert_eq!(increase_by_percentage(u128::MAX, 10), u128::MAX / 100);
    }

    #[tokio::test]
    async fn test_build_blob_tx_fills_fees_and_hashes() {
        let fees = Eip1559Estimation {
            max_fee_per_gas: 2_000,
            max_priority_fee_per_gas: 100,
        };
        let builder = builder(quoting_client(fees, 10_000_000));

        let blobs = blobs(&[1, 2]);
        let tx = builder
            .build_blob_tx(TransactionRequest::default(), blobs.clone(), None, 0)
            .await
            .unwrap();

        assert_eq!(tx.max_fee_per_gas, Some(2_000));
        assert_eq!(tx.max_priority_fee_per_gas, Some(100));
        // base fee 19 plus the 10% margin, rounded down
        assert_eq!(tx.max_fee_per_blob_gas, Some(20));

        let hashes = tx.blob_versioned_hashes.clone().unwrap();
        assert_eq!(hashes.len(), 2);
        let expected = CommitmentEngine::versioned_hash(&fake_commitment(&blobs[1]));
        assert_eq!(hashes[1], expected);
    }

    #[tokio::test]
    async fn test_build_blob_tx_scales_fees() {
        // every fee is preset, so the node is never asked
        let builder = builder(MockExecutionClient::new());

        let base = TransactionRequest::default()
            .with_max_fee_per_gas(1_000)
            .with_max_priority_fee_per_gas(10)
            .with_max_fee_per_blob_gas(50);
        let tx = builder
            .build_blob_tx(base, blobs(&[3]), None, 20)
            .await
            .unwrap();

        assert_eq!(tx.max_fee_per_gas, Some(1_200));
        assert_eq!(tx.max_priority_fee_per_gas, Some(12));
        assert_eq!(tx.max_fee_per_blob_gas, Some(60));
    }

    #[tokio::test]
    async fn test_mismatched_commitments_are_recomputed() {
        let fees = Eip1559Estimation {
            max_fee_per_gas: 20,
            max_priority_fee_per_gas: 2,
        };
        let builder = builder(quoting_client(fees, 0));

        let wrong = vec![Bytes48::repeat_byte(9)];
        let blobs = blobs(&[4, 5]);
        let tx = builder
            .build_blob_tx(TransactionRequest::default(), blobs.clone(), Some(wrong), 0)
            .await
            .unwrap();
        let hashes = tx.blob_versioned_hashes.unwrap();
        assert_eq!(
            hashes[0],
            CommitmentEngine::versioned_hash(&fake_commitment(&blobs[0]))
        );
    }

    #[tokio::test]
    async fn test_rejects_empty_blobs() {
        let builder = builder(MockExecutionClient::new());
        let err = builder
            .build_blob_tx(TransactionRequest::default(), vec![], None, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::BuildTransactionFailed(_)));
    }
}
