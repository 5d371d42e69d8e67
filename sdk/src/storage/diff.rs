use alloy::primitives::B256;
use tracing::debug;

use crate::{
    ethereum_l1::storage_contract::StorageContract,
    utils::retry::{RetryError, RetryPolicy},
};

/// Most chunk ids per `getChunkHashesBatch` call, keeps each read under the gas cap.
pub const HASH_PAGE_SIZE: usize = 120;

/// Hashes of chunks `0..chunk_count` recorded by the contract for `key`.
pub async fn fetch_remote_state(
    contract: &dyn StorageContract,
    retry: &RetryPolicy,
    key: &[u8],
    chunk_count: u64,
) -> Result<Vec<B256>, RetryError> {
    let ids: Vec<u64> = (0..chunk_count).collect();
    let mut hashes = Vec::with_capacity(ids.len());

    for page in ids.chunks(HASH_PAGE_SIZE) {
        let mut page_hashes = retry
            .run("get_chunk_hashes_batch", move || {
                contract.get_chunk_hashes_batch(key, page)
            })
            .await?;
        // a short answer means the chunks are gone, treat them as empty
        page_hashes.resize(page.len(), B256::ZERO);
        hashes.extend(page_hashes);
    }

    debug!(
        "Fetched {} remote chunk hash(es) for key {}",
        hashes.len(),
        String::from_utf8_lossy(key)
    );
    Ok(hashes)
}

/// Whether chunk `index` already holds `local` on chain.
pub fn is_unchanged(index: u64, local: &B256, remote: &[B256]) -> bool {
    usize::try_from(index)
        .ok()
        .and_then(|index| remote.get(index))
        .is_some_and(|remote| remote == local)
}

/// New chunk count to truncate to before writing, when the content shrinks.
pub fn plan_truncation(old_count: u64, new_count: u64) -> Option<u64> {
    (new_count < old_count).then_some(new_count)
}
