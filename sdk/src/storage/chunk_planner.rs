use crate::utils::blob::constants::MAX_BLOBS_PER_TX;

/// Fixed calldata overhead of a `writeChunkByCalldata` call.
pub const CALLDATA_OVERHEAD: usize = 326;
/// Largest calldata chunk stored without a stake on fee charging networks.
pub const CALLDATA_FREE_LIMIT: usize = 24 * 1024 - CALLDATA_OVERHEAD;
/// Calldata chunk size on networks without the fee.
pub const CALLDATA_LARGE_UNIT: usize = 120 * 1024 - CALLDATA_OVERHEAD;

/// Contiguous byte range of the content stored under one chunk id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub id: u64,
    pub offset: usize,
    pub size: usize,
}

impl Chunk {
    pub fn data<'a>(&self, content: &'a [u8]) -> &'a [u8] {
        &content[self.offset..self.offset + self.size]
    }
}

/// Consecutive chunks written by a single transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkBatch {
    pub index: u64,
    pub chunks: Vec<Chunk>,
}

impl ChunkBatch {
    pub fn ids(&self) -> Vec<u64> {
        self.chunks.iter().map(|chunk| chunk.id).collect()
    }

    pub fn sizes(&self) -> Vec<u64> {
        self.chunks.iter().map(|chunk| chunk.size as u64).collect()
    }

    pub fn last_id(&self) -> u64 {
        self.chunks.last().map(|chunk| chunk.id).unwrap_or_default()
    }

    pub fn byte_len(&self) -> u64 {
        self.chunks.iter().map(|chunk| chunk.size as u64).sum()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

pub fn chunk_count(len: usize, unit: usize) -> u64 {
    if unit == 0 {
        return 0;
    }
    len.div_ceil(unit) as u64
}

/// Splits `len` bytes into chunks of `unit` bytes, the last one holding the remainder.
pub fn plan_chunks(len: usize, unit: usize) -> Vec<Chunk> {
    if unit == 0 {
        return Vec::new();
    }
    (0..len.div_ceil(unit))
        .map(|i| {
            let offset = i * unit;
            Chunk {
                id: i as u64,
                offset,
                size: unit.min(len - offset),
            }
        })
        .collect()
}

/// Groups consecutive chunks into batches of at most `per_batch`.
pub fn plan_batches(chunks: &[Chunk], per_batch: usize) -> Vec<ChunkBatch> {
    let per_batch = per_batch.clamp(1, MAX_BLOBS_PER_TX);
    chunks
        .chunks(per_batch)
        .enumerate()
        .map(|(index, chunks)| ChunkBatch {
            index: index as u64,
            chunks: chunks.to_vec(),
        })
        .collect()
}

/// Calldata chunk size. Fee charging networks get chunks no larger than the free limit, so
/// the contract's cost per chunk is all a calldata write ever pays.
pub fn calldata_unit_size(calldata_fee: bool) -> usize {
    if calldata_fee {
        CALLDATA_FREE_LIMIT
    } else {
        CALLDATA_LARGE_UNIT
    }
}
