//! In-memory stand-ins for the chain and the commitment backend.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy::{
    consensus::Blob,
    eips::{eip1559::Eip1559Estimation, eip4844::Bytes48},
    primitives::{Address, B256, U256, keccak256},
    rpc::types::TransactionRequest,
    sol_types::SolCall,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::{
    crypto::{
        CommitmentBackend, CommitmentEngine, ComputeMode,
        commitment_engine::{MockCommitmentBackend, STORAGE_HASH_LEN},
    },
    ethereum_l1::{
        blob_tx_builder::GAS_PER_BLOB,
        execution_client::ExecutionClient,
        l1_contracts_bindings::{IEthStorageKv, IFlatDirectory},
        storage_contract::{DecodeType, KvContract, StorageContract, StorageMode, UploadInfo},
        transaction_result::TxReceiptSummary,
    },
    utils::retry::{RpcErrorType, RpcFailure},
};

/// `sha256(blob)` followed by zeros.
pub fn fake_commitment(blob: &Blob) -> Bytes48 {
    let digest = Sha256::digest(blob.as_slice());
    let mut commitment = [0u8; 48];
    commitment[..32].copy_from_slice(&digest);
    Bytes48::from(commitment)
}

/// Deterministic backend: commitments from [`fake_commitment`], proofs echo the commitment.
pub fn fake_backend() -> Arc<dyn CommitmentBackend> {
    let mut backend = MockCommitmentBackend::new();
    backend
        .expect_commitment()
        .returning(|blob| Ok(fake_commitment(blob)));
    backend
        .expect_proof()
        .returning(|_, commitment| Ok(*commitment));
    backend
        .expect_verify()
        .returning(|blob, commitment, proof| {
            Ok(commitment == proof && fake_commitment(blob) == *commitment)
        });
    Arc::new(backend)
}

pub fn fake_engine(mode: ComputeMode) -> CommitmentEngine {
    CommitmentEngine::with_loader(mode, || Ok(fake_backend()))
}

const SMALL_STACK: usize = 1024 * 1024;

/// Runs `test` on a current thread runtime inside a thread with a 1 MiB stack.
pub fn on_small_stack<F, Fut>(test: F)
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()>,
{
    std::thread::Builder::new()
        .stack_size(SMALL_STACK)
        .spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(test());
        })
        .unwrap()
        .join()
        .unwrap();
}

pub const GAS_USED: u64 = 50_000;
pub const EFFECTIVE_GAS_PRICE: u128 = 10;
pub const ESTIMATED_GAS: u64 = 100_000;
/// How long a receipt is waited for while its transaction sits behind a nonce gap.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Contract call carried by a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    WriteBlobs { chunk_ids: Vec<u64>, value: U256 },
    WriteCalldata { chunk_id: u64, value: U256 },
    Truncate { chunk_count: u64 },
    Remove,
    PutBlob { key: B256, length: u64 },
    PutBlobs { keys: Vec<B256> },
    Other,
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(self, Call::WriteBlobs { .. } | Call::WriteCalldata { .. })
    }
}

#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub hash: B256,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct StoredFile {
    mode: StorageMode,
    chunks: Vec<StoredChunk>,
}

#[derive(Debug, Clone)]
struct SentTx {
    nonce: u64,
    call: Call,
}

struct PendingTx {
    hash: B256,
    tx: TransactionRequest,
}

struct ChainState {
    next_nonce: u64,
    mined_nonce: u64,
    nonce_delay: Duration,
    sent: Vec<SentTx>,
    pending: BTreeMap<u64, PendingTx>,
    receipts: HashMap<B256, (TxReceiptSummary, Option<u64>)>,
    receipt_delays: HashMap<u64, Duration>,
    revert_chunks: HashSet<u64>,
    version: String,
    support_blob: bool,
    cost_per_chunk: U256,
    upfront_payment: U256,
    files: HashMap<Vec<u8>, StoredFile>,
    hash_batch_sizes: Vec<usize>,
    read_delays: HashMap<u64, Duration>,
    fail_reads: HashSet<u64>,
    kv: HashMap<(Address, B256), (u64, Vec<u8>)>,
}

/// Single in-memory chain serving the execution client and both contract seams.
///
/// Sent transactions wait in a pool and are mined strictly in nonce order, so a transaction
/// whose nonce leaves a gap stays pending until the gap is filled. A write reverts when it
/// touches a chunk marked with [`FakeChain::revert_writes_for_chunk`] or when its chunk ids
/// would leave a hole after the stored chunks. Blob writes record the storage hash derived
/// from the versioned hashes, without chunk data.
pub struct FakeChain {
    signer: Option<Address>,
    state: Mutex<ChainState>,
}

pub const FLAT_DIRECTORY: Address = Address::repeat_byte(0x42);
pub const KV_CONTRACT: Address = Address::repeat_byte(0x43);

impl FakeChain {
    pub fn new() -> Self {
        Self::with_signer(Some(Address::repeat_byte(0xaa)))
    }

    pub fn read_only() -> Self {
        Self::with_signer(None)
    }

    fn with_signer(signer: Option<Address>) -> Self {
        Self {
            signer,
            state: Mutex::new(ChainState {
                next_nonce: 0,
                mined_nonce: 0,
                nonce_delay: Duration::ZERO,
                sent: Vec::new(),
                pending: BTreeMap::new(),
                receipts: HashMap::new(),
                receipt_delays: HashMap::new(),
                revert_chunks: HashSet::new(),
                version: "1.0.0".to_string(),
                support_blob: true,
                cost_per_chunk: U256::ZERO,
                upfront_payment: U256::ZERO,
                files: HashMap::new(),
                hash_batch_sizes: Vec::new(),
                read_delays: HashMap::new(),
                fail_reads: HashSet::new(),
                kv: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    pub fn signer(&self) -> Option<Address> {
        self.signer
    }

    /// Widens the gap between reading a nonce and using it.
    pub fn set_nonce_delay(&self, delay: Duration) {
        self.state().nonce_delay = delay;
    }

    pub fn set_version(&self, version: &str) {
        self.state().version = version.to_string();
    }

    pub fn set_support_blob(&self, support_blob: bool) {
        self.state().support_blob = support_blob;
    }

    pub fn set_cost_per_chunk(&self, cost: U256) {
        self.state().cost_per_chunk = cost;
    }

    pub fn set_upfront_payment(&self, cost: U256) {
        self.state().upfront_payment = cost;
    }

    /// Holds back the receipt of the write whose first chunk is `chunk_id`.
    pub fn delay_receipt_for_chunk(&self, chunk_id: u64, delay: Duration) {
        self.state().receipt_delays.insert(chunk_id, delay);
    }

    pub fn revert_writes_for_chunk(&self, chunk_id: u64) {
        self.state().revert_chunks.insert(chunk_id);
    }

    pub fn delay_read(&self, chunk_id: u64, delay: Duration) {
        self.state().read_delays.insert(chunk_id, delay);
    }

    pub fn fail_read(&self, chunk_id: u64) {
        self.state().fail_reads.insert(chunk_id);
    }

    /// Stores calldata chunks under `key` as if written earlier.
    pub fn seed_calldata_file(&self, key: &[u8], chunks: &[&[u8]]) {
        let chunks = chunks
            .iter()
            .map(|data| StoredChunk {
                hash: keccak256(data),
                data: data.to_vec(),
            })
            .collect();
        self.state().files.insert(
            key.to_vec(),
            StoredFile {
                mode: StorageMode::Calldata,
                chunks,
            },
        );
    }

    pub fn seed_kv(&self, owner: Address, key: B256, size: u64, blob: &Blob) {
        self.state()
            .kv
            .insert((owner, key), (size, blob.as_slice().to_vec()));
    }

    pub fn stored_hashes(&self, key: &[u8]) -> Vec<B256> {
        self.state()
            .files
            .get(key)
            .map(|file| file.chunks.iter().map(|chunk| chunk.hash).collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().sent.iter().map(|tx| tx.call.clone()).collect()
    }

    pub fn sent_nonces(&self) -> Vec<u64> {
        self.state().sent.iter().map(|tx| tx.nonce).collect()
    }

    /// Transactions sent but not mined yet.
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    pub fn hash_batch_sizes(&self) -> Vec<usize> {
        self.state().hash_batch_sizes.clone()
    }

    /// What a successful transaction carrying `blobs` blobs is charged.
    pub fn expected_cost(&self, blobs: u64) -> U256 {
        U256::from(GAS_USED) * U256::from(EFFECTIVE_GAS_PRICE)
            + U256::from(GAS_PER_BLOB * blobs)
    }

    fn decode_call(tx: &TransactionRequest) -> Call {
        let input = tx.input.input().cloned().unwrap_or_default();
        if input.len() < 4 {
            return Call::Other;
        }
        let value = tx.value.unwrap_or_default();
        let to_u64 = |v: U256| u64::try_from(v).unwrap();
        let selector: [u8; 4] = input[..4].try_into().unwrap();

        if selector == IFlatDirectory::writeChunksByBlobsCall::SELECTOR {
            let call = IFlatDirectory::writeChunksByBlobsCall::abi_decode(&input).unwrap();
            Call::WriteBlobs {
                chunk_ids: call.chunkIds.into_iter().map(to_u64).collect(),
                value,
            }
        } else if selector == IFlatDirectory::writeChunkByCalldataCall::SELECTOR {
            let call = IFlatDirectory::writeChunkByCalldataCall::abi_decode(&input).unwrap();
            Call::WriteCalldata {
                chunk_id: to_u64(call.chunkId),
                value,
            }
        } else if selector == IFlatDirectory::truncateCall::SELECTOR {
            let call = IFlatDirectory::truncateCall::abi_decode(&input).unwrap();
            Call::Truncate {
                chunk_count: to_u64(call.chunkId),
            }
        } else if selector == IFlatDirectory::removeCall::SELECTOR {
            Call::Remove
        } else if selector == IEthStorageKv::putBlobCall::SELECTOR {
            let call = IEthStorageKv::putBlobCall::abi_decode(&input).unwrap();
            Call::PutBlob {
                key: call.key,
                length: to_u64(call.length),
            }
        } else if selector == IEthStorageKv::putBlobsCall::SELECTOR {
            let call = IEthStorageKv::putBlobsCall::abi_decode(&input).unwrap();
            Call::PutBlobs { keys: call.keys }
        } else {
            Call::Other
        }
    }

    fn first_chunk(call: &Call) -> Option<u64> {
        match call {
            Call::WriteBlobs { chunk_ids, .. } => chunk_ids.first().copied(),
            Call::WriteCalldata { chunk_id, .. } => Some(*chunk_id),
            _ => None,
        }
    }

    /// Mines every pending transaction whose nonce is next in line.
    fn mine(state: &mut ChainState) {
        while let Some(pending) = state.pending.remove(&state.mined_nonce) {
            state.mined_nonce += 1;
            let call = Self::decode_call(&pending.tx);
            let reverted = match &call {
                Call::WriteBlobs { chunk_ids, .. } => {
                    chunk_ids.iter().any(|id| state.revert_chunks.contains(id))
                }
                Call::WriteCalldata { chunk_id, .. } => state.revert_chunks.contains(chunk_id),
                _ => false,
            };
            let success = !reverted && Self::apply(state, &pending.tx, &call);

            let blobs = pending
                .tx
                .blob_versioned_hashes
                .as_ref()
                .map(|hashes| hashes.len() as u64)
                .unwrap_or_default();
            let receipt = TxReceiptSummary {
                hash: pending.hash,
                success,
                block_number: Some(state.mined_nonce),
                gas_used: GAS_USED,
                effective_gas_price: EFFECTIVE_GAS_PRICE,
                blob_gas_used: (blobs > 0).then_some(GAS_PER_BLOB * blobs),
                blob_gas_price: (blobs > 0).then_some(1),
            };
            state
                .receipts
                .insert(pending.hash, (receipt, Self::first_chunk(&call)));
        }
    }

    /// Whether writing `ids` in order after `len` stored chunks leaves no hole.
    fn writes_contiguously(mut len: usize, ids: &[u64]) -> bool {
        for id in ids {
            let index = usize::try_from(*id).unwrap();
            if index > len {
                return false;
            }
            if index == len {
                len += 1;
            }
        }
        true
    }

    fn stored_len(state: &ChainState, name: &[u8]) -> usize {
        state.files.get(name).map_or(0, |file| file.chunks.len())
    }

    /// Executes a mined call. Returns false, leaving state untouched, when the call reverts.
    fn apply(state: &mut ChainState, tx: &TransactionRequest, call: &Call) -> bool {
        let input = tx.input.input().cloned().unwrap_or_default();
        match call {
            Call::WriteBlobs { chunk_ids, .. } => {
                let name = IFlatDirectory::writeChunksByBlobsCall::abi_decode(&input)
                    .unwrap()
                    .name
                    .to_vec();
                if !Self::writes_contiguously(Self::stored_len(state, &name), chunk_ids) {
                    return false;
                }
                let hashes = tx.blob_versioned_hashes.clone().unwrap_or_default();
                let file = state.files.entry(name).or_insert(StoredFile {
                    mode: StorageMode::Blob,
                    chunks: Vec::new(),
                });
                for (id, versioned) in chunk_ids.iter().zip(hashes) {
                    let mut hash = [0u8; 32];
                    hash[..STORAGE_HASH_LEN].copy_from_slice(&versioned[..STORAGE_HASH_LEN]);
                    Self::put_chunk(file, *id, StoredChunk {
                        hash: B256::from(hash),
                        data: Vec::new(),
                    });
                }
            }
            Call::WriteCalldata { chunk_id, .. } => {
                let call = IFlatDirectory::writeChunkByCalldataCall::abi_decode(&input).unwrap();
                let name = call.name.to_vec();
                if !Self::writes_contiguously(Self::stored_len(state, &name), &[*chunk_id]) {
                    return false;
                }
                let file = state.files.entry(name).or_insert(StoredFile {
                    mode: StorageMode::Calldata,
                    chunks: Vec::new(),
                });
                Self::put_chunk(file, *chunk_id, StoredChunk {
                    hash: keccak256(&call.data),
                    data: call.data.to_vec(),
                });
            }
            Call::Truncate { chunk_count } => {
                let name = IFlatDirectory::truncateCall::abi_decode(&input)
                    .unwrap()
                    .name
                    .to_vec();
                if let Some(file) = state.files.get_mut(&name) {
                    file.chunks.truncate(usize::try_from(*chunk_count).unwrap());
                }
            }
            Call::Remove => {
                let name = IFlatDirectory::removeCall::abi_decode(&input)
                    .unwrap()
                    .name
                    .to_vec();
                state.files.remove(&name);
            }
            _ => {}
        }
        true
    }

    fn put_chunk(file: &mut StoredFile, id: u64, chunk: StoredChunk) {
        let index = usize::try_from(id).unwrap();
        if index == file.chunks.len() {
            file.chunks.push(chunk);
        } else {
            file.chunks[index] = chunk;
        }
    }
}

#[async_trait]
impl ExecutionClient for FakeChain {
    fn signer_address(&self) -> Option<Address> {
        self.signer
    }

    async fn chain_id(&self) -> Result<u64, RpcFailure> {
        Ok(1337)
    }

    async fn latest_nonce(&self, _address: Address) -> Result<u64, RpcFailure> {
        let (nonce, delay) = {
            let state = self.state();
            (state.next_nonce, state.nonce_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(nonce)
    }

    async fn excess_blob_gas(&self) -> Result<u64, RpcFailure> {
        Ok(0)
    }

    async fn estimate_eip1559_fees(&self) -> Result<Eip1559Estimation, RpcFailure> {
        Ok(Eip1559Estimation {
            max_fee_per_gas: 20,
            max_priority_fee_per_gas: 2,
        })
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64, RpcFailure> {
        Ok(ESTIMATED_GAS)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, RpcFailure> {
        let mut state = self.state();
        let nonce = tx.nonce.unwrap_or(state.next_nonce);
        if nonce < state.mined_nonce || state.pending.contains_key(&nonce) {
            let message = "nonce too low";
            return Err(RpcFailure::new(
                RpcErrorType::from_json_rpc_code(-32000, message),
                message,
            ));
        }
        state.next_nonce = state.next_nonce.max(nonce + 1);

        let hash = keccak256(format!("fake-tx-{}", state.sent.len()));
        let call = Self::decode_call(&tx);
        state.sent.push(SentTx { nonce, call });
        state.pending.insert(nonce, PendingTx { hash, tx });
        Self::mine(&mut state);
        Ok(hash)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceiptSummary, RpcFailure> {
        let deadline = tokio::time::Instant::now() + RECEIPT_TIMEOUT;
        let (receipt, delay) = loop {
            {
                let state = self.state();
                if let Some((receipt, first_chunk)) = state.receipts.get(&tx_hash).cloned() {
                    let delay = first_chunk.and_then(|id| state.receipt_delays.get(&id).copied());
                    break (receipt, delay);
                }
                if !state.pending.values().any(|pending| pending.hash == tx_hash) {
                    return Err(RpcFailure::client(format!("unknown transaction {tx_hash}")));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RpcFailure::new(
                    RpcErrorType::Timeout,
                    format!("transaction {tx_hash} still pending"),
                ));
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(receipt)
    }
}

#[async_trait]
impl StorageContract for FakeChain {
    fn address(&self) -> Address {
        FLAT_DIRECTORY
    }

    async fn version(&self) -> Result<String, RpcFailure> {
        Ok(self.state().version.clone())
    }

    async fn is_support_blob(&self) -> Result<bool, RpcFailure> {
        Ok(self.state().support_blob)
    }

    async fn get_upload_info(&self, key: &[u8]) -> Result<UploadInfo, RpcFailure> {
        let state = self.state();
        let (mode, chunk_count) = state
            .files
            .get(key)
            .map(|file| (file.mode, file.chunks.len() as u64))
            .unwrap_or((StorageMode::Undefined, 0));
        Ok(UploadInfo {
            mode,
            chunk_count,
            cost_per_chunk: state.cost_per_chunk,
        })
    }

    async fn get_chunk_count(&self, key: &[u8]) -> Result<u64, RpcFailure> {
        Ok(self
            .state()
            .files
            .get(key)
            .map(|file| file.chunks.len() as u64)
            .unwrap_or_default())
    }

    async fn get_chunk_hashes_batch(
        &self,
        key: &[u8],
        chunk_ids: &[u64],
    ) -> Result<Vec<B256>, RpcFailure> {
        let mut state = self.state();
        state.hash_batch_sizes.push(chunk_ids.len());
        let file = state.files.get(key);
        Ok(chunk_ids
            .iter()
            .map(|id| {
                file.and_then(|file| file.chunks.get(usize::try_from(*id).unwrap()))
                    .map(|chunk| chunk.hash)
                    .unwrap_or_default()
            })
            .collect())
    }

    async fn read_chunk(&self, key: &[u8], chunk_id: u64) -> Result<Vec<u8>, RpcFailure> {
        let (data, delay, fail) = {
            let state = self.state();
            let data = state
                .files
                .get(key)
                .and_then(|file| file.chunks.get(usize::try_from(chunk_id).unwrap()))
                .map(|chunk| chunk.data.clone())
                .unwrap_or_default();
            (
                data,
                state.read_delays.get(&chunk_id).copied(),
                state.fail_reads.contains(&chunk_id),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(RpcFailure::client(format!("chunk {chunk_id} unavailable")));
        }
        Ok(data)
    }
}

#[async_trait]
impl KvContract for FakeChain {
    fn address(&self) -> Address {
        KV_CONTRACT
    }

    async fn upfront_payment(&self) -> Result<U256, RpcFailure> {
        Ok(self.state().upfront_payment)
    }

    async fn size(&self, owner: Address, key: B256) -> Result<u64, RpcFailure> {
        Ok(self
            .state()
            .kv
            .get(&(owner, key))
            .map(|(size, _)| *size)
            .unwrap_or_default())
    }

    async fn get(
        &self,
        owner: Address,
        key: B256,
        decode_type: DecodeType,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, RpcFailure> {
        assert_eq!(decode_type, DecodeType::RawData);
        let state = self.state();
        let (_, blob) = state
            .kv
            .get(&(owner, key))
            .ok_or_else(|| RpcFailure::client("no data for key"))?;
        let start = usize::try_from(offset).unwrap().min(blob.len());
        let end = start
            .saturating_add(usize::try_from(len).unwrap())
            .min(blob.len());
        Ok(blob[start..end].to_vec())
    }
}
