use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use alloy::{
    consensus::Blob,
    eips::eip4844::Bytes48,
    network::{TransactionBuilder, TransactionBuilder4844},
    primitives::{B256, U256, keccak256},
    rpc::types::TransactionRequest,
};
use futures::{StreamExt, stream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{
    chunk_planner::{
        ChunkBatch, calldata_unit_size, plan_batches, plan_chunks,
    },
    diff::{fetch_remote_state, is_unchanged, plan_truncation},
    error::StorageError,
    types::{
        CostEstimate, EVENT_QUEUE_SIZE, UploadEvent, UploadMode, UploadRequest, UploadResult,
    },
};
use crate::{
    crypto::CommitmentEngine,
    ethereum_l1::{
        blob_tx_builder::{BlobTxBuilder, GAS_PER_BLOB, increase_by_percentage},
        storage_contract::{
            StorageContract, StorageMode, UploadInfo, truncate_tx, write_chunk_by_calldata_tx,
            write_chunks_by_blobs_tx,
        },
        tx_sender::TxSender,
    },
    metrics::Metrics,
    shared::OrderedBuffer,
    utils::{
        blob::{BlobEncoding, constants::MAX_BLOBS_PER_TX, zeroed_blobs},
        retry::RetryPolicy,
    },
};

#[derive(Debug, Clone, Copy)]
pub struct UploadSettings {
    pub encoding: BlobEncoding,
    /// Calldata chunks are kept within the fee free size on this network.
    pub calldata_fee: bool,
    /// Batches prepared or in flight at once.
    pub concurrency: usize,
    pub gas_increase_pct: u64,
}

/// Per-upload facts shared by every batch.
struct BatchContext<'a> {
    key: &'a [u8],
    content: &'a [u8],
    remote: &'a [B256],
    cost_per_chunk: U256,
    gas_increase_pct: u64,
}

enum PreparedBatch {
    Unchanged,
    Ready { tx: TransactionRequest, value: U256 },
}

#[derive(Debug)]
enum BatchOutcome {
    Skipped,
    Written { cost: U256 },
    /// Never dispatched because an earlier batch failed.
    Aborted,
}

/// Keeps running totals and turns them into [`UploadEvent`]s.
struct UploadTracker {
    events: mpsc::Sender<UploadEvent>,
    metrics: Arc<Metrics>,
    result: UploadResult,
    total: u64,
    failed: bool,
}

impl UploadTracker {
    fn new(events: mpsc::Sender<UploadEvent>, metrics: Arc<Metrics>) -> Self {
        Self {
            events,
            metrics,
            result: UploadResult::default(),
            total: 0,
            failed: false,
        }
    }

    async fn emit(&self, event: UploadEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Upload event receiver dropped");
        }
    }

    async fn skipped(&mut self, index: u64, chunks: usize) {
        self.metrics.inc_chunks_skipped(chunks as u64);
        self.emit(UploadEvent::Progress {
            index,
            total: self.total,
            written: false,
        })
        .await;
    }

    async fn written(&mut self, index: u64, chunks: usize, bytes: u64, cost: U256) {
        self.result.total_chunks += chunks as u64;
        self.result.total_bytes += bytes;
        self.result.total_cost += cost;
        self.metrics.inc_chunks_written(chunks as u64, bytes);
        self.emit(UploadEvent::Progress {
            index,
            total: self.total,
            written: true,
        })
        .await;
    }

    async fn record(&mut self, batch: &ChunkBatch, outcome: BatchOutcome) {
        match outcome {
            BatchOutcome::Skipped => self.skipped(batch.last_id(), batch.len()).await,
            BatchOutcome::Written { cost } => {
                self.written(batch.last_id(), batch.len(), batch.byte_len(), cost)
                    .await
            }
            BatchOutcome::Aborted => debug!("Batch {} was not dispatched", batch.index),
        }
    }

    async fn fail(&mut self, err: StorageError) {
        if self.failed {
            warn!("Further upload failure after the first: {}", err);
            return;
        }
        self.failed = true;
        self.emit(UploadEvent::Failed(err)).await;
    }

    async fn finish(self) -> UploadResult {
        let result = self.result;
        self.emit(UploadEvent::Finished(result)).await;
        result
    }
}

/// Writes content under a key of a flat directory contract, skipping chunks that are
/// already stored.
pub struct UploadOrchestrator {
    contract: Arc<dyn StorageContract>,
    tx_sender: Arc<TxSender>,
    blob_tx_builder: Arc<BlobTxBuilder>,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
    settings: UploadSettings,
}

impl UploadOrchestrator {
    pub fn new(
        contract: Arc<dyn StorageContract>,
        tx_sender: Arc<TxSender>,
        blob_tx_builder: Arc<BlobTxBuilder>,
        retry: RetryPolicy,
        metrics: Arc<Metrics>,
        mut settings: UploadSettings,
    ) -> Self {
        settings.concurrency = settings.concurrency.max(1);
        Self {
            contract,
            tx_sender,
            blob_tx_builder,
            retry,
            metrics,
            settings,
        }
    }

    fn engine(&self) -> &CommitmentEngine {
        self.blob_tx_builder.engine()
    }

    /// Starts the upload on a new task and returns its events. The stream always ends with
    /// [`UploadEvent::Finished`].
    pub fn upload(self: &Arc<Self>, request: UploadRequest) -> mpsc::Receiver<UploadEvent> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.run(request, events_tx).await;
        });
        events_rx
    }

    /// Runs the upload on the current task. Failures are reported as events, never returned.
    pub async fn run(
        &self,
        request: UploadRequest,
        events: mpsc::Sender<UploadEvent>,
    ) -> UploadResult {
        let mut tracker = UploadTracker::new(events, self.metrics.clone());
        info!(
            "Uploading {} byte(s) under key {} in {:?} mode",
            request.content.len(),
            request.key,
            request.mode
        );

        let outcome = match request.mode {
            UploadMode::Blob => self.upload_blobs(&request, &mut tracker).await,
            UploadMode::Calldata => self.upload_calldata(&request, &mut tracker).await,
        };
        if let Err(err) = outcome {
            error!("Upload of {} failed: {}", request.key, err);
            tracker.fail(err).await;
        }

        let result = tracker.finish().await;
        info!(
            "Upload of {} finished: {} chunk(s), {} byte(s) written, cost {} wei",
            request.key, result.total_chunks, result.total_bytes, result.total_cost
        );
        result
    }

    /// Validates the request against the contract and returns what it records for the key.
    async fn upload_info(&self, request: &UploadRequest) -> Result<UploadInfo, StorageError> {
        request.validate()?;

        if request.mode == UploadMode::Blob {
            let contract = &self.contract;
            let supported = self
                .retry
                .run("is_support_blob", move || contract.is_support_blob())
                .await?;
            if !supported {
                return Err(StorageError::Capability(
                    "blob uploads are not supported by this contract".to_string(),
                ));
            }
        }

        let contract = &self.contract;
        let key = request.key.as_bytes();
        let info = self
            .retry
            .run("get_upload_info", move || contract.get_upload_info(key))
            .await?;

        match (request.mode, info.mode) {
            (UploadMode::Blob, StorageMode::Calldata) => Err(StorageError::Capability(format!(
                "{} is stored as calldata and cannot be updated with blobs",
                request.key
            ))),
            (UploadMode::Calldata, StorageMode::Blob) => Err(StorageError::Capability(format!(
                "{} is stored in blobs and cannot be updated with calldata",
                request.key
            ))),
            _ => Ok(info),
        }
    }

    async fn remote_hashes(
        &self,
        request: &UploadRequest,
        chunk_count: u64,
    ) -> Result<Vec<B256>, StorageError> {
        if let Some(hashes) = &request.chunk_hashes {
            debug!("Using {} caller supplied chunk hash(es)", hashes.len());
            return Ok(hashes.clone());
        }
        Ok(fetch_remote_state(
            self.contract.as_ref(),
            &self.retry,
            request.key.as_bytes(),
            chunk_count,
        )
        .await?)
    }

    async fn truncate_if_shrinking(
        &self,
        request: &UploadRequest,
        old_count: u64,
        new_count: u64,
    ) -> Result<(), StorageError> {
        let Some(chunk_count) = plan_truncation(old_count, new_count) else {
            return Ok(());
        };
        info!(
            "✂️ Truncating {} from {} to {} chunk(s)",
            request.key, old_count, chunk_count
        );
        let tx = truncate_tx(
            self.contract.address(),
            request.key.as_bytes(),
            chunk_count,
        );
        self.submit(tx, U256::ZERO, request.confirm_nonce).await?;
        Ok(())
    }

    /// Sends `tx` and waits for it. Returns value plus fees paid.
    async fn submit(
        &self,
        tx: TransactionRequest,
        value: U256,
        confirm_nonce: bool,
    ) -> Result<U256, StorageError> {
        let tx_hash = self.tx_sender.send_tx_locked(tx, confirm_nonce).await?;
        let result = self.tx_sender.get_transaction_result(tx_hash).await?;
        if !result.success {
            return Err(StorageError::TransactionFailed { hash: tx_hash });
        }
        Ok(value + result.cost)
    }

    /// One blob per chunk, encoded in place.
    fn encode_batch(&self, content: &[u8], batch: &ChunkBatch) -> Result<Vec<Blob>, StorageError> {
        let mut blobs = zeroed_blobs(batch.len());
        for (chunk, blob) in batch.chunks.iter().zip(blobs.iter_mut()) {
            self.settings
                .encoding
                .encode_into(chunk.data(content), blob)?;
        }
        Ok(blobs)
    }

    /// Encodes and commits to a batch, and tells whether every chunk is already stored.
    async fn commit_and_diff(
        &self,
        ctx: &BatchContext<'_>,
        batch: &ChunkBatch,
    ) -> Result<(Vec<Blob>, Vec<Bytes48>, bool), StorageError> {
        let blobs = self.encode_batch(ctx.content, batch)?;
        let commitments = self
            .engine()
            .commit_batch(&blobs)
            .await
            .map_err(|e| StorageError::Commitment(e.to_string()))?;
        let unchanged = batch
            .chunks
            .iter()
            .zip(&commitments)
            .all(|(chunk, commitment)| {
                is_unchanged(
                    chunk.id,
                    &CommitmentEngine::storage_hash(commitment),
                    ctx.remote,
                )
            });
        Ok((blobs, commitments, unchanged))
    }

    async fn prepare_batch(
        &self,
        ctx: &BatchContext<'_>,
        batch: &ChunkBatch,
    ) -> Result<PreparedBatch, StorageError> {
        let (blobs, commitments, unchanged) = self.commit_and_diff(ctx, batch).await?;
        if unchanged {
            debug!("Chunks {:?} unchanged, skipping", batch.ids());
            return Ok(PreparedBatch::Unchanged);
        }

        let value = ctx.cost_per_chunk * U256::from(batch.len());
        let base_tx = write_chunks_by_blobs_tx(
            self.contract.address(),
            ctx.key,
            &batch.ids(),
            &batch.sizes(),
            value,
        );
        let tx = self
            .blob_tx_builder
            .build_blob_tx(base_tx, blobs, Some(commitments), ctx.gas_increase_pct)
            .await?;
        Ok(PreparedBatch::Ready { tx, value })
    }

    async fn process_batch(
        &self,
        ctx: &BatchContext<'_>,
        batch: &ChunkBatch,
        confirm_nonce: bool,
    ) -> Result<BatchOutcome, StorageError> {
        match self.prepare_batch(ctx, batch).await? {
            PreparedBatch::Unchanged => Ok(BatchOutcome::Skipped),
            PreparedBatch::Ready { tx, value } => {
                let cost = self.submit(tx, value, confirm_nonce).await?;
                Ok(BatchOutcome::Written { cost })
            }
        }
    }

    async fn upload_blobs(
        &self,
        request: &UploadRequest,
        tracker: &mut UploadTracker,
    ) -> Result<(), StorageError> {
        let info = self.upload_info(request).await?;
        let chunks = plan_chunks(request.content.len(), self.settings.encoding.max_payload());
        let chunk_count = chunks.len() as u64;
        tracker.total = chunk_count;

        self.truncate_if_shrinking(request, info.chunk_count, chunk_count)
            .await?;
        let remote = self
            .remote_hashes(request, info.chunk_count.min(chunk_count))
            .await?;

        let ctx = BatchContext {
            key: request.key.as_bytes(),
            content: &request.content,
            remote: &remote,
            cost_per_chunk: info.cost_per_chunk,
            gas_increase_pct: request
                .gas_increase_pct
                .unwrap_or(self.settings.gas_increase_pct),
        };
        let batches = plan_batches(&chunks, MAX_BLOBS_PER_TX);
        debug!(
            "Uploading {} chunk(s) in {} batch(es) under {}",
            chunk_count,
            batches.len(),
            request.key
        );

        if request.confirm_nonce {
            self.upload_batches_confirmed(&ctx, &batches, tracker).await
        } else {
            self.upload_batches_concurrent(&ctx, &batches, tracker)
                .await;
            Ok(())
        }
    }

    /// Prepares batches ahead but submits them one by one, each with a freshly read nonce.
    /// The first failure stops further submission.
    async fn upload_batches_confirmed(
        &self,
        ctx: &BatchContext<'_>,
        batches: &[ChunkBatch],
        tracker: &mut UploadTracker,
    ) -> Result<(), StorageError> {
        let mut prepared = stream::iter(batches.iter().cloned())
            .map(|batch| async move {
                let prepared_batch = self.prepare_batch(ctx, &batch).await;
                (batch, prepared_batch)
            })
            .buffered(self.settings.concurrency);

        while let Some((batch, prepared_batch)) = prepared.next().await {
            let outcome = match prepared_batch? {
                PreparedBatch::Unchanged => BatchOutcome::Skipped,
                PreparedBatch::Ready { tx, value } => BatchOutcome::Written {
                    cost: self.submit(tx, value, true).await?,
                },
            };
            tracker.record(&batch, outcome).await;
        }
        Ok(())
    }

    /// Runs up to `concurrency` batches at once and reports them in batch order. After a
    /// failure no new batch starts, but batches already in flight run to completion and are
    /// counted.
    async fn upload_batches_concurrent(
        &self,
        ctx: &BatchContext<'_>,
        batches: &[ChunkBatch],
        tracker: &mut UploadTracker,
    ) {
        let failed = AtomicBool::new(false);
        let failed = &failed;
        let mut reports = stream::iter(batches.iter().cloned())
            .map(|batch| async move {
                if failed.load(Ordering::SeqCst) {
                    return (batch, Ok(BatchOutcome::Aborted));
                }
                let outcome = self.process_batch(ctx, &batch, false).await;
                if outcome.is_err() {
                    failed.store(true, Ordering::SeqCst);
                }
                (batch, outcome)
            })
            .buffer_unordered(self.settings.concurrency);

        let mut ordered = OrderedBuffer::new(0);
        while let Some((batch, outcome)) = reports.next().await {
            for (_, (batch, outcome)) in ordered.push(batch.index, (batch, outcome)) {
                match outcome {
                    Ok(outcome) => tracker.record(&batch, outcome).await,
                    Err(err) => {
                        error!("Batch {} failed: {}", batch.index, err);
                        tracker.fail(err).await;
                    }
                }
            }
        }
    }

    /// One transaction per chunk, strictly in order.
    async fn upload_calldata(
        &self,
        request: &UploadRequest,
        tracker: &mut UploadTracker,
    ) -> Result<(), StorageError> {
        let info = self.upload_info(request).await?;
        let chunks = plan_chunks(
            request.content.len(),
            calldata_unit_size(self.settings.calldata_fee),
        );
        let chunk_count = chunks.len() as u64;
        tracker.total = chunk_count;

        self.truncate_if_shrinking(request, info.chunk_count, chunk_count)
            .await?;
        let remote = self
            .remote_hashes(request, info.chunk_count.min(chunk_count))
            .await?;
        let gas_increase_pct = request
            .gas_increase_pct
            .unwrap_or(self.settings.gas_increase_pct);

        for chunk in &chunks {
            let data = chunk.data(&request.content);
            if is_unchanged(chunk.id, &keccak256(data), &remote) {
                debug!("Chunk {} unchanged, skipping", chunk.id);
                tracker.skipped(chunk.id, 1).await;
                continue;
            }

            let value = info.cost_per_chunk;
            let mut tx = write_chunk_by_calldata_tx(
                self.contract.address(),
                request.key.as_bytes(),
                chunk.id,
                data,
                value,
            );
            self.blob_tx_builder
                .fill_execution_fees(&mut tx, gas_increase_pct)
                .await?;
            let cost = self.submit(tx, value, request.confirm_nonce).await?;
            tracker
                .written(chunk.id, 1, chunk.size as u64, cost)
                .await;
        }
        Ok(())
    }

    /// Prices the writes `request` would send, without sending anything. Unchanged chunks
    /// cost nothing.
    pub async fn estimate_cost(&self, request: &UploadRequest) -> Result<CostEstimate, StorageError> {
        let info = self.upload_info(request).await?;
        let gas_increase_pct = request
            .gas_increase_pct
            .unwrap_or(self.settings.gas_increase_pct);

        let mut fee_quote = TransactionRequest::default();
        self.blob_tx_builder
            .fill_execution_fees(&mut fee_quote, gas_increase_pct)
            .await?;
        let max_fee_per_gas = U256::from(fee_quote.max_fee_per_gas.unwrap_or_default());
        let signer = self.tx_sender.signer_address().ok();

        let unit = match request.mode {
            UploadMode::Blob => self.settings.encoding.max_payload(),
            UploadMode::Calldata => calldata_unit_size(self.settings.calldata_fee),
        };
        let chunks = plan_chunks(request.content.len(), unit);
        let remote = self
            .remote_hashes(request, info.chunk_count.min(chunks.len() as u64))
            .await?;
        let ctx = BatchContext {
            key: request.key.as_bytes(),
            content: &request.content,
            remote: &remote,
            cost_per_chunk: info.cost_per_chunk,
            gas_increase_pct,
        };

        let mut estimate = CostEstimate::default();
        match request.mode {
            UploadMode::Blob => {
                let blob_gas_price = U256::from(increase_by_percentage(
                    self.blob_tx_builder.blob_gas_price().await?,
                    gas_increase_pct,
                ));
                for batch in plan_batches(&chunks, MAX_BLOBS_PER_TX) {
                    let (_, commitments, unchanged) = self.commit_and_diff(&ctx, &batch).await?;
                    if unchanged {
                        continue;
                    }
                    let value = ctx.cost_per_chunk * U256::from(batch.len());
                    let mut tx = write_chunks_by_blobs_tx(
                        self.contract.address(),
                        ctx.key,
                        &batch.ids(),
                        &batch.sizes(),
                        value,
                    )
                    .with_max_fee_per_blob_gas(u128::try_from(blob_gas_price).unwrap_or(u128::MAX));
                    tx.blob_versioned_hashes = Some(
                        commitments
                            .iter()
                            .map(CommitmentEngine::versioned_hash)
                            .collect(),
                    );
                    if let Some(from) = signer {
                        tx.set_from(from);
                    }
                    let gas = self.blob_tx_builder.estimate_gas(&tx).await?;

                    estimate.storage_cost += value;
                    estimate.gas_cost += U256::from(gas) * max_fee_per_gas
                        + blob_gas_price * U256::from(GAS_PER_BLOB) * U256::from(batch.len());
                }
            }
            UploadMode::Calldata => {
                for chunk in &chunks {
                    let data = chunk.data(&request.content);
                    if is_unchanged(chunk.id, &keccak256(data), &remote) {
                        continue;
                    }
                    let value = info.cost_per_chunk;
                    let mut tx = write_chunk_by_calldata_tx(
                        self.contract.address(),
                        ctx.key,
                        chunk.id,
                        data,
                        value,
                    );
                    if let Some(from) = signer {
                        tx.set_from(from);
                    }
                    let gas = self.blob_tx_builder.estimate_gas(&tx).await?;

                    estimate.storage_cost += value;
                    estimate.gas_cost += U256::from(gas) * max_fee_per_gas;
                }
            }
        }

        debug!(
            "Estimated cost for {}: storage {} wei, gas {} wei",
            request.key, estimate.storage_cost, estimate.gas_cost
        );
        Ok(estimate)
    }
}
