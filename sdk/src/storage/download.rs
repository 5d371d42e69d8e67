use std::sync::Arc;

use futures::{StreamExt, stream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{
    error::StorageError,
    types::{DownloadEvent, EVENT_QUEUE_SIZE},
};
use crate::{
    ethereum_l1::storage_contract::StorageContract, metrics::Metrics, shared::OrderedBuffer,
    utils::retry::RetryPolicy,
};

const MIN_CONCURRENCY: usize = 2;
const MAX_CONCURRENCY: usize = 20;

/// Chunk fetches in flight at once, derived from the available parallelism.
pub fn default_download_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_CONCURRENCY)
        .clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

/// Reads every chunk stored under a key, delivering them in chunk order.
pub struct DownloadOrchestrator {
    contract: Arc<dyn StorageContract>,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
    concurrency: usize,
}

impl DownloadOrchestrator {
    /// `contract` must be reachable through an endpoint able to serve blob contents.
    pub fn new(contract: Arc<dyn StorageContract>, retry: RetryPolicy, metrics: Arc<Metrics>) -> Self {
        Self {
            contract,
            retry,
            metrics,
            concurrency: default_download_concurrency(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }

    /// Starts the download on a new task. The stream ends with `Finished` or `Failed`.
    pub fn download(self: &Arc<Self>, key: impl Into<String>) -> mpsc::Receiver<DownloadEvent> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let orchestrator = self.clone();
        let key = key.into();
        tokio::spawn(async move {
            orchestrator.run(&key, events_tx).await;
        });
        events_rx
    }

    pub async fn run(&self, key: &str, events: mpsc::Sender<DownloadEvent>) {
        let event = match self.fetch_all(key, &events).await {
            Ok(chunks) => {
                info!("Downloaded {} chunk(s) of {}", chunks, key);
                DownloadEvent::Finished
            }
            Err(err) => {
                error!("Download of {} failed: {}", key, err);
                DownloadEvent::Failed(err)
            }
        };
        if events.send(event).await.is_err() {
            debug!("Download event receiver dropped");
        }
    }

    async fn fetch_all(
        &self,
        key: &str,
        events: &mpsc::Sender<DownloadEvent>,
    ) -> Result<u64, StorageError> {
        if key.is_empty() {
            return Err(StorageError::Validation("key must not be empty".to_string()));
        }
        let name = key.as_bytes();
        let contract = &self.contract;
        let total = self
            .retry
            .run("get_chunk_count", move || contract.get_chunk_count(name))
            .await?;
        debug!("{} has {} chunk(s)", key, total);

        let retry = &self.retry;
        let mut fetches = stream::iter(0..total)
            .map(|chunk_id| async move {
                let data = retry
                    .run("read_chunk", move || contract.read_chunk(name, chunk_id))
                    .await;
                (chunk_id, data)
            })
            .buffer_unordered(self.concurrency);

        let mut ordered = OrderedBuffer::new(0);
        while let Some((chunk_id, data)) = fetches.next().await {
            // dropping `fetches` on return abandons the reads still in flight
            let data = data?;
            self.metrics.inc_chunks_downloaded();
            for (index, data) in ordered.push(chunk_id, data) {
                let event = DownloadEvent::Chunk { index, total, data };
                if events.send(event).await.is_err() {
                    debug!("Download event receiver dropped");
                }
            }
        }
        Ok(total)
    }

    /// Downloads `key` and returns its content.
    pub async fn download_to_vec(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let collect = async {
            let mut content = Vec::new();
            while let Some(event) = events_rx.recv().await {
                match event {
                    DownloadEvent::Chunk { data, .. } => content.extend_from_slice(&data),
                    DownloadEvent::Failed(err) => return Err(err),
                    DownloadEvent::Finished => {}
                }
            }
            Ok(content)
        };
        let ((), content) = tokio::join!(self.run(key, events_tx), collect);
        content
    }
}
