use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tracing::error;

pub struct Metrics {
    chunks_written: Counter,
    chunks_skipped: Counter,
    bytes_written: Counter,
    chunks_downloaded: Counter,
    tx_sent: Counter,
    tx_failed: Counter,
    tx_cost_eth: Histogram,
    rpc_retries: CounterVec,
    registry: Registry,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let chunks_written = Self::counter(
            &registry,
            "chunks_written",
            "Number of chunks written to the storage contract",
        );
        let chunks_skipped = Self::counter(
            &registry,
            "chunks_skipped",
            "Number of chunks skipped because the stored content is unchanged",
        );
        let bytes_written = Self::counter(
            &registry,
            "bytes_written",
            "Number of content bytes written to the storage contract",
        );
        let chunks_downloaded = Self::counter(
            &registry,
            "chunks_downloaded",
            "Number of chunks read back from the storage network",
        );
        let tx_sent = Self::counter(&registry, "tx_sent", "Number of transactions submitted");
        let tx_failed = Self::counter(
            &registry,
            "tx_failed",
            "Number of transactions that failed or reverted",
        );

        let opts = HistogramOpts::new("tx_cost_eth", "Total cost of a mined transaction in ETH")
            .buckets(vec![
                0.000_01, 0.000_1, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
            ]);
        let tx_cost_eth = match Histogram::with_opts(opts) {
            Ok(histogram) => histogram,
            Err(err) => panic!("Failed to create tx_cost_eth histogram: {}", err),
        };
        if let Err(err) = registry.register(Box::new(tx_cost_eth.clone())) {
            error!("Error: Failed to register tx_cost_eth: {}", err);
        }

        let rpc_retries = match CounterVec::new(
            Opts::new("rpc_retries", "Number of retried RPC calls by error type"),
            &["error_type"],
        ) {
            Ok(counter) => counter,
            Err(err) => panic!("Failed to create rpc_retries counter: {}", err),
        };
        if let Err(err) = registry.register(Box::new(rpc_retries.clone())) {
            error!("Error: Failed to register rpc_retries: {}", err);
        }

        Self {
            chunks_written,
            chunks_skipped,
            bytes_written,
            chunks_downloaded,
            tx_sent,
            tx_failed,
            tx_cost_eth,
            rpc_retries,
            registry,
        }
    }

    fn counter(registry: &Registry, name: &str, help: &str) -> Counter {
        let counter = match Counter::new(name, help) {
            Ok(counter) => counter,
            Err(err) => panic!("Failed to create {} counter: {}", name, err),
        };
        if let Err(err) = registry.register(Box::new(counter.clone())) {
            error!("Error: Failed to register {}: {}", name, err);
        }
        counter
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn inc_chunks_written(&self, chunks: u64, bytes: u64) {
        self.chunks_written.inc_by(chunks as f64);
        self.bytes_written.inc_by(bytes as f64);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn inc_chunks_skipped(&self, chunks: u64) {
        self.chunks_skipped.inc_by(chunks as f64);
    }

    pub fn inc_chunks_downloaded(&self) {
        self.chunks_downloaded.inc();
    }

    pub fn inc_tx_sent(&self) {
        self.tx_sent.inc();
    }

    pub fn inc_tx_failed(&self) {
        self.tx_failed.inc();
    }

    pub fn observe_tx_cost(&self, cost_wei: alloy::primitives::U256) {
        self.tx_cost_eth.observe(Metrics::u256_to_f64(cost_wei));
    }

    pub fn inc_rpc_retry(&self, error_type: &str) {
        if let Ok(metric) = self.rpc_retries.get_metric_with_label_values(&[error_type]) {
            metric.inc();
        } else {
            error!(
                "Failed to increment RPC retry counter for error type: {}",
                error_type
            );
        }
    }

    fn u256_to_f64(value: alloy::primitives::U256) -> f64 {
        let value_str = value.to_string();

        // Anything below 0.0001 gwei is noise for a cost histogram
        if value_str.len() < 6 {
            return 0f64;
        }

        let value = value_str.parse::<f64>().unwrap_or(0f64);
        value / 1_000_000_000_000_000_000.0
    }

    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return String::new();
        }

        match String::from_utf8(buffer) {
            Ok(metrics) => metrics,
            Err(e) => {
                error!("Failed to convert metrics to UTF-8: {}", e);
                String::new()
            }
        }
    }
}
