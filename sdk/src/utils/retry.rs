use std::{future::Future, sync::Arc, time::Duration};

use alloy::transports::TransportErrorKind;
use alloy_json_rpc::RpcError;
use rand::Rng;
use tracing::{debug, warn};

use crate::metrics::Metrics;

/// Classification of a failed RPC call. Decides how many times the call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorType {
    Socket,
    Network,
    Timeout,
    RateLimit,
    /// HTTP 5xx
    Server,
    /// Internal JSON-RPC error codes
    RpcServer,
    /// HTTP 4xx and request level JSON-RPC errors, never retried
    Client,
    Unknown,
}

impl RpcErrorType {
    /// Retries allowed for this class alone, on top of the global budget.
    pub const fn retry_budget(&self) -> u32 {
        match self {
            RpcErrorType::Socket => 5,
            RpcErrorType::Network => 4,
            RpcErrorType::Timeout => 3,
            RpcErrorType::RateLimit => 5,
            RpcErrorType::Server => 2,
            RpcErrorType::RpcServer => 2,
            RpcErrorType::Client => 0,
            RpcErrorType::Unknown => 1,
        }
    }

    pub fn from_json_rpc_code(code: i64, message: &str) -> Self {
        if is_rejected_transaction(message) {
            return RpcErrorType::Client;
        }
        match code {
            429 | -32005 => RpcErrorType::RateLimit,
            -32603 | -32099..=-32000 => RpcErrorType::RpcServer,
            _ => {
                let by_message = Self::from_message(message);
                if by_message == RpcErrorType::Unknown {
                    RpcErrorType::Client
                } else {
                    by_message
                }
            }
        }
    }

    pub const fn from_http_status(status: u16) -> Self {
        match status {
            429 => RpcErrorType::RateLimit,
            408 => RpcErrorType::Timeout,
            500..=599 => RpcErrorType::Server,
            400..=499 => RpcErrorType::Client,
            _ => RpcErrorType::Unknown,
        }
    }

    pub fn from_message(message: &str) -> Self {
        let message = message.to_lowercase();
        let contains_any = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

        if contains_any(&["rate limit", "too many requests", "429"]) {
            RpcErrorType::RateLimit
        } else if contains_any(&["timeout", "timed out"]) {
            RpcErrorType::Timeout
        } else if contains_any(&["econnreset", "socket", "broken pipe", "connection reset"]) {
            RpcErrorType::Socket
        } else if contains_any(&[
            "econnrefused",
            "connection refused",
            "enotfound",
            "dns",
            "network",
            "backend connection task has stopped",
        ]) {
            RpcErrorType::Network
        } else if contains_any(&["502", "503", "504", "bad gateway", "service unavailable"]) {
            RpcErrorType::Server
        } else {
            RpcErrorType::Unknown
        }
    }
}

/// Node verdicts on a submitted transaction. Resending the same request cannot change them.
fn is_rejected_transaction(message: &str) -> bool {
    let message = message.to_lowercase();
    [
        "insufficient funds",
        "nonce too low",
        "already known",
        "replacement transaction underpriced",
        "execution reverted",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

impl std::fmt::Display for RpcErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RpcErrorType::Socket => "SOCKET",
            RpcErrorType::Network => "NETWORK",
            RpcErrorType::Timeout => "TIMEOUT",
            RpcErrorType::RateLimit => "RATE_LIMIT",
            RpcErrorType::Server => "SERVER",
            RpcErrorType::RpcServer => "RPC_SERVER",
            RpcErrorType::Client => "CLIENT",
            RpcErrorType::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// A failed RPC call with its classification fixed at construction.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct RpcFailure {
    pub kind: RpcErrorType,
    pub message: String,
}

impl RpcFailure {
    pub fn new(kind: RpcErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Failure that must never be retried, e.g. a malformed request built locally.
    pub fn client(message: impl Into<String>) -> Self {
        Self::new(RpcErrorType::Client, message)
    }
}

impl From<RpcError<TransportErrorKind>> for RpcFailure {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        let kind = match &err {
            RpcError::ErrorResp(payload) => {
                RpcErrorType::from_json_rpc_code(payload.code, &payload.message)
            }
            RpcError::Transport(TransportErrorKind::HttpError(http)) => {
                RpcErrorType::from_http_status(http.status)
            }
            other => RpcErrorType::from_message(&other.to_string()),
        };
        Self::new(kind, err.to_string())
    }
}

impl From<alloy::contract::Error> for RpcFailure {
    fn from(err: alloy::contract::Error) -> Self {
        match err {
            alloy::contract::Error::TransportError(e) => e.into(),
            other => Self::client(other.to_string()),
        }
    }
}

/// Retry budget exhausted, or the failure class is not retryable.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s), last error type {last_type}: {source}")]
pub struct RetryError {
    pub operation: String,
    pub attempts: u32,
    pub last_type: RpcErrorType,
    pub source: RpcFailure,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    metrics: Option<Arc<Metrics>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(10), 8)
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs `operation` until it succeeds, its error class runs out of retries, or the global
    /// budget is spent. Delays grow exponentially, capped at `max_delay`, with jitter.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcFailure>>,
    {
        let mut per_class: std::collections::HashMap<RpcErrorType, u32> = Default::default();
        let mut retries: u32 = 0;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let used = per_class.entry(err.kind).or_insert(0);
            if *used >= err.kind.retry_budget() || retries >= self.max_retries {
                warn!(
                    "{} failed permanently after {} attempt(s): {}",
                    operation_name,
                    retries + 1,
                    err
                );
                return Err(RetryError {
                    operation: operation_name.to_string(),
                    attempts: retries + 1,
                    last_type: err.kind,
                    source: err,
                });
            }
            *used += 1;
            retries += 1;

            let delay = self.delay_for(retries);
            debug!(
                "{} failed with {} error, retry {} in {}ms: {}",
                operation_name,
                err.kind,
                retries,
                delay.as_millis(),
                err.message
            );
            if let Some(metrics) = &self.metrics {
                metrics.inc_rpc_retry(&err.kind.to_string());
            }
            tokio::time::sleep(delay).await;
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
            .min(self.max_delay);
        let half = exp / 2;
        let jitter_ms = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        half + jitter
    }
}
