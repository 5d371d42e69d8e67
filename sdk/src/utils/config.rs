use std::{str::FromStr, time::Duration};
use tracing::{info, warn};

const DEFAULT_ETH_RPC_URL: &str = "http://127.0.0.1:8545";
const DEFAULT_MAX_UPLOAD_CONCURRENCY: usize = 4;

/// Settings read from the process environment (and a `.env` file if present).
#[derive(Clone)]
pub struct Config {
    pub eth_rpc_url: String,
    pub ethstorage_rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub flat_directory_address: Option<String>,
    pub ethstorage_address: Option<String>,
    pub gas_increase_percentage: u64,
    pub upload_concurrency: usize,
    pub rpc_retry_base_delay: Duration,
    pub rpc_retry_max_delay: Duration,
    pub rpc_max_retries: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("eth_rpc_url", &self.eth_rpc_url)
            .field("ethstorage_rpc_url", &self.ethstorage_rpc_url)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("flat_directory_address", &self.flat_directory_address)
            .field("ethstorage_address", &self.ethstorage_address)
            .field("gas_increase_percentage", &self.gas_increase_percentage)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("rpc_retry_base_delay", &self.rpc_retry_base_delay)
            .field("rpc_retry_max_delay", &self.rpc_retry_max_delay)
            .field("rpc_max_retries", &self.rpc_max_retries)
            .finish()
    }
}

pub fn default_upload_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(DEFAULT_MAX_UPLOAD_CONCURRENCY)
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(value) => value
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} must be a number, got {:?}: {}", name, value, e)),
        None => Ok(default),
    }
}

impl Config {
    pub fn read_env_variables() -> Result<Self, anyhow::Error> {
        // Load environment variables from .env file
        dotenvy::dotenv().ok();

        const ETH_RPC_URL: &str = "ETH_RPC_URL";
        let eth_rpc_url = optional_var(ETH_RPC_URL).unwrap_or_else(|| {
            warn!(
                "No execution RPC URL found in {} env var, using default {}",
                ETH_RPC_URL, DEFAULT_ETH_RPC_URL
            );
            DEFAULT_ETH_RPC_URL.to_string()
        });

        let ethstorage_rpc_url = optional_var("ETHSTORAGE_RPC_URL");

        const PRIVATE_KEY: &str = "PRIVATE_KEY";
        let private_key = optional_var(PRIVATE_KEY);
        if private_key.is_none() {
            warn!(
                "No private key found in {} env var, client is read-only",
                PRIVATE_KEY
            );
        }

        let flat_directory_address = optional_var("FLAT_DIRECTORY_ADDRESS");
        let ethstorage_address = optional_var("ETHSTORAGE_ADDRESS");

        let gas_increase_percentage = parse_var::<u64>("GAS_INCREASE_PERCENTAGE", 0)?;

        let upload_concurrency =
            parse_var::<usize>("UPLOAD_CONCURRENCY", default_upload_concurrency())?;
        if upload_concurrency == 0 {
            return Err(anyhow::anyhow!(
                "UPLOAD_CONCURRENCY must be a positive number"
            ));
        }

        let rpc_retry_base_delay =
            Duration::from_millis(parse_var::<u64>("RPC_RETRY_BASE_DELAY_MS", 500)?);
        let rpc_retry_max_delay =
            Duration::from_millis(parse_var::<u64>("RPC_RETRY_MAX_DELAY_MS", 10_000)?);
        if rpc_retry_max_delay < rpc_retry_base_delay {
            return Err(anyhow::anyhow!(
                "RPC_RETRY_MAX_DELAY_MS must not be lower than RPC_RETRY_BASE_DELAY_MS"
            ));
        }
        let rpc_max_retries = parse_var::<u32>("RPC_MAX_RETRIES", 8)?;

        let config = Self {
            eth_rpc_url,
            ethstorage_rpc_url,
            private_key,
            flat_directory_address,
            ethstorage_address,
            gas_increase_percentage,
            upload_concurrency,
            rpc_retry_base_delay,
            rpc_retry_max_delay,
            rpc_max_retries,
        };

        info!(
            r#"
Configuration:
Execution RPC URL: {},
EthStorage RPC URL: {},
Signer: {},
FlatDirectory address: {},
EthStorage address: {},
gas increase percentage: {}
upload concurrency: {}
rpc retry base delay: {}ms
rpc retry max delay: {}ms
rpc max retries: {}
"#,
            config.eth_rpc_url,
            config.ethstorage_rpc_url.as_deref().unwrap_or("-"),
            if config.private_key.is_some() {
                "private key"
            } else {
                "none (read-only)"
            },
            config.flat_directory_address.as_deref().unwrap_or("from network table"),
            config.ethstorage_address.as_deref().unwrap_or("from network table"),
            config.gas_increase_percentage,
            config.upload_concurrency,
            config.rpc_retry_base_delay.as_millis(),
            config.rpc_retry_max_delay.as_millis(),
            config.rpc_max_retries,
        );

        Ok(config)
    }
}
