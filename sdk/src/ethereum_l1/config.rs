use std::{str::FromStr, time::Duration};

use alloy::primitives::{Address, address};

use crate::{
    crypto::ComputeMode,
    utils::{blob::BlobEncoding, config::Config, retry::RetryPolicy},
};

pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
pub const QUARKCHAIN_L2_TESTNET_CHAIN_ID: u64 = 3335;
pub const GALILEO_CHAIN_ID: u64 = 3334;

/// Per chain facts the client cannot read from the contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    pub chain_id: u64,
    pub name: &'static str,
    /// Default EthStorage key-value contract.
    pub ethstorage_address: Option<Address>,
    pub encoding: BlobEncoding,
    /// Calldata chunks above the free threshold must carry a stake, so they are cut smaller.
    pub calldata_fee: bool,
}

const NETWORKS: [Network; 3] = [
    Network {
        chain_id: SEPOLIA_CHAIN_ID,
        name: "sepolia",
        ethstorage_address: Some(address!("804C520d3c084C805E37A35E90057Ac32831F96f")),
        encoding: BlobEncoding::Legacy,
        calldata_fee: false,
    },
    Network {
        chain_id: QUARKCHAIN_L2_TESTNET_CHAIN_ID,
        name: "quarkchain-l2-testnet",
        ethstorage_address: None,
        encoding: BlobEncoding::Compact,
        calldata_fee: false,
    },
    Network {
        chain_id: GALILEO_CHAIN_ID,
        name: "galileo",
        ethstorage_address: None,
        encoding: BlobEncoding::Legacy,
        calldata_fee: true,
    },
];

impl Network {
    /// Unknown chains get the legacy layout and no calldata fee.
    pub fn from_chain_id(chain_id: u64) -> Self {
        NETWORKS
            .iter()
            .find(|network| network.chain_id == chain_id)
            .copied()
            .unwrap_or(Network {
                chain_id,
                name: "unknown",
                ethstorage_address: None,
                encoding: BlobEncoding::Legacy,
                calldata_fee: false,
            })
    }
}

#[derive(Clone)]
pub struct EthStorageConfig {
    pub rpc_url: String,
    /// Endpoint able to serve stored blob contents; required for reads.
    pub ethstorage_rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub flat_directory_address: Option<Address>,
    pub ethstorage_address: Option<Address>,
    pub gas_increase_percentage: u64,
    pub upload_concurrency: usize,
    pub receipt_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub compute_mode: ComputeMode,
}

impl std::fmt::Debug for EthStorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthStorageConfig")
            .field("rpc_url", &self.rpc_url)
            .field("ethstorage_rpc_url", &self.ethstorage_rpc_url)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("flat_directory_address", &self.flat_directory_address)
            .field("ethstorage_address", &self.ethstorage_address)
            .field("gas_increase_percentage", &self.gas_increase_percentage)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("receipt_timeout", &self.receipt_timeout)
            .field("compute_mode", &self.compute_mode)
            .finish_non_exhaustive()
    }
}

impl EthStorageConfig {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ethstorage_rpc_url: None,
            private_key: None,
            flat_directory_address: None,
            ethstorage_address: None,
            gas_increase_percentage: 0,
            upload_concurrency: crate::utils::config::default_upload_concurrency(),
            receipt_timeout: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
            compute_mode: ComputeMode::default(),
        }
    }
}

fn parse_address(name: &str, value: Option<&String>) -> Result<Option<Address>, anyhow::Error> {
    value
        .map(|value| {
            Address::from_str(value)
                .map_err(|e| anyhow::anyhow!("{} is not a valid address: {}", name, e))
        })
        .transpose()
}

impl TryFrom<&Config> for EthStorageConfig {
    type Error = anyhow::Error;

    fn try_from(config: &Config) -> Result<Self, Self::Error> {
        Ok(Self {
            rpc_url: config.eth_rpc_url.clone(),
            ethstorage_rpc_url: config.ethstorage_rpc_url.clone(),
            private_key: config.private_key.clone(),
            flat_directory_address: parse_address(
                "FLAT_DIRECTORY_ADDRESS",
                config.flat_directory_address.as_ref(),
            )?,
            ethstorage_address: parse_address(
                "ETHSTORAGE_ADDRESS",
                config.ethstorage_address.as_ref(),
            )?,
            gas_increase_percentage: config.gas_increase_percentage,
            upload_concurrency: config.upload_concurrency,
            receipt_timeout: Duration::from_secs(60),
            retry_policy: RetryPolicy::new(
                config.rpc_retry_base_delay,
                config.rpc_retry_max_delay,
                config.rpc_max_retries,
            ),
            compute_mode: ComputeMode::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_table() {
        let sepolia = Network::from_chain_id(SEPOLIA_CHAIN_ID);
        assert_eq!(sepolia.encoding, BlobEncoding::Legacy);
        assert!(sepolia.ethstorage_address.is_some());
        assert!(!sepolia.calldata_fee);

        assert_eq!(
            Network::from_chain_id(QUARKCHAIN_L2_TESTNET_CHAIN_ID).encoding,
            BlobEncoding::Compact
        );
        assert!(Network::from_chain_id(GALILEO_CHAIN_ID).calldata_fee);

        let unknown = Network::from_chain_id(1337);
        assert_eq!(unknown.name, "unknown");
        assert_eq!(unknown.chain_id, 1337);
        assert!(unknown.ethstorage_address.is_none());
    }

    fn env_config(flat_directory_address: Option<&str>) -> Config {
        Config {
            eth_rpc_url: "http://localhost:8545".to_string(),
            ethstorage_rpc_url: None,
            private_key: None,
            flat_directory_address: flat_directory_address.map(str::to_string),
            ethstorage_address: None,
            gas_increase_percentage: 20,
            upload_concurrency: 2,
            rpc_retry_base_delay: Duration::from_millis(100),
            rpc_retry_max_delay: Duration::from_secs(1),
            rpc_max_retries: 3,
        }
    }

    #[test]
    fn test_from_env_config() {
        let config = EthStorageConfig::try_from(&env_config(Some(
            "0x804C520d3c084C805E37A35E90057Ac32831F96f",
        )))
        .unwrap();
        assert_eq!(
            config.flat_directory_address,
            Some(address!("804C520d3c084C805E37A35E90057Ac32831F96f"))
        );
        assert_eq!(config.gas_increase_percentage, 20);
        assert_eq!(config.upload_concurrency, 2);

        let err = EthStorageConfig::try_from(&env_config(Some("0x1234"))).unwrap_err();
        assert!(err.to_string().contains("FLAT_DIRECTORY_ADDRESS"));
    }
}
