// Client library for EthStorage flat directories and the EthStorage key-value contract
pub mod crypto;
pub mod ethereum_l1;
pub mod metrics;
pub mod shared;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use ethereum_l1::config::EthStorageConfig;
pub use storage::{FlatDirectory, KvStore, StorageError};
