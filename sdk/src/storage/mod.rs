pub mod chunk_planner;
pub mod diff;
pub mod download;
pub mod error;
pub mod flat_directory;
pub mod kv_store;
pub mod types;
pub mod upload;

pub use download::DownloadOrchestrator;
pub use error::StorageError;
pub use flat_directory::FlatDirectory;
pub use kv_store::KvStore;
pub use types::{
    CostEstimate, DownloadEvent, UploadEvent, UploadMode, UploadRequest, UploadResult,
};
pub use upload::{UploadOrchestrator, UploadSettings};
