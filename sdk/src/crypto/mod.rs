pub mod commitment_engine;
pub mod kzg;

pub use commitment_engine::{CKzgBackend, CommitmentBackend, CommitmentEngine, ComputeMode};
