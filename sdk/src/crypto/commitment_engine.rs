use std::sync::Arc;

use alloy::{
    consensus::Blob,
    eips::eip4844::Bytes48,
    primitives::B256,
};
use anyhow::Error;
use c_kzg::KzgSettings;
#[cfg(test)]
use mockall::automock;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use super::kzg;

const VERSIONED_HASH_VERSION_KZG: u8 = 0x01;
/// Bytes of the versioned hash the storage contract keeps per chunk.
pub const STORAGE_HASH_LEN: usize = 24;

/// Polynomial commitment scheme used to authenticate blob contents.
#[cfg_attr(test, automock)]
pub trait CommitmentBackend: Send + Sync {
    fn commitment(&self, blob: &Blob) -> Result<Bytes48, Error>;
    fn proof(&self, blob: &Blob, commitment: &Bytes48) -> Result<Bytes48, Error>;
    fn verify(&self, blob: &Blob, commitment: &Bytes48, proof: &Bytes48) -> Result<bool, Error>;
}

/// KZG over the Ethereum mainnet trusted setup.
pub struct CKzgBackend {
    settings: &'static KzgSettings,
}

impl CKzgBackend {
    pub fn ethereum() -> Self {
        Self {
            settings: c_kzg::ethereum_kzg_settings(0),
        }
    }
}

impl CommitmentBackend for CKzgBackend {
    fn commitment(&self, blob: &Blob) -> Result<Bytes48, Error> {
        let commitment = kzg::blob_to_kzg_commitment(blob, self.settings)?;
        Ok(Bytes48::from(*commitment.to_bytes()))
    }

    fn proof(&self, blob: &Blob, commitment: &Bytes48) -> Result<Bytes48, Error> {
        let proof = kzg::compute_blob_kzg_proof(blob, commitment.as_slice(), self.settings)?;
        Ok(Bytes48::from(*proof.to_bytes()))
    }

    fn verify(&self, blob: &Blob, commitment: &Bytes48, proof: &Bytes48) -> Result<bool, Error> {
        kzg::verify_blob_kzg_proof(
            blob,
            commitment.as_slice(),
            proof.as_slice(),
            self.settings,
        )
    }
}

/// Where CPU bound commitment work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComputeMode {
    /// On the calling task.
    InProcess,
    /// On tokio's blocking thread pool.
    #[default]
    Blocking,
    /// Batches fan out over the rayon pool from a blocking thread.
    Parallel,
}

type BackendLoader = Arc<dyn Fn() -> Result<Arc<dyn CommitmentBackend>, Error> + Send + Sync>;

/// Owns a lazily loaded [`CommitmentBackend`].
///
/// The loader runs at most once until [`CommitmentEngine::close`] is called. Callers racing on
/// the first use wait for the same load instead of starting their own.
pub struct CommitmentEngine {
    backend: Mutex<Option<Arc<dyn CommitmentBackend>>>,
    loader: BackendLoader,
    mode: ComputeMode,
}

impl CommitmentEngine {
    pub fn new(mode: ComputeMode) -> Self {
        Self::with_loader(mode, || {
            Ok(Arc::new(CKzgBackend::ethereum()) as Arc<dyn CommitmentBackend>)
        })
    }

    pub fn with_loader<F>(mode: ComputeMode, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn CommitmentBackend>, Error> + Send + Sync + 'static,
    {
        Self {
            backend: Mutex::new(None),
            loader: Arc::new(loader),
            mode,
        }
    }

    pub fn mode(&self) -> ComputeMode {
        self.mode
    }

    pub async fn is_initialized(&self) -> bool {
        self.backend.lock().await.is_some()
    }

    async fn backend(&self) -> Result<Arc<dyn CommitmentBackend>, Error> {
        let mut guard = self.backend.lock().await;
        if let Some(backend) = guard.as_ref() {
            return Ok(backend.clone());
        }

        debug!("Loading commitment backend");
        let loader = self.loader.clone();
        let backend = tokio::task::spawn_blocking(move || loader()).await??;
        *guard = Some(backend.clone());
        Ok(backend)
    }

    async fn run<T, F>(&self, job: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn CommitmentBackend>) -> Result<T, Error> + Send + 'static,
    {
        let backend = self.backend().await?;
        match self.mode {
            ComputeMode::InProcess => job(backend),
            ComputeMode::Blocking | ComputeMode::Parallel => {
                tokio::task::spawn_blocking(move || job(backend)).await?
            }
        }
    }

    pub async fn commit(&self, blob: &Blob) -> Result<Bytes48, Error> {
        self.commit_batch(std::slice::from_ref(blob))
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("No commitment computed"))
    }

    pub async fn prove(&self, blob: &Blob, commitment: &Bytes48) -> Result<Bytes48, Error> {
        self.prove_batch(std::slice::from_ref(blob), std::slice::from_ref(commitment))
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("No proof computed"))
    }

    pub async fn verify(
        &self,
        blob: &Blob,
        commitment: &Bytes48,
        proof: &Bytes48,
    ) -> Result<bool, Error> {
        let blobs = std::slice::from_ref(blob).to_vec();
        let (commitment, proof) = (*commitment, *proof);
        self.run(move |backend| match blobs.first() {
            Some(blob) => backend.verify(blob, &commitment, &proof),
            None => Ok(false),
        })
        .await
    }

    /// Blobs are copied straight into a heap buffer the worker owns, never through the stack.
    pub async fn commit_batch(&self, blobs: &[Blob]) -> Result<Vec<Bytes48>, Error> {
        let blobs = blobs.to_vec();
        let parallel = self.mode == ComputeMode::Parallel;
        self.run(move |backend| {
            if parallel {
                blobs.par_iter().map(|blob| backend.commitment(blob)).collect()
            } else {
                blobs.iter().map(|blob| backend.commitment(blob)).collect()
            }
        })
        .await
    }

    pub async fn prove_batch(
        &self,
        blobs: &[Blob],
        commitments: &[Bytes48],
    ) -> Result<Vec<Bytes48>, Error> {
        if blobs.len() != commitments.len() {
            return Err(anyhow::anyhow!(
                "Got {} blobs but {} commitments",
                blobs.len(),
                commitments.len()
            ));
        }
        let blobs = blobs.to_vec();
        let commitments = commitments.to_vec();
        let parallel = self.mode == ComputeMode::Parallel;
        self.run(move |backend| {
            if parallel {
                blobs
                    .par_iter()
                    .zip(commitments.par_iter())
                    .map(|(blob, commitment)| backend.proof(blob, commitment))
                    .collect()
            } else {
                blobs
                    .iter()
                    .zip(&commitments)
                    .map(|(blob, commitment)| backend.proof(blob, commitment))
                    .collect()
            }
        })
        .await
    }

    /// `0x01 || sha256(commitment)[1..32]`
    pub fn versioned_hash(commitment: &Bytes48) -> B256 {
        let mut hash: [u8; 32] = Sha256::digest(commitment.as_slice()).into();
        hash[0] = VERSIONED_HASH_VERSION_KZG;
        B256::from(hash)
    }

    /// Versioned hash cut to its first 24 bytes and right padded with zeros, the form the
    /// storage contract returns from its hash getters.
    pub fn storage_hash(commitment: &Bytes48) -> B256 {
        let versioned = Self::versioned_hash(commitment);
        let mut hash = [0u8; 32];
        hash[..STORAGE_HASH_LEN].copy_from_slice(&versioned[..STORAGE_HASH_LEN]);
        B256::from(hash)
    }

    /// Drops the backend. Safe to call repeatedly or before first use; the next operation
    /// loads a fresh backend.
    pub async fn close(&self) {
        if self.backend.lock().await.take().is_some() {
            debug!("Commitment backend released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{fake_backend, fake_commitment, on_small_stack},
        utils::blob::{BlobEncoding, zeroed_blobs},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_engine(mode: ComputeMode) -> (Arc<CommitmentEngine>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let engine = CommitmentEngine::with_loader(mode, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(fake_backend())
        });
        (Arc::new(engine), loads)
    }

    fn sample_blobs(bytes: &[u8]) -> Vec<Blob> {
        let mut blobs = zeroed_blobs(bytes.len());
        for (blob, byte) in blobs.iter_mut().zip(bytes) {
            blob[1..49].fill(*byte);
        }
        blobs
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_loads_once() {
        let (engine, loads) = counting_engine(ComputeMode::Blocking);
        let blobs = Arc::new(sample_blobs(&[7]));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let blobs = blobs.clone();
                tokio::spawn(async move { engine.commit(&blobs[0]).await })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(engine.is_initialized().await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (engine, loads) = counting_engine(ComputeMode::InProcess);

        engine.close().await;
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        let blobs = sample_blobs(&[1, 2]);
        engine.commit(&blobs[0]).await.unwrap();
        engine.close().await;
        engine.close().await;
        assert!(!engine.is_initialized().await);

        engine.commit(&blobs[1]).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_batch_modes_agree() {
        let blobs = sample_blobs(&[1, 2, 3]);
        let mut outputs = Vec::new();
        for mode in [ComputeMode::InProcess, ComputeMode::Blocking, ComputeMode::Parallel] {
            let (engine, _) = counting_engine(mode);
            let commitments = engine.commit_batch(&blobs).await.unwrap();
            let proofs = engine.prove_batch(&blobs, &commitments).await.unwrap();
            outputs.push((commitments, proofs));
        }
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[1], outputs[2]);
        assert_eq!(outputs[0].0[2], fake_commitment(&blobs[2]));
    }

    #[tokio::test]
    async fn test_prove_batch_length_mismatch() {
        let (engine, _) = counting_engine(ComputeMode::InProcess);
        let err = engine
            .prove_batch(&sample_blobs(&[1]), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 blobs but 0 commitments"));
    }

    #[tokio::test]
    async fn test_backend_failure_is_returned() {
        let engine = CommitmentEngine::with_loader(ComputeMode::Blocking, || {
            let mut backend = MockCommitmentBackend::new();
            backend
                .expect_commitment()
                .times(1)
                .returning(|_| Err(anyhow::anyhow!("invalid blob")));
            backend.expect_proof().never();
            Ok(Arc::new(backend) as Arc<dyn CommitmentBackend>)
        });
        let err = engine.commit_batch(&sample_blobs(&[1, 2])).await.unwrap_err();
        assert!(err.to_string().contains("invalid blob"));
    }

    #[test]
    fn test_hash_forms() {
        let commitment = Bytes48::repeat_byte(0xab);
        let versioned = CommitmentEngine::versioned_hash(&commitment);
        assert_eq!(
            versioned,
            alloy::eips::eip4844::kzg_to_versioned_hash(commitment.as_slice())
        );
        assert_eq!(versioned[0], 0x01);

        let storage = CommitmentEngine::storage_hash(&commitment);
        assert_eq!(&storage[..24], &versioned[..24]);
        assert!(storage[24..].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_kzg_commit_prove_verify() {
        let engine = CommitmentEngine::new(ComputeMode::Blocking);
        let blobs = BlobEncoding::Compact.encode(b"kzg backed blob").unwrap();
        let blob = &blobs[0];

        let commitment = engine.commit(blob).await.unwrap();
        let proof = engine.prove(blob, &commitment).await.unwrap();
        assert!(engine.verify(blob, &commitment, &proof).await.unwrap());

        let other = &BlobEncoding::Compact.encode(b"another blob").unwrap()[0];
        let other_commitment = engine.commit(other).await.unwrap();
        assert!(!engine.verify(blob, &other_commitment, &proof).await.unwrap());

        engine.close().await;
    }

    #[test]
    fn test_single_blob_operations_fit_a_small_stack() {
        on_small_stack(|| async {
            let (engine, _) = counting_engine(ComputeMode::InProcess);
            let blobs = BlobEncoding::Compact.encode(&[3u8; 100_000]).unwrap();

            let commitment = engine.commit(&blobs[0]).await.unwrap();
            let proof = engine.prove(&blobs[0], &commitment).await.unwrap();
            assert!(engine.verify(&blobs[0], &commitment, &proof).await.unwrap());
            assert_eq!(commitment, fake_commitment(&blobs[0]));
        });
    }
}
