// KZG helper functions over alloy blobs
// Adapted from https://github.com/ralexstokes/ethereum-consensus/blob/main/ethereum-consensus/src/crypto/kzg.rs
use alloy::consensus::Blob;
use anyhow::Error;
use c_kzg::{Bytes48, KzgCommitment, KzgProof, KzgSettings};

/// Views an alloy blob as a c-kzg blob without copying its 128 KiB.
fn as_kzg_blob(blob: &Blob) -> &c_kzg::Blob {
    // SAFETY: both types are a bare `[u8; BYTES_PER_BLOB]`, `FixedBytes` is
    // `repr(transparent)` and `c_kzg::Blob` is `repr(C)`
    unsafe { &*std::ptr::from_ref(blob).cast::<c_kzg::Blob>() }
}

pub fn blob_to_kzg_commitment(
    blob: &Blob,
    kzg_settings: &KzgSettings,
) -> Result<KzgCommitment, Error> {
    Ok(kzg_settings.blob_to_kzg_commitment(as_kzg_blob(blob))?)
}

pub fn compute_blob_kzg_proof(
    blob: &Blob,
    commitment: &[u8],
    kzg_settings: &KzgSettings,
) -> Result<KzgProof, Error> {
    let commitment = Bytes48::from_bytes(commitment)?;

    Ok(kzg_settings.compute_blob_kzg_proof(as_kzg_blob(blob), &commitment)?)
}

pub fn verify_blob_kzg_proof(
    blob: &Blob,
    commitment: &[u8],
    proof: &[u8],
    kzg_settings: &KzgSettings,
) -> Result<bool, Error> {
    let commitment = Bytes48::from_bytes(commitment)?;
    let proof = Bytes48::from_bytes(proof)?;

    Ok(kzg_settings.verify_blob_kzg_proof(as_kzg_blob(blob), &commitment, &proof)?)
}
