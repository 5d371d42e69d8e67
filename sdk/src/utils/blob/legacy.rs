//! Legacy padded blob layout.
//!
//! Every 32-byte field element carries 31 bytes of payload at offsets `[1:32]`; byte 0 stays
//! `0x00` so the element is always below the BLS12-381 scalar field modulus. There is no length
//! prefix: decoding strips trailing zero bytes, which means payloads that genuinely end in zero
//! bytes do not survive a round trip.

use alloy::consensus::Blob;

use super::{
    constants::{
        BLOB_SIZE, BYTES_PER_FIELD_ELEMENT, FIELD_ELEMENTS_PER_BLOB,
        LEGACY_BYTES_PER_FIELD_ELEMENT, LEGACY_MAX_BLOB_DATA_SIZE,
    },
    error::BlobError,
    zeroed_blobs,
};

pub fn encode_blobs(data: &[u8]) -> Vec<Blob> {
    let pieces = data.chunks(LEGACY_MAX_BLOB_DATA_SIZE);
    let mut blobs = zeroed_blobs(pieces.len());
    for (piece, blob) in pieces.zip(blobs.iter_mut()) {
        write_payload(piece, blob.as_mut_slice());
    }
    blobs
}

/// Encodes one blob worth of `data` into `blob`, clearing whatever it held before.
pub fn encode_into(data: &[u8], blob: &mut Blob) -> Result<(), BlobError> {
    if data.len() > LEGACY_MAX_BLOB_DATA_SIZE {
        return Err(BlobError::InputTooLarge {
            got: data.len(),
            maximum: LEGACY_MAX_BLOB_DATA_SIZE,
        });
    }
    let blob = blob.as_mut_slice();
    blob.fill(0);
    write_payload(data, blob);
    Ok(())
}

fn write_payload(data: &[u8], blob: &mut [u8]) {
    for (field_index, stride) in data.chunks(LEGACY_BYTES_PER_FIELD_ELEMENT).enumerate() {
        let offset = field_index * BYTES_PER_FIELD_ELEMENT + 1;
        blob[offset..offset + stride.len()].copy_from_slice(stride);
    }
}

pub fn decode_blob(blob: &[u8]) -> Result<Vec<u8>, BlobError> {
    if blob.len() != BLOB_SIZE {
        return Err(BlobError::InvalidBlobSize(blob.len()));
    }

    let mut data = Vec::with_capacity(LEGACY_MAX_BLOB_DATA_SIZE);
    for field_index in 0..FIELD_ELEMENTS_PER_BLOB {
        let offset = field_index * BYTES_PER_FIELD_ELEMENT;
        if blob[offset] != 0 {
            return Err(BlobError::InvalidFieldElement(offset));
        }
        data.extend_from_slice(&blob[offset + 1..offset + BYTES_PER_FIELD_ELEMENT]);
    }

    let len = data
        .iter()
        .rposition(|byte| *byte != 0)
        .map_or(0, |last| last + 1);
    data.truncate(len);
    Ok(data)
}

pub fn decode_blobs(blobs: &[Blob]) -> Result<Vec<u8>, BlobError> {
    let mut result = Vec::new();
    for blob in blobs {
        result.extend(decode_blob(blob.as_slice())?);
    }
    Ok(result)
}
