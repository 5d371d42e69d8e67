pub mod blob_coder;
pub mod blob_decoder;
pub mod constants;
mod error;
pub mod legacy;

use alloy::consensus::Blob;

pub use error::BlobError;

use blob_coder::BlobCoder;
use blob_decoder::BlobDecoder;
use constants::{LEGACY_MAX_BLOB_DATA_SIZE, MAX_BLOB_DATA_SIZE};

/// `count` zeroed blobs in one heap allocation. Encoders fill them in place so no blob is
/// ever moved by value.
pub fn zeroed_blobs(count: usize) -> Vec<Blob> {
    vec![Blob::ZERO; count]
}

/// How user bytes are laid out inside a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobEncoding {
    /// 31 bytes per field element, zero padded, no length prefix.
    Legacy,
    /// Bit-packed layout with a version byte and length prefix.
    Compact,
}

impl BlobEncoding {
    /// Payload bytes that fit in a single blob.
    pub const fn max_payload(&self) -> usize {
        match self {
            BlobEncoding::Legacy => LEGACY_MAX_BLOB_DATA_SIZE,
            BlobEncoding::Compact => MAX_BLOB_DATA_SIZE,
        }
    }

    pub fn encode(&self, data: &[u8]) -> Result<Vec<Blob>, BlobError> {
        match self {
            BlobEncoding::Legacy => Ok(legacy::encode_blobs(data)),
            BlobEncoding::Compact => BlobCoder::encode_blobs(data),
        }
    }

    /// Encodes at most [`Self::max_payload`] bytes into an existing blob, overwriting it.
    pub fn encode_into(&self, data: &[u8], blob: &mut Blob) -> Result<(), BlobError> {
        match self {
            BlobEncoding::Legacy => legacy::encode_into(data, blob),
            BlobEncoding::Compact => BlobCoder::encode_into(data, blob),
        }
    }

    pub fn decode(&self, blob: &[u8]) -> Result<Vec<u8>, BlobError> {
        match self {
            BlobEncoding::Legacy => legacy::decode_blob(blob),
            BlobEncoding::Compact => BlobDecoder::decode_blob(blob),
        }
    }

    pub fn decode_many(&self, blobs: &[Blob]) -> Result<Vec<u8>, BlobError> {
        match self {
            BlobEncoding::Legacy => legacy::decode_blobs(blobs),
            BlobEncoding::Compact => BlobDecoder::decode_blobs(blobs),
        }
    }
}
