use alloy::consensus::Blob;

use super::{
    constants::{
        BLOB_SIZE, BYTES_PER_FIELD_ELEMENT, ENCODING_VERSION, MAX_BLOB_DATA_SIZE, ROUNDS,
        VERSION_OFFSET,
    },
    error::BlobError,
};

/// Inverse of [`super::blob_coder::BlobCoder`].
pub struct BlobDecoder {
    read_offset: usize,
    data_offset: usize,
    data: Vec<u8>,
}

impl BlobDecoder {
    pub fn decode_blob(blob: &[u8]) -> Result<Vec<u8>, BlobError> {
        BlobDecoder::new().decode(blob)
    }

    pub fn decode_blobs(blobs: &[Blob]) -> Result<Vec<u8>, BlobError> {
        let mut result = Vec::with_capacity(blobs.len() * MAX_BLOB_DATA_SIZE);
        for blob in blobs {
            result.extend(Self::decode_blob(blob.as_slice())?);
        }
        Ok(result)
    }

    fn new() -> Self {
        Self {
            read_offset: 0,
            data_offset: 0,
            data: vec![0u8; MAX_BLOB_DATA_SIZE],
        }
    }

    fn decode(mut self, blob: &[u8]) -> Result<Vec<u8>, BlobError> {
        if blob.len() != BLOB_SIZE {
            return Err(BlobError::InvalidBlobSize(blob.len()));
        }

        if blob[VERSION_OFFSET] != ENCODING_VERSION {
            return Err(BlobError::InvalidVersion {
                want: ENCODING_VERSION,
                got: blob[VERSION_OFFSET],
            });
        }

        // ROUND 0
        // 3-byte big-endian length in bytes [2..=4]
        let output_len = u32::from_be_bytes([0, blob[2], blob[3], blob[4]]) as usize;
        if output_len > MAX_BLOB_DATA_SIZE {
            return Err(BlobError::InvalidLength {
                got: output_len,
                maximum: MAX_BLOB_DATA_SIZE,
            });
        }

        self.data[0..27].copy_from_slice(&blob[5..32]);

        self.data_offset = 28;
        self.read_offset = 32;

        let mut encoded_byte = [0u8; 4];
        encoded_byte[0] = blob[0];
        if encoded_byte[0] & 0b1100_0000 != 0 {
            return Err(BlobError::InvalidFieldElement(0));
        }

        for byte in encoded_byte.iter_mut().skip(1) {
            *byte = self.decode_fe(blob)?;
        }

        self.restore_control_bytes(encoded_byte);

        for _ in 1..ROUNDS {
            if self.data_offset >= output_len {
                break;
            }

            for byte in &mut encoded_byte {
                *byte = self.decode_fe(blob)?;
            }
            self.restore_control_bytes(encoded_byte);
        }

        if self.data.iter().skip(output_len).any(|byte| *byte != 0) {
            return Err(BlobError::ExtraneousData("decoded past the length prefix"));
        }

        if blob.iter().skip(self.read_offset).any(|byte| *byte != 0) {
            return Err(BlobError::ExtraneousData("blob holds data past the last round"));
        }

        self.data.truncate(output_len);
        Ok(self.data)
    }

    fn decode_fe(&mut self, blob: &[u8]) -> Result<u8, BlobError> {
        if self.read_offset % BYTES_PER_FIELD_ELEMENT != 0 {
            return Err(BlobError::Misaligned {
                what: "tag read",
                offset: self.read_offset,
            });
        }
        let result = blob[self.read_offset];
        if result & 0b1100_0000 != 0 {
            return Err(BlobError::InvalidFieldElement(self.read_offset));
        }

        self.data[self.data_offset..self.data_offset + 31]
            .copy_from_slice(&blob[self.read_offset + 1..self.read_offset + 32]);

        self.data_offset += 32;
        self.read_offset += 32;

        Ok(result)
    }

    fn restore_control_bytes(&mut self, encoded_byte: [u8; 4]) {
        self.data_offset -= 1;

        let x = (encoded_byte[0] & 0b0011_1111) | ((encoded_byte[1] & 0b0011_0000) << 2);
        let y = (encoded_byte[1] & 0b0000_1111) | ((encoded_byte[3] & 0b0000_1111) << 4);
        let z = (encoded_byte[2] & 0b0011_1111) | ((encoded_byte[3] & 0b0011_0000) << 2);

        self.data[self.data_offset - 32] = z;
        self.data[self.data_offset - (32 * 2)] = y;
        self.data[self.data_offset - (32 * 3)] = x;
    }
}
