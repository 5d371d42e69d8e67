use alloy::consensus::Blob;

use super::{
    constants::{BYTES_PER_FIELD_ELEMENT, ENCODING_VERSION, MAX_BLOB_DATA_SIZE, ROUNDS},
    error::BlobError,
    zeroed_blobs,
};

/// Compact bit-packed encoder. Fits 127 payload bytes into every 4 field elements.
pub struct BlobCoder<'a> {
    read_offset: usize,
    blob_offset: usize,
    blob: &'a mut [u8],
}

impl BlobCoder<'_> {
    /// Encodes `data` into `blob`, clearing whatever it held before.
    pub fn encode_into(data: &[u8], blob: &mut Blob) -> Result<(), BlobError> {
        let blob = blob.as_mut_slice();
        blob.fill(0);
        BlobCoder {
            read_offset: 0,
            blob_offset: 0,
            blob,
        }
        .encode_data(data)
    }

    /// Splits `data` into `MAX_BLOB_DATA_SIZE` pieces and encodes each into its own blob.
    pub fn encode_blobs(data: &[u8]) -> Result<Vec<Blob>, BlobError> {
        let pieces = data.chunks(MAX_BLOB_DATA_SIZE);
        let mut blobs = zeroed_blobs(pieces.len());
        for (piece, blob) in pieces.zip(blobs.iter_mut()) {
            BlobCoder::encode_into(piece, blob)?;
        }
        Ok(blobs)
    }

    fn read1(&mut self, data: &[u8]) -> u8 {
        if self.read_offset >= data.len() {
            return 0;
        }
        let r = data[self.read_offset];
        self.read_offset += 1;
        r
    }

    fn write_fe(&mut self, first_byte: u8, data31: &[u8; 31]) -> Result<(), BlobError> {
        if self.blob_offset % BYTES_PER_FIELD_ELEMENT != 0 {
            return Err(BlobError::Misaligned {
                what: "tag write",
                offset: self.blob_offset,
            });
        }
        self.blob[self.blob_offset] = first_byte;
        self.blob_offset += 1;

        if self.blob_offset % BYTES_PER_FIELD_ELEMENT != 1 {
            return Err(BlobError::Misaligned {
                what: "segment write",
                offset: self.blob_offset,
            });
        }
        self.blob[self.blob_offset..self.blob_offset + 31].copy_from_slice(data31);
        self.blob_offset += 31;
        Ok(())
    }

    fn read31(&mut self, data: &[u8]) -> [u8; 31] {
        let mut result = [0u8; 31];
        let available_bytes = data.len().saturating_sub(self.read_offset).min(31);
        result[..available_bytes]
            .copy_from_slice(&data[self.read_offset..self.read_offset + available_bytes]);
        self.read_offset += available_bytes;
        result
    }

    // Each round performs 7 reads of input of lengths (31,1,31,1,31,1,31) bytes, 127 bytes in
    // total, and writes them into the next 4 field elements. The 4x31 byte chunks land in bytes
    // [1:32] of their field element. The three single bytes (24 bits) are split into 4x6-bit tags
    // written into byte 0 of each field element, so the top 2 bits always stay clear of the
    // field modulus. Up to 1024 rounds.
    //
    // Only for the very first field element, bytes [1:5] carry the version and the 3-byte
    // big-endian length of the data.
    fn encode_data(mut self, data: &[u8]) -> Result<(), BlobError> {
        if data.is_empty() {
            return Err(BlobError::EmptyInput);
        }
        if data.len() > MAX_BLOB_DATA_SIZE {
            return Err(BlobError::InputTooLarge {
                got: data.len(),
                maximum: MAX_BLOB_DATA_SIZE,
            });
        }

        let mut buf31 = [0u8; 31];

        for round in 0..ROUNDS {
            if self.read_offset >= data.len() {
                break;
            }

            // First FE
            if round == 0 {
                buf31[0] = ENCODING_VERSION;
                let ilen = u32::try_from(data.len()).map_err(|_| BlobError::InputTooLarge {
                    got: data.len(),
                    maximum: MAX_BLOB_DATA_SIZE,
                })?;
                buf31[1..4].copy_from_slice(&ilen.to_be_bytes()[1..]);
                let to_read = data.len().min(27); // 27 = 31 - 4
                buf31[4..4 + to_read].copy_from_slice(&data[..to_read]);
                self.read_offset += to_read;
            } else {
                buf31 = self.read31(data);
            }

            let x = self.read1(data);
            self.write_fe(x & 0b0011_1111, &buf31)?;

            // Second FE
            buf31 = self.read31(data);
            let y = self.read1(data);
            self.write_fe((y & 0b0000_1111) | ((x & 0b1100_0000) >> 2), &buf31)?;

            // Third FE
            buf31 = self.read31(data);
            let z = self.read1(data);
            self.write_fe(z & 0b0011_1111, &buf31)?;

            // Fourth FE
            buf31 = self.read31(data);
            self.write_fe(((z & 0b1100_0000) >> 2) | ((y & 0b1111_0000) >> 4), &buf31)?;
        }

        if self.read_offset < data.len() {
            return Err(BlobError::DataDidNotFit {
                read_offset: self.read_offset,
                data_len: data.len(),
            });
        }

        Ok(())
    }
}
