pub const FIELD_ELEMENTS_PER_BLOB: usize = 4096;
pub const BYTES_PER_FIELD_ELEMENT: usize = 32;
pub const BLOB_SIZE: usize = FIELD_ELEMENTS_PER_BLOB * BYTES_PER_FIELD_ELEMENT; // 131072 bytes

// Legacy padded scheme: the top byte of each field element is left as 0x00
pub const LEGACY_BYTES_PER_FIELD_ELEMENT: usize = 31;
pub const LEGACY_MAX_BLOB_DATA_SIZE: usize =
    LEGACY_BYTES_PER_FIELD_ELEMENT * FIELD_ELEMENTS_PER_BLOB; // 126976 bytes

// Compact bit-packed scheme
pub const DATA_LENGTH_SIZE: usize = 4; // number of bytes to store the version and data length
pub const DATA_WRITTEN_PER_ROUND: usize = 4 * 31 + 3; // number of bytes written per encode/decode round
pub const ROUNDS: usize = 1024; // number of encode/decode rounds
pub const MAX_BLOB_DATA_SIZE: usize = DATA_WRITTEN_PER_ROUND * ROUNDS - DATA_LENGTH_SIZE; // 130044 bytes
pub const ENCODING_VERSION: u8 = 0;
pub const VERSION_OFFSET: usize = 1; // offset of the version byte in the blob encoding

/// Hard protocol ceiling of blobs carried by one transaction.
pub const MAX_BLOBS_PER_TX: usize = 3;
