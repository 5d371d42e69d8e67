/// Errors raised while packing bytes into blobs or unpacking them again.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BlobError {
    #[error("cannot encode empty data")]
    EmptyInput,
    #[error("too much data to encode in one blob: len={got}, maximum={maximum}")]
    InputTooLarge { got: usize, maximum: usize },
    #[error("data did not fit in blob: read_offset={read_offset}, data_len={data_len}")]
    DataDidNotFit { read_offset: usize, data_len: usize },
    #[error("invalid blob size: {0}")]
    InvalidBlobSize(usize),
    #[error("invalid encoding version: want={want}, got={got}")]
    InvalidVersion { want: u8, got: u8 },
    #[error("invalid length: got={got}, exceeds maximum={maximum}")]
    InvalidLength { got: usize, maximum: usize },
    #[error("extraneous data: {0}")]
    ExtraneousData(&'static str),
    #[error("invalid field element at offset {0} (overflow in high bits)")]
    InvalidFieldElement(usize),
    #[error("{what} offset {offset} is not aligned to a field element boundary")]
    Misaligned { what: &'static str, offset: usize },
}
