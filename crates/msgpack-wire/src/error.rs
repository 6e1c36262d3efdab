#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("cannot encode non-finite float")]
    NonFiniteFloat,
    #[error("integer {0} does not fit a 64-bit wire integer")]
    IntegerOutOfRange(i128),
    #[error("length {0} exceeds the 32-bit length header")]
    LengthOverflow(usize),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum DecodeError {
    /// More bytes are needed. The streaming decoder handles this internally and
    /// never surfaces it from [`crate::Decoder::push`].
    #[error("incomplete value")]
    Incomplete,
    #[error("malformed stream: unsupported tag 0x{tag:02x} at offset {offset}")]
    Malformed { tag: u8, offset: usize },
}

impl DecodeError {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, DecodeError::Incomplete)
    }
}
