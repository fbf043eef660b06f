use thiserror::Error;

/// Errors produced while decoding, encoding or accessing bencode values.
///
/// Decode errors carry the byte offset at which the input stopped making
/// sense, see [`BencodeError::offset`].
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("invalid integer at offset {offset}: {reason}")]
    InvalidInteger { offset: usize, reason: &'static str },

    #[error("invalid string length at offset {offset}")]
    InvalidStringLength { offset: usize },

    #[error("unexpected byte 0x{byte:02x} at offset {offset}")]
    UnexpectedByte { offset: usize, byte: u8 },

    #[error("dictionary key at offset {offset} is not a byte string")]
    NonStringKey { offset: usize },

    #[error("trailing data after value at offset {offset}")]
    TrailingData { offset: usize },

    #[error("nesting too deep at offset {offset}")]
    NestingTooDeep { offset: usize },

    #[error("input exceeds limit of {limit} bytes")]
    LimitExceeded { limit: usize },

    #[error("missing key: {0}")]
    MissingKey(String),

    #[error("key {key} is not {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BencodeError {
    /// Byte offset of a decode failure, if the error came from the decoder.
    pub fn offset(&self) -> Option<usize> {
        match self {
            BencodeError::UnexpectedEof { offset }
            | BencodeError::InvalidInteger { offset, .. }
            | BencodeError::InvalidStringLength { offset }
            | BencodeError::UnexpectedByte { offset, .. }
            | BencodeError::NonStringKey { offset }
            | BencodeError::TrailingData { offset }
            | BencodeError::NestingTooDeep { offset } => Some(*offset),
            _ => None,
        }
    }
}
