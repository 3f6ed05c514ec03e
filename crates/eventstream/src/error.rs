use thiserror::Error;

/// Structural failures raised while decoding the binary event stream.
///
/// In lenient mode most of these trigger resynchronization instead of
/// surfacing to the caller; only [`DecodeError::CorruptionLimit`] is always
/// fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("prelude checksum mismatch: frame says {expected:#010x}, computed {computed:#010x}")]
    PreludeChecksum { expected: u32, computed: u32 },

    #[error("message checksum mismatch: frame says {expected:#010x}, computed {computed:#010x}")]
    MessageChecksum { expected: u32, computed: u32 },

    #[error("frame length {0} is below the 16 byte minimum")]
    FrameTooShort(u32),

    #[error("frame length {0} exceeds the 16 MiB limit")]
    FrameTooLarge(u32),

    #[error("header section of {header_len} bytes does not fit in a frame of {total_len} bytes")]
    HeaderOverrun { header_len: u32, total_len: u32 },

    #[error("unknown header value type {0}")]
    UnknownValueType(u8),

    #[error("header entry extends past the end of the header section")]
    TruncatedHeader,

    #[error("string header value is not valid UTF-8")]
    InvalidHeaderString,

    #[error("corruption budget exhausted after {0} recovery attempts")]
    CorruptionLimit(u32),
}

impl DecodeError {
    /// Whether the decoder can scan past this failure in lenient mode.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DecodeError::CorruptionLimit(_))
    }
}
