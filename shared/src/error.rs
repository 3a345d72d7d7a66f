//! Errors raised while encoding or decoding wire packets

use thiserror::Error;

/// Failure to turn bytes into a packet or a packet into bytes.
///
/// Every variant means the packet is rejected as a whole; callers never act
/// on a partially decoded packet.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("payload of {size} bytes exceeds the maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),

    #[error("checksum mismatch: packet carries {received:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { received: u32, computed: u32 },

    #[error("tried to read {needed} bytes at offset {offset}, but the payload is {size} bytes")]
    Truncated {
        offset: usize,
        needed: usize,
        size: usize,
    },

    #[error("payload text is not valid UTF-8")]
    InvalidText,

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}
