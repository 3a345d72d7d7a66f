//! Fixed-layout binary codec shared by both transports
//!
//! Structures are encoded with bincode's default options: fixed-width
//! integers, little-endian, no padding and no length prefix for arrays. A
//! struct made only of integers, floats and fixed arrays therefore maps to a
//! byte layout identical to a packed C struct, which is what the wire format
//! expects.
//!
//! Decoding never streams: the caller must already hold exactly the number of
//! bytes the structure occupies.

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Number of bytes a fixed-layout structure occupies on the wire.
pub trait WireSize {
    const WIRE_SIZE: usize;
}

/// Serializes a fixed-layout structure into a buffer of exactly its wire size.
pub fn serialize<T: Serialize + WireSize>(value: &T) -> Result<Vec<u8>, CodecError> {
    serialize_with_size(value, T::WIRE_SIZE)
}

/// Serializes `value` into a buffer of exactly `size` bytes.
///
/// The encoded structure occupies the front of the buffer and the remainder
/// is zeroed, leaving room for a variable-length payload that the caller
/// copies in afterwards. Fails if the structure does not fit.
pub fn serialize_with_size<T: Serialize>(value: &T, size: usize) -> Result<Vec<u8>, CodecError> {
    let mut bytes = bincode::serialize(value)?;
    if bytes.len() > size {
        return Err(CodecError::SizeMismatch {
            expected: size,
            actual: bytes.len(),
        });
    }
    bytes.resize(size, 0);
    Ok(bytes)
}

/// Deserializes a structure from a buffer that must be exactly `expected_size` bytes.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8], expected_size: usize) -> Result<T, CodecError> {
    if bytes.len() != expected_size {
        return Err(CodecError::SizeMismatch {
            expected: expected_size,
            actual: bytes.len(),
        });
    }
    Ok(bincode::deserialize(bytes)?)
}

/// Bounds-checked cursor over a variable-length payload.
///
/// Every read verifies the remaining length first, so a malformed length
/// prefix surfaces as [`CodecError::Truncated`] instead of an out-of-range slice.
pub struct PayloadReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        let end = self.offset + needed;
        if end > self.bytes.len() {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed,
                size: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads one fixed-layout structure.
    pub fn read<T: DeserializeOwned + WireSize>(&mut self) -> Result<T, CodecError> {
        let bytes = self.take(T::WIRE_SIZE)?;
        deserialize(bytes, T::WIRE_SIZE)
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails if bytes are left over after a fixed-shape payload.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::SizeMismatch {
                expected: self.offset,
                actual: self.bytes.len(),
            })
        }
    }
}
