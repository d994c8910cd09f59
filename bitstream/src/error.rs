//! Error types for bitstream operations.

use std::fmt;

/// Result type for bitstream operations.
pub type BitResult<T> = Result<T, BitError>;

/// Errors that can occur during bit-level encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitError {
    /// Attempted to read past the end of the buffer.
    EndOfBuffer {
        /// Number of bits requested.
        requested: usize,
        /// Number of bits available.
        available: usize,
    },

    /// Attempted to write more bits than the buffer can hold.
    BufferOverflow {
        /// Number of bits attempted to write.
        attempted: usize,
        /// Remaining capacity in bits.
        capacity: usize,
    },

    /// Invalid bit count for the operation.
    InvalidBitCount {
        /// The invalid bit count provided.
        bits: u32,
        /// Maximum allowed bits for this operation.
        max_bits: u32,
    },

    /// Value exceeds the range representable by the specified number of bits.
    ValueOutOfRange {
        /// The value that was out of range.
        value: u32,
        /// Number of bits available.
        bits: u32,
    },

    /// Integer outside the closed range declared by the schema.
    IntegerOutOfRange {
        /// The offending value.
        value: i64,
        /// Declared minimum.
        min: i32,
        /// Declared maximum.
        max: i32,
    },

    /// String longer than the declared maximum.
    StringTooLong {
        /// Length of the string in bytes.
        len: usize,
        /// Declared maximum length.
        max: usize,
    },

    /// String bytes were not valid UTF-8.
    InvalidUtf8,

    /// Unknown address type tag.
    InvalidAddressType {
        /// The tag that was read.
        tag: u32,
    },

    /// Byte-level operation attempted at a non byte-aligned position.
    MisalignedAccess {
        /// Current bit position.
        bit_position: usize,
    },

    /// Alignment padding contained set bits.
    NonZeroPadding,
}

impl fmt::Display for BitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfBuffer {
                requested,
                available,
            } => {
                write!(
                    f,
                    "attempted to read {requested} bits but only {available} bits available"
                )
            }
            Self::BufferOverflow {
                attempted,
                capacity,
            } => {
                write!(
                    f,
                    "attempted to write {attempted} bits but buffer capacity is {capacity} bits"
                )
            }
            Self::InvalidBitCount { bits, max_bits } => {
                write!(f, "invalid bit count {bits}, maximum allowed is {max_bits}")
            }
            Self::ValueOutOfRange { value, bits } => {
                write!(f, "value {value} cannot be represented in {bits} bits")
            }
            Self::IntegerOutOfRange { value, min, max } => {
                write!(f, "integer {value} outside declared range [{min}, {max}]")
            }
            Self::StringTooLong { len, max } => {
                write!(f, "string of {len} bytes exceeds maximum length {max}")
            }
            Self::InvalidUtf8 => write!(f, "string bytes are not valid utf-8"),
            Self::InvalidAddressType { tag } => write!(f, "invalid address type {tag}"),
            Self::MisalignedAccess { bit_position } => {
                write!(f, "byte access at unaligned bit position {bit_position}")
            }
            Self::NonZeroPadding => write!(f, "alignment padding bits are not zero"),
        }
    }
}

impl std::error::Error for BitError {}
