//! Bit-level writer for encoding packed binary data.

use crate::error::{BitError, BitResult};

/// A bit-level writer over a fixed-capacity buffer.
///
/// Bits are packed least-significant first into 32-bit words which are stored
/// little-endian, so byte-aligned values come out in little-endian order.
/// Call [`finish`](Self::finish) to flush the partial word and get the bytes
/// actually written.
#[derive(Debug)]
pub struct BitWriter {
    /// Backing storage, length is always a multiple of 4.
    buf: Vec<u8>,
    /// Pending bits not yet stored in `buf`.
    scratch: u64,
    /// Number of valid bits in `scratch` (0-31 between calls).
    scratch_bits: u32,
    /// Next word to store.
    word_index: usize,
    bits_written: usize,
    num_bits: usize,
}

impl BitWriter {
    /// Creates a writer able to hold `capacity` bytes.
    ///
    /// The capacity is rounded up to a whole number of 32-bit words.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let words = capacity.div_ceil(4);
        Self {
            buf: vec![0; words * 4],
            scratch: 0,
            scratch_bits: 0,
            word_index: 0,
            bits_written: 0,
            num_bits: capacity * 8,
        }
    }

    /// Returns the number of bits written so far.
    #[must_use]
    pub const fn bits_written(&self) -> usize {
        self.bits_written
    }

    /// Returns the number of bits that can still be written.
    #[must_use]
    pub const fn bits_available(&self) -> usize {
        self.num_bits - self.bits_written
    }

    /// Returns the number of bytes touched so far (partial bytes included).
    #[must_use]
    pub const fn bytes_written(&self) -> usize {
        self.bits_written.div_ceil(8)
    }

    /// Returns the number of bits needed to reach the next byte boundary.
    #[must_use]
    pub const fn align_bits(&self) -> u32 {
        ((8 - self.bits_written % 8) % 8) as u32
    }

    /// Writes a single bit.
    pub fn write_bool(&mut self, value: bool) -> BitResult<()> {
        self.write_bits(u32::from(value), 1)
    }

    /// Writes up to 32 bits from an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`BitError::InvalidBitCount`] if `bits > 32`.
    /// Returns [`BitError::ValueOutOfRange`] if `value` doesn't fit in `bits`.
    /// Returns [`BitError::BufferOverflow`] if the buffer is full.
    pub fn write_bits(&mut self, value: u32, bits: u32) -> BitResult<()> {
        if bits > 32 {
            return Err(BitError::InvalidBitCount { bits, max_bits: 32 });
        }
        if bits == 0 {
            return Ok(());
        }
        if bits < 32 && value >= (1u32 << bits) {
            return Err(BitError::ValueOutOfRange { value, bits });
        }
        if bits as usize > self.bits_available() {
            return Err(BitError::BufferOverflow {
                attempted: bits as usize,
                capacity: self.bits_available(),
            });
        }

        self.scratch |= u64::from(value) << self.scratch_bits;
        self.scratch_bits += bits;
        if self.scratch_bits >= 32 {
            self.store_word(self.scratch as u32);
            self.scratch >>= 32;
            self.scratch_bits -= 32;
        }
        self.bits_written += bits as usize;
        Ok(())
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn write_align(&mut self) -> BitResult<()> {
        let pad = self.align_bits();
        self.write_bits(0, pad)
    }

    /// Writes raw bytes. The writer must be byte aligned.
    pub fn write_bytes(&mut self, data: &[u8]) -> BitResult<()> {
        if self.bits_written % 8 != 0 {
            return Err(BitError::MisalignedAccess {
                bit_position: self.bits_written,
            });
        }
        if data.len() * 8 > self.bits_available() {
            return Err(BitError::BufferOverflow {
                attempted: data.len() * 8,
                capacity: self.bits_available(),
            });
        }
        for &byte in data {
            self.write_bits(u32::from(byte), 8)?;
        }
        Ok(())
    }

    /// Finishes writing and returns the bytes written.
    ///
    /// A trailing partial byte is padded with zeros.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        if self.scratch_bits > 0 {
            self.store_word(self.scratch as u32);
        }
        let len = self.bytes_written();
        self.buf.truncate(len);
        self.buf
    }

    fn store_word(&mut self, word: u32) {
        let start = self.word_index * 4;
        self.buf[start..start + 4].copy_from_slice(&word.to_le_bytes());
        self.word_index += 1;
    }
}
