//! Bit-level reader with bounded operations.

use crate::error::{BitError, BitResult};

/// A bit-level reader for decoding packed binary data.
///
/// Mirrors [`BitWriter`](crate::BitWriter): bits come out of little-endian
/// 32-bit words, least significant first. A trailing partial word is treated
/// as zero-padded. All reads are bounds-checked; the reader never panics on
/// malformed input.
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    num_bits: usize,
    bits_read: usize,
    scratch: u64,
    scratch_bits: u32,
    word_index: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a new `BitReader` from a byte slice.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            num_bits: data.len() * 8,
            bits_read: 0,
            scratch: 0,
            scratch_bits: 0,
            word_index: 0,
        }
    }

    /// Returns the number of bits remaining to read.
    #[must_use]
    pub const fn bits_remaining(&self) -> usize {
        self.num_bits - self.bits_read
    }

    /// Returns `true` if there are no more bits to read.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits_remaining() == 0
    }

    /// Returns the current bit position.
    #[must_use]
    pub const fn bit_position(&self) -> usize {
        self.bits_read
    }

    /// Returns the number of bits needed to reach the next byte boundary.
    #[must_use]
    pub const fn align_bits(&self) -> u32 {
        ((8 - self.bits_read % 8) % 8) as u32
    }

    /// Reads a single bit as a boolean.
    pub fn read_bool(&mut self) -> BitResult<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Reads up to 32 bits as an unsigned integer.
    pub fn read_bits(&mut self, bits: u32) -> BitResult<u32> {
        if bits > 32 {
            return Err(BitError::InvalidBitCount { bits, max_bits: 32 });
        }
        if bits == 0 {
            return Ok(0);
        }
        if bits as usize > self.bits_remaining() {
            return Err(BitError::EndOfBuffer {
                requested: bits as usize,
                available: self.bits_remaining(),
            });
        }

        if self.scratch_bits < bits {
            self.scratch |= u64::from(self.load_word()) << self.scratch_bits;
            self.scratch_bits += 32;
        }
        let mask = (1u64 << bits) - 1;
        let value = (self.scratch & mask) as u32;
        self.scratch >>= bits;
        self.scratch_bits -= bits;
        self.bits_read += bits as usize;
        Ok(value)
    }

    /// Skips to the next byte boundary. Padding bits must be zero.
    pub fn read_align(&mut self) -> BitResult<()> {
        let pad = self.align_bits();
        if self.read_bits(pad)? != 0 {
            return Err(BitError::NonZeroPadding);
        }
        Ok(())
    }

    /// Reads raw bytes into `out`. The reader must be byte aligned.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> BitResult<()> {
        if self.bits_read % 8 != 0 {
            return Err(BitError::MisalignedAccess {
                bit_position: self.bits_read,
            });
        }
        if out.len() * 8 > self.bits_remaining() {
            return Err(BitError::EndOfBuffer {
                requested: out.len() * 8,
                available: self.bits_remaining(),
            });
        }
        for byte in out.iter_mut() {
            *byte = self.read_bits(8)? as u8;
        }
        Ok(())
    }

    fn load_word(&mut self) -> u32 {
        let start = self.word_index * 4;
        let end = (start + 4).min(self.data.len());
        let mut word = [0u8; 4];
        if start < end {
            word[..end - start].copy_from_slice(&self.data[start..end]);
        }
        self.word_index += 1;
        u32::from_le_bytes(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reader() {
        let reader = BitReader::new(&[]);
        assert!(reader.is_empty());
        assert_eq!(reader.bits_remaining(), 0);
        assert_eq!(reader.bit_position(), 0);
    }

    #[test]
    fn read_from_empty_fails() {
        let mut reader = BitReader::new(&[]);
        let result = reader.read_bool();
        assert!(matches!(result, Err(BitError::EndOfBuffer { .. })));
    }

    #[test]
    fn read_bits_lsb_first() {
        let mut reader = BitReader::new(&[0b0000_1011]);
        assert!(reader.read_bool().unwrap());
        assert!(reader.read_bool().unwrap());
        assert!(!reader.read_bool().unwrap());
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.bits_remaining(), 4);
    }

    #[test]
    fn read_aligned_u32_little_endian() {
        let mut reader = BitReader::new(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_bits(32).unwrap(), 0x1234_5678);
    }

    #[test]
    fn read_partial_trailing_word() {
        let mut reader = BitReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x07]);
        assert_eq!(reader.read_bits(3).unwrap(), 0x7);
        assert_eq!(reader.read_bits(32).unwrap(), u32::MAX);
        assert_eq!(reader.bits_remaining(), 5);
    }

    #[test]
    fn read_past_end_fails_without_consuming() {
        let mut reader = BitReader::new(&[0xAA]);
        let err = reader.read_bits(9).unwrap_err();
        assert_eq!(
            err,
            BitError::EndOfBuffer {
                requested: 9,
                available: 8
            }
        );
        assert_eq!(reader.read_bits(8).unwrap(), 0xAA);
    }

    #[test]
    fn read_align_rejects_garbage_padding() {
        let mut reader = BitReader::new(&[0b1000_0001]);
        reader.read_bool().unwrap();
        assert_eq!(reader.read_align().unwrap_err(), BitError::NonZeroPadding);
    }

    #[test]
    fn read_bytes_misaligned_fails() {
        let mut reader = BitReader::new(&[0xFF, 0xFF]);
        reader.read_bits(1).unwrap();
        let mut out = [0u8; 1];
        let err = reader.read_bytes(&mut out).unwrap_err();
        assert!(matches!(err, BitError::MisalignedAccess { .. }));
    }
}
