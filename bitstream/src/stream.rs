//! Symmetric serialize streams.
//!
//! A packet format is a single `serialize` function written against the
//! [`Stream`] trait. Run with a [`WriteStream`] it encodes, run with a
//! [`ReadStream`] it decodes. The wire carries no type tags, so the same calls
//! with the same bounds must be issued in both directions.
//!
//! Errors are sticky: the first failure is recorded and every later call is a
//! no-op, so a `serialize` body can issue its calls unconditionally and check
//! [`Stream::result`] once at the end.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{BitError, BitResult};
use crate::reader::BitReader;
use crate::writer::BitWriter;

/// Address type tag: no address.
pub const ADDRESS_NONE: u32 = 0;
/// Address type tag: IPv4.
pub const ADDRESS_IPV4: u32 = 1;
/// Address type tag: IPv6.
pub const ADDRESS_IPV6: u32 = 2;

/// Returns the minimal bit width able to hold every value in `[min, max]`.
#[must_use]
pub const fn bits_required(min: i64, max: i64) -> u32 {
    if max <= min {
        return 0;
    }
    let span = (max - min) as u64;
    64 - span.leading_zeros()
}

/// Operations shared by the read and write streams.
pub trait Stream {
    /// `true` for [`WriteStream`].
    fn is_writing(&self) -> bool;

    /// `true` for [`ReadStream`].
    fn is_reading(&self) -> bool {
        !self.is_writing()
    }

    /// First error recorded on this stream, if any.
    fn error(&self) -> Option<&BitError>;

    /// `Ok(())` while no error has been recorded.
    fn result(&self) -> BitResult<()> {
        match self.error() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Serializes the low `bits` bits of `value` (1-32).
    fn serialize_bits(&mut self, value: &mut u32, bits: u32);

    /// Serializes a closed-range integer using [`bits_required`] bits.
    fn serialize_integer(&mut self, value: &mut i32, min: i32, max: i32);

    /// Pads (write) or skips zero padding (read) to the next byte boundary.
    fn serialize_align(&mut self);

    /// Serializes raw bytes after aligning. The slice length is the schema.
    fn serialize_bytes(&mut self, data: &mut [u8]);

    /// Serializes a single bit.
    fn serialize_bool(&mut self, value: &mut bool) {
        let mut bit = u32::from(*value);
        self.serialize_bits(&mut bit, 1);
        *value = bit != 0;
    }

    /// Serializes a full 32-bit value.
    fn serialize_uint32(&mut self, value: &mut u32) {
        self.serialize_bits(value, 32);
    }

    /// Serializes a 64-bit value, low word first.
    fn serialize_uint64(&mut self, value: &mut u64) {
        let mut lo = *value as u32;
        let mut hi = (*value >> 32) as u32;
        self.serialize_bits(&mut lo, 32);
        self.serialize_bits(&mut hi, 32);
        *value = u64::from(lo) | (u64::from(hi) << 32);
    }

    /// Serializes an `f32` by its bit pattern.
    fn serialize_float32(&mut self, value: &mut f32) {
        let mut bits = value.to_bits();
        self.serialize_bits(&mut bits, 32);
        *value = f32::from_bits(bits);
    }

    /// Serializes an `f64` by its bit pattern.
    fn serialize_float64(&mut self, value: &mut f64) {
        let mut bits = value.to_bits();
        self.serialize_uint64(&mut bits);
        *value = f64::from_bits(bits);
    }

    /// Serializes a list length bounded by `max`.
    fn serialize_length(&mut self, len: &mut usize, max: usize) {
        let max = i32::try_from(max).unwrap_or(i32::MAX);
        let mut value = i32::try_from(*len).unwrap_or(i32::MAX);
        self.serialize_integer(&mut value, 0, max);
        *len = usize::try_from(value).unwrap_or(0);
    }

    /// Serializes a string of at most `max_len` bytes.
    fn serialize_string(&mut self, value: &mut String, max_len: usize);

    /// Serializes an optional IPv4/IPv6 socket address.
    fn serialize_address(&mut self, address: &mut Option<SocketAddr>) {
        let mut tag = match address {
            None => ADDRESS_NONE,
            Some(SocketAddr::V4(_)) => ADDRESS_IPV4,
            Some(SocketAddr::V6(_)) => ADDRESS_IPV6,
        };
        self.serialize_bits(&mut tag, 2);
        if self.error().is_some() {
            return;
        }
        match tag {
            ADDRESS_NONE => *address = None,
            ADDRESS_IPV4 => {
                let (mut octets, mut port) = match address {
                    Some(SocketAddr::V4(v4)) => (v4.ip().octets(), v4.port()),
                    _ => ([0u8; 4], 0),
                };
                for octet in &mut octets {
                    let mut value = u32::from(*octet);
                    self.serialize_bits(&mut value, 8);
                    *octet = value as u8;
                }
                let mut port_value = u32::from(port);
                self.serialize_bits(&mut port_value, 16);
                port = port_value as u16;
                *address = Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port));
            }
            ADDRESS_IPV6 => {
                let (mut segments, mut port) = match address {
                    Some(SocketAddr::V6(v6)) => (v6.ip().segments(), v6.port()),
                    _ => ([0u16; 8], 0),
                };
                for segment in &mut segments {
                    let mut value = u32::from(*segment);
                    self.serialize_bits(&mut value, 16);
                    *segment = value as u16;
                }
                let mut port_value = u32::from(port);
                self.serialize_bits(&mut port_value, 16);
                port = port_value as u16;
                *address = Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(segments)), port));
            }
            other => self.fail(BitError::InvalidAddressType { tag: other }),
        }
    }

    /// Records `err` unless an earlier error is already held.
    fn fail(&mut self, err: BitError);
}

/// Stream that encodes into a fixed-capacity buffer.
#[derive(Debug)]
pub struct WriteStream {
    writer: BitWriter,
    error: Option<BitError>,
}

impl WriteStream {
    /// Creates a write stream able to hold `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            writer: BitWriter::with_capacity(capacity),
            error: None,
        }
    }

    /// Bytes produced so far, partial last byte included.
    #[must_use]
    pub const fn bytes_written(&self) -> usize {
        self.writer.bytes_written()
    }

    /// Flushes to byte alignment and returns the written bytes, or the first
    /// error recorded.
    pub fn finish(self) -> BitResult<Vec<u8>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.writer.finish()),
        }
    }

    fn record(&mut self, result: BitResult<()>) {
        if let Err(err) = result {
            self.fail(err);
        }
    }
}

impl Stream for WriteStream {
    fn is_writing(&self) -> bool {
        true
    }

    fn error(&self) -> Option<&BitError> {
        self.error.as_ref()
    }

    fn fail(&mut self, err: BitError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn serialize_bits(&mut self, value: &mut u32, bits: u32) {
        if self.error.is_some() {
            return;
        }
        let result = self.writer.write_bits(*value, bits);
        self.record(result);
    }

    fn serialize_integer(&mut self, value: &mut i32, min: i32, max: i32) {
        if self.error.is_some() {
            return;
        }
        if *value < min || *value > max {
            self.fail(BitError::IntegerOutOfRange {
                value: i64::from(*value),
                min,
                max,
            });
            return;
        }
        let bits = bits_required(i64::from(min), i64::from(max));
        let offset = (i64::from(*value) - i64::from(min)) as u32;
        let result = self.writer.write_bits(offset, bits);
        self.record(result);
    }

    fn serialize_align(&mut self) {
        if self.error.is_some() {
            return;
        }
        let result = self.writer.write_align();
        self.record(result);
    }

    fn serialize_bytes(&mut self, data: &mut [u8]) {
        self.serialize_align();
        if self.error.is_some() {
            return;
        }
        let result = self.writer.write_bytes(data);
        self.record(result);
    }

    fn serialize_string(&mut self, value: &mut String, max_len: usize) {
        if self.error.is_some() {
            return;
        }
        if value.len() > max_len {
            self.fail(BitError::StringTooLong {
                len: value.len(),
                max: max_len,
            });
            return;
        }
        let mut len = value.len();
        self.serialize_length(&mut len, max_len);
        self.serialize_align();
        if self.error.is_some() {
            return;
        }
        let result = self.writer.write_bytes(value.as_bytes());
        self.record(result);
    }
}

/// Stream that decodes from a borrowed buffer.
#[derive(Debug)]
pub struct ReadStream<'a> {
    reader: BitReader<'a>,
    error: Option<BitError>,
}

impl<'a> ReadStream<'a> {
    /// Creates a read stream over `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self {
            reader: BitReader::new(data),
            error: None,
        }
    }

    /// Bits consumed so far.
    #[must_use]
    pub const fn bits_read(&self) -> usize {
        self.reader.bit_position()
    }

    /// Bits left in the buffer.
    #[must_use]
    pub const fn bits_remaining(&self) -> usize {
        self.reader.bits_remaining()
    }

    fn read(&mut self, bits: u32) -> Option<u32> {
        if self.error.is_some() {
            return None;
        }
        match self.reader.read_bits(bits) {
            Ok(value) => Some(value),
            Err(err) => {
                self.fail(err);
                None
            }
        }
    }
}

impl Stream for ReadStream<'_> {
    fn is_writing(&self) -> bool {
        false
    }

    fn error(&self) -> Option<&BitError> {
        self.error.as_ref()
    }

    fn fail(&mut self, err: BitError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn serialize_bits(&mut self, value: &mut u32, bits: u32) {
        if let Some(read) = self.read(bits) {
            *value = read;
        }
    }

    fn serialize_integer(&mut self, value: &mut i32, min: i32, max: i32) {
        let bits = bits_required(i64::from(min), i64::from(max));
        let Some(offset) = self.read(bits) else {
            return;
        };
        let decoded = i64::from(min) + i64::from(offset);
        if decoded > i64::from(max) {
            self.fail(BitError::IntegerOutOfRange {
                value: decoded,
                min,
                max,
            });
            return;
        }
        *value = decoded as i32;
    }

    fn serialize_align(&mut self) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.reader.read_align() {
            self.fail(err);
        }
    }

    fn serialize_bytes(&mut self, data: &mut [u8]) {
        self.serialize_align();
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.reader.read_bytes(data) {
            self.fail(err);
        }
    }

    fn serialize_string(&mut self, value: &mut String, max_len: usize) {
        let mut len = 0usize;
        self.serialize_length(&mut len, max_len);
        self.serialize_align();
        if self.error.is_some() {
            return;
        }
        if len * 8 > self.reader.bits_remaining() {
            self.fail(BitError::EndOfBuffer {
                requested: len * 8,
                available: self.reader.bits_remaining(),
            });
            return;
        }
        let mut bytes = vec![0u8; len];
        if let Err(err) = self.reader.read_bytes(&mut bytes) {
            self.fail(err);
            return;
        }
        match String::from_utf8(bytes) {
            Ok(s) => *value = s,
            Err(_) => self.fail(BitError::InvalidUtf8),
        }
    }
}
