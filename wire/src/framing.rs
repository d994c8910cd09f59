//! SDK5 packet framing.
//!
//! ```text
//! [type: u8][chonkle: 15][payload][signature: 64][pittle: 2]
//! ```
//!
//! The signature covers the type byte and the payload, exactly as in SDK4
//! framing, so converting between the two layouts never re-signs. The chonkle
//! and pittle are cheap markers derived from the rotating network magic and the
//! UDP 4-tuple. The basic filter checks only their value ranges; the advanced
//! filter recomputes them.

use std::net::{IpAddr, SocketAddr};

use crate::error::{WireError, WireResult};
use crate::limits::{DEFAULT_MAX_PACKET_SIZE, MAGIC_BYTES, SIGNATURE_BYTES};
use crate::packet::SDK4_OVERHEAD;

pub const CHONKLE_BYTES: usize = 15;
pub const PITTLE_BYTES: usize = 2;

/// Bytes of framing around an SDK5 payload.
pub const SDK5_OVERHEAD: usize = 1 + CHONKLE_BYTES + SIGNATURE_BYTES + PITTLE_BYTES;

const FNV_OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// FNV-1a 64-bit hasher.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a(u64);

impl Default for Fnv1a {
    fn default() -> Self {
        Self(FNV_OFFSET_BASIS)
    }
}

impl Fnv1a {
    pub fn write(&mut self, data: &[u8]) {
        for &byte in data {
            self.0 ^= u64::from(byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    #[must_use]
    pub const fn finish(self) -> u64 {
        self.0
    }
}

fn for_each_address_chunk(address: &SocketAddr, mut f: impl FnMut(&[u8])) {
    match address.ip() {
        IpAddr::V4(ip) => f(&ip.octets()),
        IpAddr::V6(ip) => f(&ip.octets()),
    }
    f(&address.port().to_le_bytes());
}

fn length_bytes(packet_length: usize) -> [u8; 2] {
    u16::try_from(packet_length).unwrap_or(u16::MAX).to_le_bytes()
}

/// Derives the 15-byte chonkle.
#[must_use]
pub fn generate_chonkle(
    magic: &[u8; MAGIC_BYTES],
    from: &SocketAddr,
    to: &SocketAddr,
    packet_length: usize,
) -> [u8; CHONKLE_BYTES] {
    let mut fnv = Fnv1a::default();
    fnv.write(magic);
    for_each_address_chunk(from, |chunk| fnv.write(chunk));
    for_each_address_chunk(to, |chunk| fnv.write(chunk));
    fnv.write(&length_bytes(packet_length));
    let d = fnv.finish().to_le_bytes();

    [
        ((d[6] & 0xC0) >> 6) + 42,
        (d[3] & 0x1F) + 200,
        ((d[2] & 0xFC) >> 2) + 5,
        d[0],
        (d[2] & 0x03) + 78,
        (d[4] & 0x7F) + 96,
        ((d[1] & 0xFC) >> 2) + 100,
        if d[7] & 1 == 0 { 79 } else { 7 },
        if d[4] & 0x80 == 0 { 37 } else { 83 },
        (d[5] & 0x07) + 124,
        ((d[1] & 0xE0) >> 5) + 175,
        (d[6] & 0x3F) + 33,
        match d[1] & 0x03 {
            0 => 97,
            1 => 5,
            2 => 43,
            _ => 13,
        },
        ((d[5] & 0xF8) >> 3) + 210,
        ((d[7] & 0xFE) >> 1) + 17,
    ]
}

/// Derives the 2-byte pittle.
#[must_use]
pub fn generate_pittle(from: &SocketAddr, to: &SocketAddr, packet_length: usize) -> [u8; PITTLE_BYTES] {
    let mut sum: u16 = 0;
    let mut add = |chunk: &[u8]| {
        for &byte in chunk {
            sum = sum.wrapping_add(u16::from(byte));
        }
    };
    for_each_address_chunk(from, &mut add);
    for_each_address_chunk(to, &mut add);
    add(&length_bytes(packet_length));
    let [lo, hi] = sum.to_le_bytes();
    let first = 1 | (lo ^ hi ^ 193);
    let second = 1 | ((255 - first) ^ 113);
    [first, second]
}

fn in_range(value: u8, min: u8, max: u8) -> bool {
    (min..=max).contains(&value)
}

/// Range checks on the chonkle and pittle that need no magic or addresses.
#[must_use]
pub fn basic_packet_filter(data: &[u8]) -> bool {
    if data.len() < SDK5_OVERHEAD {
        return false;
    }
    let c = &data[1..=CHONKLE_BYTES];
    let chonkle_ok = in_range(c[0], 42, 45)
        && in_range(c[1], 200, 231)
        && in_range(c[2], 5, 68)
        && in_range(c[4], 78, 81)
        && in_range(c[5], 96, 223)
        && in_range(c[6], 100, 163)
        && matches!(c[7], 7 | 79)
        && matches!(c[8], 37 | 83)
        && in_range(c[9], 124, 131)
        && in_range(c[10], 175, 182)
        && in_range(c[11], 33, 96)
        && matches!(c[12], 5 | 13 | 43 | 97)
        && in_range(c[13], 210, 241)
        && in_range(c[14], 17, 144);
    if !chonkle_ok {
        return false;
    }
    let first = data[data.len() - 2];
    let second = data[data.len() - 1];
    first & 1 == 1 && second == 1 | ((255 - first) ^ 113)
}

/// Recomputes chonkle and pittle for `magic` and the given 4-tuple.
#[must_use]
pub fn advanced_packet_filter(
    data: &[u8],
    magic: &[u8; MAGIC_BYTES],
    from: &SocketAddr,
    to: &SocketAddr,
) -> bool {
    if data.len() < SDK5_OVERHEAD {
        return false;
    }
    let chonkle = generate_chonkle(magic, from, to, data.len());
    let pittle = generate_pittle(from, to, data.len());
    data[1..=CHONKLE_BYTES] == chonkle && data[data.len() - PITTLE_BYTES..] == pittle
}

/// Wraps a signed SDK4 packet into SDK5 framing for the `from -> to` path.
pub fn wrap_sdk5(
    sdk4: &[u8],
    magic: &[u8; MAGIC_BYTES],
    from: &SocketAddr,
    to: &SocketAddr,
) -> WireResult<Vec<u8>> {
    if sdk4.len() < SDK4_OVERHEAD {
        return Err(WireError::PacketTooSmall {
            actual: sdk4.len(),
            required: SDK4_OVERHEAD,
        });
    }
    let total = sdk4.len() + CHONKLE_BYTES + PITTLE_BYTES;
    if total > DEFAULT_MAX_PACKET_SIZE {
        return Err(WireError::PacketTooLarge {
            actual: total,
            max: DEFAULT_MAX_PACKET_SIZE,
        });
    }
    let mut out = Vec::with_capacity(total);
    out.push(sdk4[0]);
    out.extend_from_slice(&generate_chonkle(magic, from, to, total));
    out.extend_from_slice(&sdk4[1..]);
    out.extend_from_slice(&generate_pittle(from, to, total));
    Ok(out)
}

/// Filters an SDK5 packet and strips it back to signed SDK4 layout.
///
/// `magics` are tried in order; the packet passes if any one matches.
pub fn unwrap_sdk5(
    data: &[u8],
    magics: &[[u8; MAGIC_BYTES]],
    from: &SocketAddr,
    to: &SocketAddr,
) -> WireResult<Vec<u8>> {
    if data.len() > DEFAULT_MAX_PACKET_SIZE {
        return Err(WireError::PacketTooLarge {
            actual: data.len(),
            max: DEFAULT_MAX_PACKET_SIZE,
        });
    }
    if !basic_packet_filter(data) {
        return Err(WireError::BasicFilterFailed);
    }
    if !magics
        .iter()
        .any(|magic| advanced_packet_filter(data, magic, from, to))
    {
        return Err(WireError::AdvancedFilterFailed);
    }
    let mut out = Vec::with_capacity(data.len() - CHONKLE_BYTES - PITTLE_BYTES);
    out.push(data[0]);
    out.extend_from_slice(&data[1 + CHONKLE_BYTES..data.len() - PITTLE_BYTES]);
    Ok(out)
}
