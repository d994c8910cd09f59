//! Message serialization and SDK4 signed packet framing.
//!
//! An SDK4 packet is laid out as:
//!
//! ```text
//! [type: u8][payload: bitstream][signature: 64 bytes]
//! ```
//!
//! The ed25519 signature covers the type byte and the payload. Requests are
//! signed with the buyer's key, responses with the backend's key.

use std::net::SocketAddr;

use bitstream::{ReadStream, Stream, WriteStream};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::{WireError, WireResult};
use crate::limits::{DEFAULT_MAX_PACKET_SIZE, SIGNATURE_BYTES};
use crate::types::PacketType;

/// Bytes of framing around an SDK4 payload.
pub const SDK4_OVERHEAD: usize = 1 + SIGNATURE_BYTES;

/// A structure whose `serialize` function is its wire format.
pub trait Message: Default {
    /// Encodes or decodes `self` depending on the stream direction.
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> WireResult<()>;
}

/// A message that travels behind a packet type byte.
pub trait Packet: Message {
    const TYPE: PacketType;
}

/// Serializes `message` into at most `capacity` bytes.
pub fn write_message<M: Message>(message: &mut M, capacity: usize) -> WireResult<Vec<u8>> {
    let mut stream = WriteStream::with_capacity(capacity);
    message.serialize(&mut stream)?;
    Ok(stream.finish()?)
}

/// Deserializes a message from the whole of `data`.
///
/// A stream failure aborts the decode; partially filled messages are never
/// returned.
pub fn read_message<M: Message>(data: &[u8]) -> WireResult<M> {
    let mut stream = ReadStream::new(data);
    let mut message = M::default();
    message.serialize(&mut stream)?;
    stream.result()?;
    Ok(message)
}

/// Serializes an address that must be present.
pub(crate) fn serialize_required_address<S: Stream>(
    address: &mut SocketAddr,
    stream: &mut S,
) -> WireResult<()> {
    let mut value = Some(*address);
    stream.serialize_address(&mut value);
    stream.result()?;
    *address = value.ok_or(WireError::MissingAddress)?;
    Ok(())
}

/// Serializes a length-prefixed byte block of at most `max` bytes.
pub(crate) fn serialize_byte_vec<S: Stream>(
    data: &mut Vec<u8>,
    max: usize,
    stream: &mut S,
) -> WireResult<()> {
    let mut len = data.len();
    stream.serialize_length(&mut len, max);
    stream.result()?;
    if stream.is_reading() {
        *data = vec![0; len];
    }
    if len > 0 {
        stream.serialize_bytes(data);
    }
    Ok(stream.result()?)
}

/// Unspecified IPv4 address used as a placeholder before decoding.
#[must_use]
pub(crate) fn unspecified_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}

/// Returns the type of an SDK4 packet without validating the rest.
pub fn packet_type(data: &[u8]) -> WireResult<PacketType> {
    match data.first() {
        Some(&byte) => PacketType::parse(byte),
        None => Err(WireError::PacketTooSmall {
            actual: 0,
            required: SDK4_OVERHEAD,
        }),
    }
}

/// Splits an SDK4 packet into signed region and signature.
fn split_signed(data: &[u8]) -> WireResult<(&[u8], Signature)> {
    if data.len() < SDK4_OVERHEAD {
        return Err(WireError::PacketTooSmall {
            actual: data.len(),
            required: SDK4_OVERHEAD,
        });
    }
    if data.len() > DEFAULT_MAX_PACKET_SIZE {
        return Err(WireError::PacketTooLarge {
            actual: data.len(),
            max: DEFAULT_MAX_PACKET_SIZE,
        });
    }
    let (signed, signature) = data.split_at(data.len() - SIGNATURE_BYTES);
    let signature: [u8; SIGNATURE_BYTES] = signature
        .try_into()
        .map_err(|_| WireError::SignatureCheckFailed)?;
    Ok((signed, Signature::from_bytes(&signature)))
}

/// Checks the signature of an SDK4 packet.
pub fn verify_packet(data: &[u8], key: &VerifyingKey) -> WireResult<()> {
    let (signed, signature) = split_signed(data)?;
    key.verify(signed, &signature)
        .map_err(|_| WireError::SignatureCheckFailed)
}

/// Serializes and signs `packet`.
pub fn write_packet<P: Packet>(packet: &mut P, key: &SigningKey) -> WireResult<Vec<u8>> {
    let payload = write_message(packet, DEFAULT_MAX_PACKET_SIZE - SDK4_OVERHEAD)?;
    let mut out = Vec::with_capacity(payload.len() + SDK4_OVERHEAD);
    out.push(P::TYPE.as_u8());
    out.extend_from_slice(&payload);
    let signature = key.sign(&out);
    out.extend_from_slice(&signature.to_bytes());
    Ok(out)
}

/// Decodes an SDK4 packet without checking its signature.
///
/// Used when the verifying key depends on the packet contents (the buyer
/// id); the caller must follow up with [`verify_packet`].
pub fn read_packet_unverified<P: Packet>(data: &[u8]) -> WireResult<P> {
    let (signed, _) = split_signed(data)?;
    let found = signed[0];
    if found != P::TYPE.as_u8() {
        return Err(WireError::UnexpectedPacketType {
            expected: P::TYPE.as_u8(),
            found,
        });
    }
    read_message(&signed[1..])
}

/// Verifies and decodes an SDK4 packet.
pub fn read_packet<P: Packet>(data: &[u8], key: &VerifyingKey) -> WireResult<P> {
    verify_packet(data, key)?;
    read_packet_unverified(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerUpdatePacket;
    use crate::version::SdkVersion;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn sample() -> ServerUpdatePacket {
        ServerUpdatePacket {
            version: SdkVersion::CURRENT,
            buyer_id: 0x1234,
            datacenter_id: 0x5678,
            num_sessions: 12,
            server_address: Some("10.1.1.1:50000".parse().unwrap()),
            uptime: 3600,
        }
    }

    #[test]
    fn signed_roundtrip() {
        let signer = key(1);
        let mut packet = sample();
        let bytes = write_packet(&mut packet, &signer).unwrap();
        assert_eq!(bytes[0], PacketType::ServerUpdate.as_u8());
        assert_eq!(packet_type(&bytes).unwrap(), PacketType::ServerUpdate);

        let decoded: ServerUpdatePacket = read_packet(&bytes, &signer.verifying_key()).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn wrong_key_fails_signature() {
        let mut packet = sample();
        let bytes = write_packet(&mut packet, &key(1)).unwrap();
        let err = read_packet::<ServerUpdatePacket>(&bytes, &key(2).verifying_key()).unwrap_err();
        assert_eq!(err, WireError::SignatureCheckFailed);
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let signer = key(3);
        let mut packet = sample();
        let mut bytes = write_packet(&mut packet, &signer).unwrap();
        bytes[2] ^= 0x01;
        assert_eq!(
            verify_packet(&bytes, &signer.verifying_key()),
            Err(WireError::SignatureCheckFailed)
        );
    }

    #[test]
    fn wrong_type_is_rejected() {
        let mut packet = sample();
        let mut bytes = write_packet(&mut packet, &key(1)).unwrap();
        bytes[0] = PacketType::SessionUpdate.as_u8();
        let err = read_packet_unverified::<ServerUpdatePacket>(&bytes).unwrap_err();
        assert!(matches!(err, WireError::UnexpectedPacketType { .. }));
    }

    #[test]
    fn short_packet_is_rejected() {
        let err = read_packet_unverified::<ServerUpdatePacket>(&[220; 10]).unwrap_err();
        assert!(matches!(err, WireError::PacketTooSmall { actual: 10, .. }));
        assert!(packet_type(&[]).is_err());
    }
}
