//! Inspection and key tools for the nextroute backend.
//!
//! This crate provides utilities for looking at traffic and state offline:
//!
//! - Decode SDK4 and SDK5 packets into JSON
//! - Decode relay update requests
//! - Decode the session data blob echoed by game servers
//! - Generate backend signing and route keys
//!
//! Signatures are never checked here; the tools are for reading captures.
//!
//! # Design Principles
//!
//! - **First-class tooling** - These tools are part of the product, not afterthoughts.
//! - **Human-readable output** - Everything decodes to JSON with the same field names as the code.

use anyhow::{anyhow, Context, Result};
use backend::SessionData;
use rand::rngs::OsRng;
use serde::Serialize;
use serde_json::Value;
use wire::framing::{basic_packet_filter, CHONKLE_BYTES, PITTLE_BYTES};
use wire::{
    packet_type, read_message, read_packet_unverified, MatchDataRequestPacket,
    MatchDataResponsePacket, PacketType, RelayUpdateRequest, RelayUpdateResponse,
    ServerInitRequestPacket, ServerInitResponsePacket, ServerUpdatePacket, SessionResponsePacket,
    SessionUpdatePacket,
};

/// Packet framing detected by [`inspect_packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    Sdk4,
    Sdk5,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub framing: Framing,
    pub packet_type: PacketType,
    pub size: usize,
    pub packet: Value,
}

/// Decodes an SDK packet without verifying its signature.
///
/// Packets that pass the SDK5 range filter are stripped to SDK4 layout first.
pub fn inspect_packet(bytes: &[u8]) -> Result<InspectReport> {
    let (framing, sdk4) = if basic_packet_filter(bytes) {
        (Framing::Sdk5, strip_sdk5(bytes))
    } else {
        (Framing::Sdk4, bytes.to_vec())
    };
    let kind = packet_type(&sdk4).context("read packet type")?;
    let packet = match kind {
        PacketType::ServerUpdate => decode::<ServerUpdatePacket>(&sdk4)?,
        PacketType::SessionUpdate => decode::<SessionUpdatePacket>(&sdk4)?,
        PacketType::SessionResponse => decode::<SessionResponsePacket>(&sdk4)?,
        PacketType::ServerInitRequest => decode::<ServerInitRequestPacket>(&sdk4)?,
        PacketType::ServerInitResponse => decode::<ServerInitResponsePacket>(&sdk4)?,
        PacketType::MatchDataRequest => decode::<MatchDataRequestPacket>(&sdk4)?,
        PacketType::MatchDataResponse => decode::<MatchDataResponsePacket>(&sdk4)?,
    };
    Ok(InspectReport {
        framing,
        packet_type: kind,
        size: bytes.len(),
        packet,
    })
}

fn strip_sdk5(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() - CHONKLE_BYTES - PITTLE_BYTES);
    out.push(bytes[0]);
    out.extend_from_slice(&bytes[1 + CHONKLE_BYTES..bytes.len() - PITTLE_BYTES]);
    out
}

fn decode<P>(sdk4: &[u8]) -> Result<Value>
where
    P: wire::Packet + Serialize,
{
    let packet: P = read_packet_unverified(sdk4).context("decode packet")?;
    serde_json::to_value(packet).context("serialize packet")
}

/// Decodes a relay update request, or a response when `response` is set.
pub fn inspect_relay_message(bytes: &[u8], response: bool) -> Result<Value> {
    if response {
        let message: RelayUpdateResponse =
            read_message(bytes).context("decode relay update response")?;
        serde_json::to_value(message).context("serialize relay update response")
    } else {
        let message: RelayUpdateRequest =
            read_message(bytes).context("decode relay update request")?;
        serde_json::to_value(message).context("serialize relay update request")
    }
}

/// Decodes a hex-encoded session data blob.
pub fn decode_session_data(hex_blob: &str) -> Result<SessionData> {
    let bytes = hex::decode(hex_blob.trim()).context("session data is not hex")?;
    SessionData::read(&bytes).context("decode session data")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Packet signing.
    Ed25519,
    /// Route token encryption.
    X25519,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyPair {
    pub secret: String,
    pub public: String,
}

pub fn generate_keys(kind: KeyKind) -> KeyPair {
    let (secret, public) = match kind {
        KeyKind::Ed25519 => {
            let key = ed25519_dalek::SigningKey::generate(&mut OsRng);
            (key.to_bytes(), key.verifying_key().to_bytes())
        }
        KeyKind::X25519 => {
            let key = x25519_dalek::StaticSecret::random_from_rng(OsRng);
            (key.to_bytes(), x25519_dalek::PublicKey::from(&key).to_bytes())
        }
    };
    KeyPair {
        secret: hex::encode(secret),
        public: hex::encode(public),
    }
}

/// Public half of a hex-encoded secret.
pub fn public_key(kind: KeyKind, secret_hex: &str) -> Result<String> {
    let bytes: [u8; 32] = hex::decode(secret_hex.trim())
        .context("secret is not hex")?
        .try_into()
        .map_err(|bytes: Vec<u8>| anyhow!("secret is {} bytes, expected 32", bytes.len()))?;
    let public = match kind {
        KeyKind::Ed25519 => ed25519_dalek::SigningKey::from_bytes(&bytes)
            .verifying_key()
            .to_bytes(),
        KeyKind::X25519 => {
            x25519_dalek::PublicKey::from(&x25519_dalek::StaticSecret::from(bytes)).to_bytes()
        }
    };
    Ok(hex::encode(public))
}
