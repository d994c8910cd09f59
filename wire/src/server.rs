//! Game server packets: init handshake and periodic heartbeat.

use std::net::SocketAddr;

use bitstream::Stream;

use crate::error::WireResult;
use crate::limits::{MAGIC_BYTES, MAX_DATACENTER_NAME_LENGTH};
use crate::packet::{Message, Packet};
use crate::types::PacketType;
use crate::version::{serialize_sdk_version, SdkVersion};

/// Outcome of a server init request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i32)]
pub enum ServerInitResult {
    #[default]
    Ok = 0,
    UnknownBuyer = 1,
    UnknownDatacenter = 2,
    OldSdkVersion = 3,
    SignatureCheckFailed = 4,
    BuyerNotActive = 5,
    DatacenterNotEnabled = 6,
}

impl ServerInitResult {
    pub const MAX: i32 = Self::DatacenterNotEnabled as i32;

    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Ok,
            1 => Self::UnknownBuyer,
            2 => Self::UnknownDatacenter,
            3 => Self::OldSdkVersion,
            4 => Self::SignatureCheckFailed,
            5 => Self::BuyerNotActive,
            6 => Self::DatacenterNotEnabled,
            _ => return None,
        })
    }
}

/// Sent by a game server when it starts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerInitRequestPacket {
    pub version: SdkVersion,
    pub buyer_id: u64,
    pub datacenter_id: u64,
    pub request_id: u64,
    /// From 4.0.2.
    pub datacenter_name: String,
}

impl Message for ServerInitRequestPacket {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        serialize_sdk_version(&mut self.version, stream)?;
        stream.serialize_uint64(&mut self.buyer_id);
        stream.serialize_uint64(&mut self.datacenter_id);
        stream.serialize_uint64(&mut self.request_id);
        if self.version >= SdkVersion::new(4, 0, 2) {
            stream.serialize_string(&mut self.datacenter_name, MAX_DATACENTER_NAME_LENGTH);
        }
        Ok(stream.result()?)
    }
}

impl Packet for ServerInitRequestPacket {
    const TYPE: PacketType = PacketType::ServerInitRequest;
}

/// Backend answer to [`ServerInitRequestPacket`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerInitResponsePacket {
    pub version: SdkVersion,
    pub request_id: u64,
    pub response: ServerInitResult,
    /// From 4.0.6.
    pub upcoming_magic: [u8; MAGIC_BYTES],
    /// From 4.0.6.
    pub current_magic: [u8; MAGIC_BYTES],
    /// From 4.0.6.
    pub previous_magic: [u8; MAGIC_BYTES],
}

impl Message for ServerInitResponsePacket {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        serialize_sdk_version(&mut self.version, stream)?;
        stream.serialize_uint64(&mut self.request_id);
        let mut response = self.response as i32;
        stream.serialize_integer(&mut response, 0, ServerInitResult::MAX);
        self.response = ServerInitResult::from_i32(response).unwrap_or_default();
        if self.version >= SdkVersion::new(4, 0, 6) {
            stream.serialize_bytes(&mut self.upcoming_magic);
            stream.serialize_bytes(&mut self.current_magic);
            stream.serialize_bytes(&mut self.previous_magic);
        }
        Ok(stream.result()?)
    }
}

impl Packet for ServerInitResponsePacket {
    const TYPE: PacketType = PacketType::ServerInitResponse;
}

/// Periodic heartbeat from a game server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerUpdatePacket {
    pub version: SdkVersion,
    pub buyer_id: u64,
    pub datacenter_id: u64,
    pub num_sessions: u32,
    pub server_address: Option<SocketAddr>,
    /// Seconds since the server started. From 4.0.4.
    pub uptime: u64,
}

impl Message for ServerUpdatePacket {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        serialize_sdk_version(&mut self.version, stream)?;
        stream.serialize_uint64(&mut self.buyer_id);
        stream.serialize_uint64(&mut self.datacenter_id);
        stream.serialize_uint32(&mut self.num_sessions);
        stream.serialize_address(&mut self.server_address);
        if self.version >= SdkVersion::new(4, 0, 4) {
            stream.serialize_uint64(&mut self.uptime);
        }
        Ok(stream.result()?)
    }
}

impl Packet for ServerUpdatePacket {
    const TYPE: PacketType = PacketType::ServerUpdate;
}
