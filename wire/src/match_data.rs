//! Match data attached to a session by the game server.

use std::net::SocketAddr;

use bitstream::Stream;

use crate::error::WireResult;
use crate::limits::{MAX_MATCH_VALUES, MAX_SESSION_UPDATE_RETRIES};
use crate::packet::{Message, Packet};
use crate::types::PacketType;
use crate::version::{serialize_sdk_version, SdkVersion};

/// Outcome of a match data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i32)]
pub enum MatchDataResult {
    #[default]
    Ok = 0,
    UnknownBuyer = 1,
    BuyerNotLive = 2,
}

impl MatchDataResult {
    pub const MAX: i32 = Self::BuyerNotLive as i32;

    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::UnknownBuyer),
            2 => Some(Self::BuyerNotLive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchDataRequestPacket {
    pub version: SdkVersion,
    pub buyer_id: u64,
    pub server_address: Option<SocketAddr>,
    pub datacenter_id: u64,
    pub user_hash: u64,
    pub session_id: u64,
    pub retry_number: i32,
    pub match_id: u64,
    /// From 4.0.4.
    pub match_values: Vec<f64>,
}

impl Message for MatchDataRequestPacket {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        serialize_sdk_version(&mut self.version, stream)?;
        stream.serialize_uint64(&mut self.buyer_id);
        stream.serialize_address(&mut self.server_address);
        stream.serialize_uint64(&mut self.datacenter_id);
        stream.serialize_uint64(&mut self.user_hash);
        stream.serialize_uint64(&mut self.session_id);
        stream.serialize_integer(&mut self.retry_number, 0, MAX_SESSION_UPDATE_RETRIES as i32);
        stream.serialize_uint64(&mut self.match_id);

        if self.version >= SdkVersion::new(4, 0, 4) {
            let mut has_values = stream.is_writing() && !self.match_values.is_empty();
            stream.serialize_bool(&mut has_values);
            if has_values {
                let mut count = self.match_values.len();
                stream.serialize_length(&mut count, MAX_MATCH_VALUES);
                stream.result()?;
                if stream.is_reading() {
                    self.match_values = vec![0.0; count];
                }
                for value in &mut self.match_values {
                    stream.serialize_float64(value);
                }
            }
        }
        Ok(stream.result()?)
    }
}

impl Packet for MatchDataRequestPacket {
    const TYPE: PacketType = PacketType::MatchDataRequest;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchDataResponsePacket {
    pub version: SdkVersion,
    pub session_id: u64,
    pub response: MatchDataResult,
}

impl Message for MatchDataResponsePacket {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        serialize_sdk_version(&mut self.version, stream)?;
        stream.serialize_uint64(&mut self.session_id);
        let mut response = self.response as i32;
        stream.serialize_integer(&mut response, 0, MatchDataResult::MAX);
        self.response = MatchDataResult::from_i32(response).unwrap_or_default();
        Ok(stream.result()?)
    }
}

impl Packet for MatchDataResponsePacket {
    const TYPE: PacketType = PacketType::MatchDataResponse;
}
