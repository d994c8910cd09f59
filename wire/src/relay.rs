//! Relay update envelope.
//!
//! Relays report their ping results and counters once a second and receive
//! the list of relays to ping. Unlike SDK packets these carry their own
//! envelope version (request 3-5, response 0-1) and travel without a type
//! byte; the relay token authenticates the request.

use std::net::SocketAddr;

use bitstream::Stream;

use crate::error::{WireError, WireResult};
use crate::limits::{
    MAGIC_BYTES, MAX_RELAYS, MAX_RELAY_VERSION_LENGTH, RELAY_TOKEN_BYTES,
};
use crate::packet::{serialize_required_address, unspecified_address, Message};

/// Oldest relay update request version accepted.
pub const RELAY_UPDATE_REQUEST_MIN_VERSION: u32 = 3;
/// Newest relay update request version.
pub const RELAY_UPDATE_REQUEST_VERSION: u32 = 5;
/// Newest relay update response version.
pub const RELAY_UPDATE_RESPONSE_VERSION: u32 = 1;

/// Ping result from one relay to another.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelayPingStats {
    pub relay_id: u64,
    pub rtt: f32,
    pub jitter: f32,
    pub packet_loss: f32,
}

/// Periodic report from a relay.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelayUpdateRequest {
    pub version: u32,
    pub address: SocketAddr,
    pub token: [u8; RELAY_TOKEN_BYTES],
    pub ping_stats: Vec<RelayPingStats>,
    pub session_count: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub shutting_down: bool,
    /// From version 4.
    pub relay_version: String,
    /// Percent, from version 4.
    pub cpu_usage: f32,
    /// From version 5.
    pub envelope_up_kbps: u64,
    /// From version 5.
    pub envelope_down_kbps: u64,
}

impl Default for RelayUpdateRequest {
    fn default() -> Self {
        Self {
            version: RELAY_UPDATE_REQUEST_VERSION,
            address: unspecified_address(),
            token: [0; RELAY_TOKEN_BYTES],
            ping_stats: Vec::new(),
            session_count: 0,
            bytes_sent: 0,
            bytes_received: 0,
            shutting_down: false,
            relay_version: String::new(),
            cpu_usage: 0.0,
            envelope_up_kbps: 0,
            envelope_down_kbps: 0,
        }
    }
}

impl Message for RelayUpdateRequest {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        stream.serialize_bits(&mut self.version, 8);
        stream.result()?;
        if !(RELAY_UPDATE_REQUEST_MIN_VERSION..=RELAY_UPDATE_REQUEST_VERSION)
            .contains(&self.version)
        {
            return Err(WireError::UnsupportedEnvelopeVersion {
                found: self.version,
            });
        }

        serialize_required_address(&mut self.address, stream)?;
        stream.serialize_bytes(&mut self.token);

        let mut count = self.ping_stats.len();
        stream.serialize_length(&mut count, MAX_RELAYS);
        stream.result()?;
        if stream.is_reading() {
            self.ping_stats = vec![RelayPingStats::default(); count];
        }
        for stats in &mut self.ping_stats {
            stream.serialize_uint64(&mut stats.relay_id);
            stream.serialize_float32(&mut stats.rtt);
            stream.serialize_float32(&mut stats.jitter);
            stream.serialize_float32(&mut stats.packet_loss);
        }

        stream.serialize_uint64(&mut self.session_count);
        stream.serialize_uint64(&mut self.bytes_sent);
        stream.serialize_uint64(&mut self.bytes_received);
        stream.serialize_bool(&mut self.shutting_down);

        if self.version >= 4 {
            stream.serialize_string(&mut self.relay_version, MAX_RELAY_VERSION_LENGTH);
            stream.serialize_float32(&mut self.cpu_usage);
        }
        if self.version >= 5 {
            stream.serialize_uint64(&mut self.envelope_up_kbps);
            stream.serialize_uint64(&mut self.envelope_down_kbps);
        }
        Ok(stream.result()?)
    }
}

/// A relay the reporting relay should ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelayPingTarget {
    pub relay_id: u64,
    pub address: SocketAddr,
}

/// Backend answer to [`RelayUpdateRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelayUpdateResponse {
    pub version: u32,
    pub timestamp: u64,
    pub relays_to_ping: Vec<RelayPingTarget>,
    /// From version 1.
    pub upcoming_magic: [u8; MAGIC_BYTES],
    /// From version 1.
    pub current_magic: [u8; MAGIC_BYTES],
    /// From version 1.
    pub previous_magic: [u8; MAGIC_BYTES],
}

impl Default for RelayUpdateResponse {
    fn default() -> Self {
        Self {
            version: RELAY_UPDATE_RESPONSE_VERSION,
            timestamp: 0,
            relays_to_ping: Vec::new(),
            upcoming_magic: [0; MAGIC_BYTES],
            current_magic: [0; MAGIC_BYTES],
            previous_magic: [0; MAGIC_BYTES],
        }
    }
}

impl Message for RelayUpdateResponse {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        stream.serialize_bits(&mut self.version, 8);
        stream.result()?;
        if self.version > RELAY_UPDATE_RESPONSE_VERSION {
            return Err(WireError::UnsupportedEnvelopeVersion {
                found: self.version,
            });
        }

        stream.serialize_uint64(&mut self.timestamp);

        let mut count = self.relays_to_ping.len();
        stream.serialize_length(&mut count, MAX_RELAYS);
        stream.result()?;
        if stream.is_reading() {
            self.relays_to_ping = vec![
                RelayPingTarget {
                    relay_id: 0,
                    address: unspecified_address(),
                };
                count
            ];
        }
        for target in &mut self.relays_to_ping {
            stream.serialize_uint64(&mut target.relay_id);
            serialize_required_address(&mut target.address, stream)?;
        }

        if self.version >= 1 {
            stream.serialize_bytes(&mut self.upcoming_magic);
            stream.serialize_bytes(&mut self.current_magic);
            stream.serialize_bytes(&mut self.previous_magic);
        }
        Ok(stream.result()?)
    }
}
