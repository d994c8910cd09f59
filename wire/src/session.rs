//! Session update request and response.
//!
//! The session update is sent by the game server once per slice for every
//! connected client. It carries the opaque session data blob returned by the
//! previous response, the client's path telemetry and its near-relay pings.
//!
//! # Version gates
//!
//! | Version | Change |
//! |---|---|
//! | 4.0.2 | lost packet counters |
//! | 4.0.3 | multiple tags, integer near relay stats |
//! | 4.0.4 | out-of-order counters, client/server jitter, response debug |
//! | 4.0.5 | wider platform range, response near relay exclusion |
//! | 4.0.6 | response `dont_ping_near_relays` |

use std::net::SocketAddr;

use bitstream::Stream;

use crate::error::{LimitKind, WireError, WireResult};
use crate::limits::{
    MAX_DEBUG_LENGTH, MAX_NEAR_RELAYS, MAX_SESSION_DATA_SIZE, MAX_SESSION_UPDATE_RETRIES,
    MAX_TAGS, MAX_TOKENS, ROUTE_PUBLIC_KEY_BYTES,
};
use crate::packet::{
    serialize_byte_vec, serialize_required_address, unspecified_address, Message, Packet,
};
use crate::token::{ENCRYPTED_CONTINUE_ROUTE_TOKEN_BYTES, ENCRYPTED_NEXT_ROUTE_TOKEN_BYTES};
use crate::types::{ConnectionType, FallbackFlags, PacketType, PlatformType, RouteType};
use crate::version::{serialize_sdk_version, SdkVersion};

/// Largest near relay RTT or jitter in milliseconds.
pub const MAX_NEAR_RELAY_MS: i32 = 255;

/// Largest near relay packet loss in percent.
pub const MAX_NEAR_RELAY_PACKET_LOSS: i32 = 100;

/// Client ping results for one near relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NearRelayStats {
    pub relay_id: u64,
    pub rtt: i32,
    pub jitter: i32,
    pub packet_loss: i32,
}

fn stat_from_float(value: f32, max: i32) -> i32 {
    (value.round() as i32).clamp(0, max)
}

impl NearRelayStats {
    fn serialize<S: Stream>(&mut self, version: SdkVersion, stream: &mut S) {
        stream.serialize_uint64(&mut self.relay_id);
        if version >= SdkVersion::new(4, 0, 3) {
            stream.serialize_integer(&mut self.rtt, 0, MAX_NEAR_RELAY_MS);
            stream.serialize_integer(&mut self.jitter, 0, MAX_NEAR_RELAY_MS);
            stream.serialize_integer(&mut self.packet_loss, 0, MAX_NEAR_RELAY_PACKET_LOSS);
        } else {
            let mut rtt = self.rtt as f32;
            let mut jitter = self.jitter as f32;
            let mut packet_loss = self.packet_loss as f32;
            stream.serialize_float32(&mut rtt);
            stream.serialize_float32(&mut jitter);
            stream.serialize_float32(&mut packet_loss);
            self.rtt = stat_from_float(rtt, MAX_NEAR_RELAY_MS);
            self.jitter = stat_from_float(jitter, MAX_NEAR_RELAY_MS);
            self.packet_loss = stat_from_float(packet_loss, MAX_NEAR_RELAY_PACKET_LOSS);
        }
    }
}

/// Per-slice session report from a game server.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionUpdatePacket {
    pub version: SdkVersion,
    pub buyer_id: u64,
    pub datacenter_id: u64,
    pub session_id: u64,
    pub slice_number: u32,
    pub retry_number: i32,
    /// Opaque blob echoed from the previous response.
    pub session_data: Vec<u8>,
    pub client_address: Option<SocketAddr>,
    pub server_address: Option<SocketAddr>,
    pub client_route_public_key: [u8; ROUTE_PUBLIC_KEY_BYTES],
    pub server_route_public_key: [u8; ROUTE_PUBLIC_KEY_BYTES],
    pub user_hash: u64,
    pub platform_type: PlatformType,
    pub connection_type: ConnectionType,
    pub next: bool,
    pub committed: bool,
    pub reported: bool,
    pub fallback_to_direct: bool,
    pub client_bandwidth_over_limit: bool,
    pub server_bandwidth_over_limit: bool,
    pub client_ping_timed_out: bool,
    /// Before 4.0.3 only the first tag is carried.
    pub tags: Vec<u64>,
    pub flags: FallbackFlags,
    pub user_flags: u64,
    pub direct_rtt: f32,
    pub direct_jitter: f32,
    pub direct_packet_loss: f32,
    pub next_rtt: f32,
    pub next_jitter: f32,
    pub next_packet_loss: f32,
    pub near_relays: Vec<NearRelayStats>,
    pub next_kbps_up: u32,
    pub next_kbps_down: u32,
    pub packets_sent_client_to_server: u64,
    pub packets_sent_server_to_client: u64,
    pub packets_lost_client_to_server: u64,
    pub packets_lost_server_to_client: u64,
    pub packets_out_of_order_client_to_server: u64,
    pub packets_out_of_order_server_to_client: u64,
    pub jitter_client_to_server: f32,
    pub jitter_server_to_client: f32,
}

impl SessionUpdatePacket {
    /// Largest platform value accepted at this packet's version.
    #[must_use]
    pub fn max_platform(&self) -> i32 {
        if self.version >= SdkVersion::new(4, 0, 5) {
            PlatformType::MAX
        } else {
            PlatformType::MAX_LEGACY
        }
    }

    fn serialize_tags<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        if self.version >= SdkVersion::new(4, 0, 3) {
            let mut has_tags = stream.is_writing() && !self.tags.is_empty();
            stream.serialize_bool(&mut has_tags);
            if has_tags {
                let mut count = self.tags.len();
                stream.serialize_length(&mut count, MAX_TAGS);
                stream.result()?;
                if stream.is_reading() {
                    self.tags = vec![0; count];
                }
                for tag in &mut self.tags {
                    stream.serialize_uint64(tag);
                }
            }
        } else {
            let mut has_tag = stream.is_writing() && !self.tags.is_empty();
            stream.serialize_bool(&mut has_tag);
            if has_tag {
                let mut tag = self.tags.first().copied().unwrap_or_default();
                stream.serialize_uint64(&mut tag);
                if stream.is_reading() {
                    self.tags = vec![tag];
                }
            }
        }
        Ok(stream.result()?)
    }
}

impl Message for SessionUpdatePacket {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        serialize_sdk_version(&mut self.version, stream)?;

        stream.serialize_uint64(&mut self.buyer_id);
        stream.serialize_uint64(&mut self.datacenter_id);
        stream.serialize_uint64(&mut self.session_id);
        stream.serialize_uint32(&mut self.slice_number);
        stream.serialize_integer(&mut self.retry_number, 0, MAX_SESSION_UPDATE_RETRIES as i32);
        serialize_byte_vec(&mut self.session_data, MAX_SESSION_DATA_SIZE, stream)?;

        stream.serialize_address(&mut self.client_address);
        stream.serialize_address(&mut self.server_address);
        stream.serialize_bytes(&mut self.client_route_public_key);
        stream.serialize_bytes(&mut self.server_route_public_key);
        stream.serialize_uint64(&mut self.user_hash);

        let mut platform = self.platform_type as i32;
        stream.serialize_integer(&mut platform, 0, self.max_platform());
        self.platform_type = PlatformType::from_i32(platform).unwrap_or_default();
        let mut connection = self.connection_type as i32;
        stream.serialize_integer(&mut connection, 0, ConnectionType::MAX);
        self.connection_type = ConnectionType::from_i32(connection).unwrap_or_default();

        stream.serialize_bool(&mut self.next);
        stream.serialize_bool(&mut self.committed);
        stream.serialize_bool(&mut self.reported);
        stream.serialize_bool(&mut self.fallback_to_direct);
        stream.serialize_bool(&mut self.client_bandwidth_over_limit);
        stream.serialize_bool(&mut self.server_bandwidth_over_limit);
        stream.serialize_bool(&mut self.client_ping_timed_out);

        self.serialize_tags(stream)?;

        let mut has_flags = stream.is_writing() && !self.flags.is_empty();
        stream.serialize_bool(&mut has_flags);
        if has_flags {
            let mut raw = self.flags.raw();
            stream.serialize_uint32(&mut raw);
            self.flags = FallbackFlags::from_raw(raw);
        }

        let mut has_user_flags = stream.is_writing() && self.user_flags != 0;
        stream.serialize_bool(&mut has_user_flags);
        if has_user_flags {
            stream.serialize_uint64(&mut self.user_flags);
        }

        stream.serialize_float32(&mut self.direct_rtt);
        stream.serialize_float32(&mut self.direct_jitter);
        stream.serialize_float32(&mut self.direct_packet_loss);

        if self.next {
            stream.serialize_float32(&mut self.next_rtt);
            stream.serialize_float32(&mut self.next_jitter);
            stream.serialize_float32(&mut self.next_packet_loss);
        }

        let mut num_near_relays = self.near_relays.len();
        stream.serialize_length(&mut num_near_relays, MAX_NEAR_RELAYS);
        stream.result()?;
        if stream.is_reading() {
            self.near_relays = vec![NearRelayStats::default(); num_near_relays];
        }
        let version = self.version;
        for relay in &mut self.near_relays {
            relay.serialize(version, stream);
        }

        if self.next {
            stream.serialize_uint32(&mut self.next_kbps_up);
            stream.serialize_uint32(&mut self.next_kbps_down);
        }

        stream.serialize_uint64(&mut self.packets_sent_client_to_server);
        stream.serialize_uint64(&mut self.packets_sent_server_to_client);

        if self.version >= SdkVersion::new(4, 0, 2) {
            let mut has_lost = stream.is_writing()
                && (self.packets_lost_client_to_server != 0
                    || self.packets_lost_server_to_client != 0);
            stream.serialize_bool(&mut has_lost);
            if has_lost {
                stream.serialize_uint64(&mut self.packets_lost_client_to_server);
                stream.serialize_uint64(&mut self.packets_lost_server_to_client);
            }
        }

        if self.version >= SdkVersion::new(4, 0, 4) {
            let mut has_out_of_order = stream.is_writing()
                && (self.packets_out_of_order_client_to_server != 0
                    || self.packets_out_of_order_server_to_client != 0);
            stream.serialize_bool(&mut has_out_of_order);
            if has_out_of_order {
                stream.serialize_uint64(&mut self.packets_out_of_order_client_to_server);
                stream.serialize_uint64(&mut self.packets_out_of_order_server_to_client);
            }
            stream.serialize_float32(&mut self.jitter_client_to_server);
            stream.serialize_float32(&mut self.jitter_server_to_client);
        }

        Ok(stream.result()?)
    }
}

impl Packet for SessionUpdatePacket {
    const TYPE: PacketType = PacketType::SessionUpdate;
}

/// A near relay the client should ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NearRelay {
    pub relay_id: u64,
    pub address: SocketAddr,
}

impl Default for NearRelay {
    fn default() -> Self {
        Self {
            relay_id: 0,
            address: unspecified_address(),
        }
    }
}

/// Backend decision for one session update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionResponsePacket {
    pub version: SdkVersion,
    pub session_id: u64,
    pub slice_number: u32,
    pub session_data: Vec<u8>,
    pub route_type: RouteType,
    pub near_relays_changed: bool,
    /// Carried only when `near_relays_changed` is set.
    pub near_relays: Vec<NearRelay>,
    pub multipath: bool,
    pub committed: bool,
    pub num_tokens: usize,
    /// `num_tokens` encrypted tokens, sized by `route_type`.
    pub tokens: Vec<u8>,
    /// From 4.0.4.
    pub debug: String,
    /// From 4.0.5.
    pub exclude_near_relays: bool,
    /// From 4.0.5, carried when `exclude_near_relays` is set.
    pub near_relay_excluded: [bool; MAX_NEAR_RELAYS],
    /// From 4.0.6.
    pub dont_ping_near_relays: bool,
}

impl SessionResponsePacket {
    /// Bytes of one encrypted token for this response's route type.
    #[must_use]
    pub const fn token_size(&self) -> usize {
        match self.route_type {
            RouteType::Direct => 0,
            RouteType::New => ENCRYPTED_NEXT_ROUTE_TOKEN_BYTES,
            RouteType::Continue => ENCRYPTED_CONTINUE_ROUTE_TOKEN_BYTES,
        }
    }

    fn serialize_tokens<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        stream.serialize_bool(&mut self.multipath);
        stream.serialize_bool(&mut self.committed);
        stream.serialize_length(&mut self.num_tokens, MAX_TOKENS);
        stream.result()?;

        let expected = self.num_tokens * self.token_size();
        if stream.is_reading() {
            self.tokens = vec![0; expected];
        } else if self.tokens.len() != expected {
            return Err(WireError::LimitsExceeded {
                kind: LimitKind::TokenBytes,
                limit: expected,
                actual: self.tokens.len(),
            });
        }
        if expected > 0 {
            stream.serialize_bytes(&mut self.tokens);
        }
        Ok(stream.result()?)
    }
}

impl Message for SessionResponsePacket {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        serialize_sdk_version(&mut self.version, stream)?;

        stream.serialize_uint64(&mut self.session_id);
        stream.serialize_uint32(&mut self.slice_number);
        serialize_byte_vec(&mut self.session_data, MAX_SESSION_DATA_SIZE, stream)?;

        let mut route_type = self.route_type as i32;
        stream.serialize_integer(&mut route_type, 0, RouteType::MAX);
        self.route_type = RouteType::from_i32(route_type).unwrap_or_default();

        stream.serialize_bool(&mut self.near_relays_changed);
        if self.near_relays_changed {
            let mut count = self.near_relays.len();
            stream.serialize_length(&mut count, MAX_NEAR_RELAYS);
            stream.result()?;
            if stream.is_reading() {
                self.near_relays = vec![NearRelay::default(); count];
            }
            for relay in &mut self.near_relays {
                stream.serialize_uint64(&mut relay.relay_id);
                serialize_required_address(&mut relay.address, stream)?;
            }
        }

        if self.route_type != RouteType::Direct {
            self.serialize_tokens(stream)?;
        }

        if self.version >= SdkVersion::new(4, 0, 4) {
            let mut has_debug = stream.is_writing() && !self.debug.is_empty();
            stream.serialize_bool(&mut has_debug);
            if has_debug {
                stream.serialize_string(&mut self.debug, MAX_DEBUG_LENGTH);
            }
        }

        if self.version >= SdkVersion::new(4, 0, 5) {
            stream.serialize_bool(&mut self.exclude_near_relays);
            if self.exclude_near_relays {
                for excluded in &mut self.near_relay_excluded {
                    stream.serialize_bool(excluded);
                }
            }
        }

        if self.version >= SdkVersion::new(4, 0, 6) {
            stream.serialize_bool(&mut self.dont_ping_near_relays);
        }

        Ok(stream.result()?)
    }
}

impl Packet for SessionResponsePacket {
    const TYPE: PacketType = PacketType::SessionResponse;
}
