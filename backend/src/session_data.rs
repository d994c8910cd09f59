//! Session state that round-trips through the client.
//!
//! The backend keeps nothing between updates. Everything it needs to
//! continue a session is written into this blob, sent back in the response
//! and echoed by the game server in the next update.
//!
//! # Versioning
//!
//! Fields are only ever appended, each block behind a version check. A blob
//! written at an older version decodes with the newer fields at their
//! defaults; a blob from a newer version is rejected.
//!
//! | Version | Fields |
//! |---|---|
//! | 0 | identity, slice, expiry, location, route, route state |
//! | 1 | `ever_on_next` |
//! | 2 | `fell_back_to_direct` |
//! | 3 | previous slice packet counters |
//! | 4 | near relay hold, `large_customer` |
//! | 5 | price and envelope sums, `duration_on_next` |

use bitstream::Stream;
use serde::{Deserialize, Serialize};
use wire::limits::{MAX_NEAR_RELAYS, MAX_RELAYS_PER_ROUTE, MAX_SESSION_DATA_SIZE};
use wire::{read_message, write_message, Message, WireError, WireResult, MAX_NEAR_RELAY_MS};

use crate::pricing::Nibblins;
use crate::route_matrix::INVALID_ROUTE_VALUE;
use crate::route_state::RouteState;
use crate::types::Location;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub version: u32,
    pub session_id: u64,
    /// Bumped each time the session takes a new route.
    pub session_version: u8,
    /// Last slice the backend accepted.
    pub slice_number: u32,
    pub expire_timestamp: u64,
    pub initial: bool,
    pub location: Location,
    pub route_num_relays: usize,
    /// Predicted RTT of the current route in milliseconds.
    pub route_cost: i32,
    pub route_relay_ids: [u64; MAX_RELAYS_PER_ROUTE],
    pub route_state: RouteState,
    pub ever_on_next: bool,
    pub fell_back_to_direct: bool,
    pub prev_packets_sent_client_to_server: u64,
    pub prev_packets_sent_server_to_client: u64,
    pub prev_packets_lost_client_to_server: u64,
    pub prev_packets_lost_server_to_client: u64,
    pub hold_near_relays: bool,
    pub hold_near_relay_rtt: Vec<i32>,
    /// Buyer's large customer flag as seen on the previous slice.
    pub large_customer: bool,
    pub total_price_sum: Nibblins,
    pub next_envelope_bytes_up_sum: u64,
    pub next_envelope_bytes_down_sum: u64,
    /// Seconds spent on network next.
    pub duration_on_next: u32,
}

impl Default for SessionData {
    fn default() -> Self {
        Self {
            version: Self::VERSION,
            session_id: 0,
            session_version: 0,
            slice_number: 0,
            expire_timestamp: 0,
            initial: false,
            location: Location::default(),
            route_num_relays: 0,
            route_cost: 0,
            route_relay_ids: [0; MAX_RELAYS_PER_ROUTE],
            route_state: RouteState::default(),
            ever_on_next: false,
            fell_back_to_direct: false,
            prev_packets_sent_client_to_server: 0,
            prev_packets_sent_server_to_client: 0,
            prev_packets_lost_client_to_server: 0,
            prev_packets_lost_server_to_client: 0,
            hold_near_relays: false,
            hold_near_relay_rtt: Vec::new(),
            large_customer: false,
            total_price_sum: Nibblins::ZERO,
            next_envelope_bytes_up_sum: 0,
            next_envelope_bytes_down_sum: 0,
            duration_on_next: 0,
        }
    }
}

impl SessionData {
    pub const VERSION: u32 = 5;

    /// Encodes at `self.version`.
    pub fn write(&mut self) -> WireResult<Vec<u8>> {
        write_message(self, MAX_SESSION_DATA_SIZE)
    }

    pub fn read(data: &[u8]) -> WireResult<Self> {
        read_message(data)
    }

    /// Relay ids of the current route, in order.
    #[must_use]
    pub fn route_relays(&self) -> &[u64] {
        &self.route_relay_ids[..self.route_num_relays.min(MAX_RELAYS_PER_ROUTE)]
    }

    pub fn set_route(&mut self, relay_ids: &[u64], cost: i32) {
        let count = relay_ids.len().min(MAX_RELAYS_PER_ROUTE);
        self.route_relay_ids = [0; MAX_RELAYS_PER_ROUTE];
        self.route_relay_ids[..count].copy_from_slice(&relay_ids[..count]);
        self.route_num_relays = count;
        self.route_cost = cost.clamp(0, INVALID_ROUTE_VALUE);
    }

    pub fn clear_route(&mut self) {
        self.route_relay_ids = [0; MAX_RELAYS_PER_ROUTE];
        self.route_num_relays = 0;
        self.route_cost = 0;
    }

    fn serialize_location<S: Stream>(&mut self, stream: &mut S) {
        stream.serialize_float32(&mut self.location.latitude);
        stream.serialize_float32(&mut self.location.longitude);
        stream.serialize_uint32(&mut self.location.asn);
    }

    fn serialize_route<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        stream.serialize_length(&mut self.route_num_relays, MAX_RELAYS_PER_ROUTE);
        stream.serialize_integer(&mut self.route_cost, 0, INVALID_ROUTE_VALUE);
        stream.result()?;
        for id in &mut self.route_relay_ids[..self.route_num_relays] {
            stream.serialize_uint64(id);
        }
        Ok(stream.result()?)
    }

    fn serialize_hold<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        stream.serialize_bool(&mut self.hold_near_relays);
        let mut count = self.hold_near_relay_rtt.len();
        stream.serialize_length(&mut count, MAX_NEAR_RELAYS);
        stream.result()?;
        if stream.is_reading() {
            self.hold_near_relay_rtt = vec![0; count];
        }
        for rtt in &mut self.hold_near_relay_rtt {
            stream.serialize_integer(rtt, 0, MAX_NEAR_RELAY_MS);
        }
        stream.serialize_bool(&mut self.large_customer);
        Ok(stream.result()?)
    }
}

impl Message for SessionData {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        if self.version > Self::VERSION {
            return Err(WireError::UnsupportedEnvelopeVersion {
                found: self.version,
            });
        }
        stream.serialize_bits(&mut self.version, 8);
        stream.result()?;
        if self.version > Self::VERSION {
            return Err(WireError::UnsupportedEnvelopeVersion {
                found: self.version,
            });
        }

        stream.serialize_uint64(&mut self.session_id);
        let mut session_version = u32::from(self.session_version);
        stream.serialize_bits(&mut session_version, 8);
        self.session_version = session_version as u8;
        stream.serialize_uint32(&mut self.slice_number);
        stream.serialize_uint64(&mut self.expire_timestamp);
        stream.serialize_bool(&mut self.initial);
        self.serialize_location(stream);
        self.serialize_route(stream)?;
        self.route_state.serialize_state(stream)?;

        if self.version >= 1 {
            stream.serialize_bool(&mut self.ever_on_next);
        }

        if self.version >= 2 {
            stream.serialize_bool(&mut self.fell_back_to_direct);
        }

        if self.version >= 3 {
            stream.serialize_uint64(&mut self.prev_packets_sent_client_to_server);
            stream.serialize_uint64(&mut self.prev_packets_sent_server_to_client);
            stream.serialize_uint64(&mut self.prev_packets_lost_client_to_server);
            stream.serialize_uint64(&mut self.prev_packets_lost_server_to_client);
        }

        if self.version >= 4 {
            self.serialize_hold(stream)?;
        }

        if self.version >= 5 {
            let mut total = self.total_price_sum.raw();
            stream.serialize_uint64(&mut total);
            self.total_price_sum = Nibblins::new(total);
            stream.serialize_uint64(&mut self.next_envelope_bytes_up_sum);
            stream.serialize_uint64(&mut self.next_envelope_bytes_down_sum);
            stream.serialize_uint32(&mut self.duration_on_next);
        }

        Ok(stream.result()?)
    }
}
