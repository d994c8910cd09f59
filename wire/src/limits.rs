//! Fixed bounds for every variable-length field.
//!
//! Each list is checked against its bound before anything is allocated, so a
//! hostile packet can never cost more than the worst-case sizes below.

/// Buffer size used when encoding client and server packets.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4096;

/// Buffer size used for relay update bodies, which carry per-relay stats.
pub const MAX_RELAY_PACKET_SIZE: usize = 64 * 1024;

/// Near relays reported by a client per slice.
pub const MAX_NEAR_RELAYS: usize = 32;

/// Tags attached to a session update.
pub const MAX_TAGS: usize = 8;

/// Bytes of opaque session data carried in a session packet.
pub const MAX_SESSION_DATA_SIZE: usize = 511;

/// Relays in a single route.
pub const MAX_RELAYS_PER_ROUTE: usize = 5;

/// Route tokens in a response: client, each relay, server.
pub const MAX_TOKENS: usize = MAX_RELAYS_PER_ROUTE + 2;

/// Length of a datacenter name.
pub const MAX_DATACENTER_NAME_LENGTH: usize = 256;

/// Retries of a single session update.
pub const MAX_SESSION_UPDATE_RETRIES: usize = 10;

/// Values in a match data request.
pub const MAX_MATCH_VALUES: usize = 64;

/// Length of the response debug string.
pub const MAX_DEBUG_LENGTH: usize = 1024;

/// Relays listed in a relay update request or response.
pub const MAX_RELAYS: usize = 1024;

/// Length of a relay's version string.
pub const MAX_RELAY_VERSION_LENGTH: usize = 32;

/// Length of a relay address string.
pub const MAX_RELAY_ADDRESS_LENGTH: usize = 256;

/// Bytes of the relay authentication token.
pub const RELAY_TOKEN_BYTES: usize = 32;

/// Bytes of an X25519 route public key.
pub const ROUTE_PUBLIC_KEY_BYTES: usize = 32;

/// Bytes of a network magic value.
pub const MAGIC_BYTES: usize = 8;

/// Bytes of an ed25519 signature.
pub const SIGNATURE_BYTES: usize = 64;
