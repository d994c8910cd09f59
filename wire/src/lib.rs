//! Versioned packet formats and framing for the nextroute protocol.
//!
//! Every message is a struct whose `serialize` function is its wire format,
//! built on the [`bitstream::Stream`] trait. This crate knows the packet
//! layouts, their version gates and the two framings (SDK4 signed, SDK5
//! chonkle/pittle). It knows nothing about buyers, routes or session state.
//!
//! # Design Principles
//!
//! - **Append-only formats** - A field is only ever added behind a new version gate.
//! - **Bounded decoding** - All list lengths are validated against [`limits`] before allocation.
//! - **All or nothing** - A decode either yields a complete message or an error.
//!
//! # Example
//!
//! ```
//! use ed25519_dalek::SigningKey;
//! use wire::{read_packet, write_packet, SdkVersion, ServerUpdatePacket};
//!
//! let key = SigningKey::from_bytes(&[7; 32]);
//! let mut packet = ServerUpdatePacket {
//!     version: SdkVersion::CURRENT,
//!     buyer_id: 1,
//!     num_sessions: 4,
//!     ..ServerUpdatePacket::default()
//! };
//! let bytes = write_packet(&mut packet, &key).unwrap();
//! let decoded: ServerUpdatePacket = read_packet(&bytes, &key.verifying_key()).unwrap();
//! assert_eq!(decoded.num_sessions, 4);
//! ```

mod error;
pub mod framing;
pub mod limits;
mod match_data;
mod packet;
mod relay;
mod server;
mod session;
pub mod token;
mod types;
mod version;

pub use error::{LimitKind, WireError, WireResult};
pub use match_data::{MatchDataRequestPacket, MatchDataResponsePacket, MatchDataResult};
pub use packet::{
    packet_type, read_message, read_packet, read_packet_unverified, verify_packet,
    write_message, write_packet, Message, Packet, SDK4_OVERHEAD,
};
pub use relay::{
    RelayPingStats, RelayPingTarget, RelayUpdateRequest, RelayUpdateResponse,
    RELAY_UPDATE_REQUEST_MIN_VERSION, RELAY_UPDATE_REQUEST_VERSION,
    RELAY_UPDATE_RESPONSE_VERSION,
};
pub use server::{
    ServerInitRequestPacket, ServerInitResponsePacket, ServerInitResult, ServerUpdatePacket,
};
pub use session::{
    NearRelay, NearRelayStats, SessionResponsePacket, SessionUpdatePacket, MAX_NEAR_RELAY_MS,
    MAX_NEAR_RELAY_PACKET_LOSS,
};
pub use types::{ConnectionType, FallbackFlags, PacketType, PlatformType, RouteType};
pub use version::SdkVersion;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_api_exports() {
        let _ = limits::DEFAULT_MAX_PACKET_SIZE;
        let _ = token::ENCRYPTED_NEXT_ROUTE_TOKEN_BYTES;
        let _ = framing::SDK5_OVERHEAD;
        let _ = SdkVersion::CURRENT;
        let _ = FallbackFlags::default();
        let _ = RouteType::Direct;
        let _: WireResult<()> = Ok(());
    }

    #[test]
    fn packet_types_match_messages() {
        assert_eq!(ServerUpdatePacket::TYPE, PacketType::ServerUpdate);
        assert_eq!(SessionUpdatePacket::TYPE, PacketType::SessionUpdate);
        assert_eq!(SessionResponsePacket::TYPE, PacketType::SessionResponse);
        assert_eq!(ServerInitRequestPacket::TYPE, PacketType::ServerInitRequest);
        assert_eq!(ServerInitResponsePacket::TYPE, PacketType::ServerInitResponse);
        assert_eq!(MatchDataRequestPacket::TYPE, PacketType::MatchDataRequest);
        assert_eq!(MatchDataResponsePacket::TYPE, PacketType::MatchDataResponse);
    }
}
