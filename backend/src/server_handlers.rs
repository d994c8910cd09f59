//! Server init, server update, match data and relay update handlers.
//!
//! Server init and match data requests from an unknown buyer, or with a bad
//! signature, are dropped without a reply. Once the request is authenticated
//! they answer with a result code, so the game server can tell a rejection
//! from packet loss. Server updates are fire-and-forget. Relay updates are answered only for
//! a known relay presenting its token.

use tracing::debug;
use wire::limits::MAX_RELAY_PACKET_SIZE;
use wire::{
    read_message, read_packet_unverified, verify_packet, write_message, write_packet,
    MatchDataRequestPacket, MatchDataResponsePacket, MatchDataResult, RelayPingTarget,
    RelayUpdateRequest, RelayUpdateResponse, ServerInitRequestPacket, ServerInitResponsePacket,
    ServerInitResult, ServerUpdatePacket, RELAY_UPDATE_RESPONSE_VERSION,
};

use crate::config::BackendConfig;
use crate::database::Database;
use crate::error::HandlerError;
use crate::keys::BackendKeys;
use crate::magic::MagicValues;
use crate::metrics::{Counter, Metrics};
use crate::types::Buyer;

/// Shared inputs of the non-session handlers.
pub struct HandlerContext<'a> {
    pub config: &'a BackendConfig,
    pub database: &'a Database,
    pub keys: &'a BackendKeys,
    pub metrics: &'a Metrics,
    pub magic: &'a MagicValues,
    /// Unix seconds.
    pub now: u64,
}

fn counted<T>(
    metrics: &Metrics,
    received: Counter,
    dropped: Counter,
    what: &'static str,
    result: Result<T, HandlerError>,
) -> Option<T> {
    metrics.increment(received);
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            metrics.increment(dropped);
            debug!(error = %err, "dropped {what}");
            None
        }
    }
}

/// Looks up the sending buyer and checks the packet's signature against
/// its key.
fn authenticated_buyer<'a>(
    database: &'a Database,
    buyer_id: u64,
    data: &[u8],
) -> Result<&'a Buyer, HandlerError> {
    let buyer = database
        .buyer(buyer_id)
        .ok_or(HandlerError::BuyerNotFound { buyer_id })?;
    let verified = buyer
        .verifying_key()
        .is_some_and(|key| verify_packet(data, &key).is_ok());
    if !verified {
        return Err(HandlerError::SignatureCheckFailed { buyer_id });
    }
    Ok(buyer)
}

pub fn handle_server_init(ctx: &HandlerContext<'_>, data: &[u8]) -> Option<Vec<u8>> {
    counted(
        ctx.metrics,
        Counter::ServerInitReceived,
        Counter::ServerInitDropped,
        "server init",
        try_handle_server_init(ctx, data),
    )
}

pub fn try_handle_server_init(
    ctx: &HandlerContext<'_>,
    data: &[u8],
) -> Result<Vec<u8>, HandlerError> {
    let request: ServerInitRequestPacket =
        read_packet_unverified(data).map_err(HandlerError::ReadPacket)?;
    let buyer = authenticated_buyer(ctx.database, request.buyer_id, data)?;
    let result = server_init_result(ctx, buyer, &request);
    if result != ServerInitResult::Ok {
        debug!(
            buyer_id = request.buyer_id,
            datacenter_id = request.datacenter_id,
            ?result,
            "server init rejected"
        );
    }

    let mut response = ServerInitResponsePacket {
        version: request.version,
        request_id: request.request_id,
        response: result,
        upcoming_magic: ctx.magic.upcoming,
        current_magic: ctx.magic.current,
        previous_magic: ctx.magic.previous,
    };
    write_packet(&mut response, &ctx.keys.signing_key).map_err(HandlerError::WriteResponse)
}

fn server_init_result(
    ctx: &HandlerContext<'_>,
    buyer: &Buyer,
    request: &ServerInitRequestPacket,
) -> ServerInitResult {
    if !buyer.live {
        return ServerInitResult::BuyerNotActive;
    }
    if request.version < ctx.config.min_sdk_version {
        return ServerInitResult::OldSdkVersion;
    }
    if ctx.database.datacenter(request.datacenter_id).is_none() {
        return ServerInitResult::UnknownDatacenter;
    }
    if !buyer.is_acceleration_enabled(request.datacenter_id) {
        return ServerInitResult::DatacenterNotEnabled;
    }
    ServerInitResult::Ok
}

/// Authenticates a server heartbeat. There is no response.
pub fn handle_server_update(ctx: &HandlerContext<'_>, data: &[u8]) -> Option<ServerUpdatePacket> {
    counted(
        ctx.metrics,
        Counter::ServerUpdateReceived,
        Counter::ServerUpdateDropped,
        "server update",
        try_handle_server_update(ctx, data),
    )
}

pub fn try_handle_server_update(
    ctx: &HandlerContext<'_>,
    data: &[u8],
) -> Result<ServerUpdatePacket, HandlerError> {
    let update: ServerUpdatePacket =
        read_packet_unverified(data).map_err(HandlerError::ReadPacket)?;
    authenticated_buyer(ctx.database, update.buyer_id, data)?;
    debug!(
        buyer_id = update.buyer_id,
        datacenter_id = update.datacenter_id,
        num_sessions = update.num_sessions,
        "server update"
    );
    Ok(update)
}

pub fn handle_match_data(ctx: &HandlerContext<'_>, data: &[u8]) -> Option<Vec<u8>> {
    counted(
        ctx.metrics,
        Counter::MatchDataReceived,
        Counter::MatchDataDropped,
        "match data",
        try_handle_match_data(ctx, data),
    )
}

pub fn try_handle_match_data(
    ctx: &HandlerContext<'_>,
    data: &[u8],
) -> Result<Vec<u8>, HandlerError> {
    let request: MatchDataRequestPacket =
        read_packet_unverified(data).map_err(HandlerError::ReadPacket)?;
    let buyer = authenticated_buyer(ctx.database, request.buyer_id, data)?;
    let result = if buyer.live {
        MatchDataResult::Ok
    } else {
        MatchDataResult::BuyerNotLive
    };

    let mut response = MatchDataResponsePacket {
        version: request.version,
        session_id: request.session_id,
        response: result,
    };
    write_packet(&mut response, &ctx.keys.signing_key).map_err(HandlerError::WriteResponse)
}

pub fn handle_relay_update(ctx: &HandlerContext<'_>, data: &[u8]) -> Option<Vec<u8>> {
    counted(
        ctx.metrics,
        Counter::RelayUpdateReceived,
        Counter::RelayUpdateDropped,
        "relay update",
        try_handle_relay_update(ctx, data),
    )
}

/// Answers a relay with every other relay to ping and the current magic.
pub fn try_handle_relay_update(
    ctx: &HandlerContext<'_>,
    data: &[u8],
) -> Result<Vec<u8>, HandlerError> {
    let request: RelayUpdateRequest = read_message(data).map_err(HandlerError::ReadPacket)?;
    let relay = ctx
        .database
        .relay_by_address(&request.address)
        .ok_or(HandlerError::UnknownRelay {
            address: request.address,
        })?;
    if relay.token != request.token {
        return Err(HandlerError::BadRelayToken { relay_id: relay.id });
    }

    let mut relays_to_ping: Vec<_> = ctx
        .database
        .relays()
        .filter(|other| other.id != relay.id)
        .map(|other| RelayPingTarget {
            relay_id: other.id,
            address: other.address,
        })
        .collect();
    relays_to_ping.sort_by_key(|target| target.relay_id);

    let mut response = RelayUpdateResponse {
        version: RELAY_UPDATE_RESPONSE_VERSION,
        timestamp: ctx.now,
        relays_to_ping,
        upcoming_magic: ctx.magic.upcoming,
        current_magic: ctx.magic.current,
        previous_magic: ctx.magic.previous,
    };
    write_message(&mut response, MAX_RELAY_PACKET_SIZE).map_err(HandlerError::WriteResponse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::Nibblins;
    use crate::types::{Datacenter, Location, Relay, Seller};
    use ed25519_dalek::SigningKey;
    use std::net::SocketAddr;
    use wire::{read_packet, SdkVersion};

    const BUYER_ID: u64 = 0xB0;
    const DATACENTER_ID: u64 = 0xDC;

    struct Fixture {
        config: BackendConfig,
        database: Database,
        keys: BackendKeys,
        metrics: Metrics,
        magic: MagicValues,
        buyer_key: SigningKey,
    }

    fn addr(i: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, i], 40000))
    }

    impl Fixture {
        fn new(live: bool) -> Self {
            let buyer_key = SigningKey::from_bytes(&[3; 32]);
            let buyer = Buyer {
                id: BUYER_ID,
                name: "buyer".into(),
                live,
                analysis_only: false,
                large_customer: false,
                debug: false,
                public_key: buyer_key.verifying_key().to_bytes(),
                route_shader: None,
                accelerated_datacenters: vec![DATACENTER_ID],
            };
            let relay = |id: u64| Relay {
                id,
                name: format!("relay-{id}"),
                address: addr(id as u8),
                datacenter_id: DATACENTER_ID,
                seller_id: 1,
                public_key: [id as u8; 32],
                token: [id as u8; 32],
                egress_price_override: None,
            };
            let database = Database::new(
                vec![buyer],
                vec![Seller {
                    id: 1,
                    name: "seller".into(),
                    egress_price_per_gb: Nibblins::new(100),
                }],
                vec![
                    Datacenter {
                        id: DATACENTER_ID,
                        name: "dc".into(),
                        location: Location::new(1.0, 1.0, 0),
                    },
                    Datacenter {
                        id: 0xDD,
                        name: "other".into(),
                        location: Location::new(2.0, 2.0, 0),
                    },
                ],
                vec![relay(3), relay(1), relay(2)],
            );
            Self {
                config: BackendConfig::default(),
                database,
                keys: BackendKeys::from_bytes(&[5; 32], [6; 32]),
                metrics: Metrics::new(),
                magic: MagicValues {
                    upcoming: [1; 8],
                    current: [2; 8],
                    previous: [3; 8],
                },
                buyer_key,
            }
        }

        fn ctx(&self) -> HandlerContext<'_> {
            HandlerContext {
                config: &self.config,
                database: &self.database,
                keys: &self.keys,
                metrics: &self.metrics,
                magic: &self.magic,
                now: 1_000,
            }
        }
    }

    fn init_request(datacenter_id: u64, version: SdkVersion) -> ServerInitRequestPacket {
        ServerInitRequestPacket {
            version,
            buyer_id: BUYER_ID,
            datacenter_id,
            request_id: 77,
            datacenter_name: "dc".into(),
        }
    }

    fn init_result(fx: &Fixture, data: &[u8]) -> ServerInitResponsePacket {
        let bytes = handle_server_init(&fx.ctx(), data).unwrap();
        read_packet(&bytes, &fx.keys.verifying_key()).unwrap()
    }

    #[test]
    fn server_init_ok_carries_magic() {
        let fx = Fixture::new(true);
        let data = write_packet(&mut init_request(DATACENTER_ID, SdkVersion::CURRENT), &fx.buyer_key)
            .unwrap();
        let response = init_result(&fx, &data);
        assert_eq!(response.response, ServerInitResult::Ok);
        assert_eq!(response.request_id, 77);
        assert_eq!(response.current_magic, [2; 8]);
        assert_eq!(fx.metrics.get(Counter::ServerInitReceived), 1);
    }

    #[test]
    fn server_init_result_codes() {
        let fx = Fixture::new(true);
        let cases = [
            (0xDD, SdkVersion::CURRENT, ServerInitResult::DatacenterNotEnabled),
            (0xEE, SdkVersion::CURRENT, ServerInitResult::UnknownDatacenter),
        ];
        for (datacenter_id, version, expected) in cases {
            let data =
                write_packet(&mut init_request(datacenter_id, version), &fx.buyer_key).unwrap();
            assert_eq!(init_result(&fx, &data).response, expected);
        }

        let fx = Fixture::new(false);
        let data = write_packet(&mut init_request(DATACENTER_ID, SdkVersion::CURRENT), &fx.buyer_key)
            .unwrap();
        assert_eq!(init_result(&fx, &data).response, ServerInitResult::BuyerNotActive);
    }

    #[test]
    fn forged_server_init_gets_no_response() {
        let fx = Fixture::new(true);
        let impostor = SigningKey::from_bytes(&[4; 32]);
        let data = write_packet(&mut init_request(DATACENTER_ID, SdkVersion::CURRENT), &impostor)
            .unwrap();
        assert_eq!(
            try_handle_server_init(&fx.ctx(), &data).unwrap_err(),
            HandlerError::SignatureCheckFailed { buyer_id: BUYER_ID }
        );
        assert!(handle_server_init(&fx.ctx(), &data).is_none());

        let mut request = init_request(DATACENTER_ID, SdkVersion::CURRENT);
        request.buyer_id = 1;
        let data = write_packet(&mut request, &fx.buyer_key).unwrap();
        assert_eq!(
            try_handle_server_init(&fx.ctx(), &data).unwrap_err(),
            HandlerError::BuyerNotFound { buyer_id: 1 }
        );
        assert!(handle_server_init(&fx.ctx(), &data).is_none());

        assert_eq!(fx.metrics.get(Counter::ServerInitReceived), 2);
        assert_eq!(fx.metrics.get(Counter::ServerInitDropped), 2);
    }

    #[test]
    fn server_init_rejects_old_sdk() {
        let mut fx = Fixture::new(true);
        fx.config.min_sdk_version = SdkVersion::new(4, 0, 5);
        let data = write_packet(
            &mut init_request(DATACENTER_ID, SdkVersion::new(4, 0, 4)),
            &fx.buyer_key,
        )
        .unwrap();
        assert_eq!(init_result(&fx, &data).response, ServerInitResult::OldSdkVersion);
    }

    #[test]
    fn server_update_requires_signature() {
        let fx = Fixture::new(true);
        let mut update = ServerUpdatePacket {
            version: SdkVersion::CURRENT,
            buyer_id: BUYER_ID,
            datacenter_id: DATACENTER_ID,
            num_sessions: 12,
            server_address: Some(addr(50)),
            uptime: 60,
        };
        let data = write_packet(&mut update, &fx.buyer_key).unwrap();
        assert_eq!(handle_server_update(&fx.ctx(), &data).unwrap().num_sessions, 12);

        let data = write_packet(&mut update, &SigningKey::from_bytes(&[9; 32])).unwrap();
        assert!(handle_server_update(&fx.ctx(), &data).is_none());
        assert_eq!(fx.metrics.get(Counter::ServerUpdateReceived), 2);
        assert_eq!(fx.metrics.get(Counter::ServerUpdateDropped), 1);
    }

    #[test]
    fn match_data_result_codes() {
        let mut request = MatchDataRequestPacket {
            version: SdkVersion::CURRENT,
            buyer_id: BUYER_ID,
            session_id: 42,
            match_id: 7,
            match_values: vec![1.5, 2.5],
            ..MatchDataRequestPacket::default()
        };

        let fx = Fixture::new(true);
        let data = write_packet(&mut request, &fx.buyer_key).unwrap();
        let bytes = handle_match_data(&fx.ctx(), &data).unwrap();
        let response: MatchDataResponsePacket =
            read_packet(&bytes, &fx.keys.verifying_key()).unwrap();
        assert_eq!(response.session_id, 42);
        assert_eq!(response.response, MatchDataResult::Ok);

        let fx = Fixture::new(false);
        let bytes = handle_match_data(&fx.ctx(), &data).unwrap();
        let response: MatchDataResponsePacket =
            read_packet(&bytes, &fx.keys.verifying_key()).unwrap();
        assert_eq!(response.response, MatchDataResult::BuyerNotLive);
    }

    #[test]
    fn match_data_from_unknown_or_forged_sender_is_dropped() {
        let fx = Fixture::new(true);
        let mut request = MatchDataRequestPacket {
            version: SdkVersion::CURRENT,
            buyer_id: 1,
            session_id: 42,
            ..MatchDataRequestPacket::default()
        };
        let data = write_packet(&mut request, &fx.buyer_key).unwrap();
        assert!(handle_match_data(&fx.ctx(), &data).is_none());

        request.buyer_id = BUYER_ID;
        let data = write_packet(&mut request, &SigningKey::from_bytes(&[9; 32])).unwrap();
        assert_eq!(
            try_handle_match_data(&fx.ctx(), &data).unwrap_err(),
            HandlerError::SignatureCheckFailed { buyer_id: BUYER_ID }
        );
        assert_eq!(fx.metrics.get(Counter::MatchDataDropped), 1);
    }

    #[test]
    fn relay_update_lists_other_relays() {
        let fx = Fixture::new(true);
        let mut request = RelayUpdateRequest {
            address: addr(2),
            token: [2; 32],
            ..RelayUpdateRequest::default()
        };
        let data = write_message(&mut request, MAX_RELAY_PACKET_SIZE).unwrap();
        let bytes = handle_relay_update(&fx.ctx(), &data).unwrap();
        let response: RelayUpdateResponse = read_message(&bytes).unwrap();
        let ids: Vec<_> = response.relays_to_ping.iter().map(|t| t.relay_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(response.timestamp, 1_000);
        assert_eq!(response.previous_magic, [3; 8]);
    }

    #[test]
    fn relay_update_rejects_unknown_or_bad_token() {
        let fx = Fixture::new(true);
        let mut request = RelayUpdateRequest {
            address: addr(2),
            token: [9; 32],
            ..RelayUpdateRequest::default()
        };
        let data = write_message(&mut request, MAX_RELAY_PACKET_SIZE).unwrap();
        assert_eq!(
            try_handle_relay_update(&fx.ctx(), &data).unwrap_err(),
            HandlerError::BadRelayToken { relay_id: 2 }
        );

        request.address = addr(99);
        let data = write_message(&mut request, MAX_RELAY_PACKET_SIZE).unwrap();
        assert_eq!(
            try_handle_relay_update(&fx.ctx(), &data).unwrap_err(),
            HandlerError::UnknownRelay { address: addr(99) }
        );
        assert!(handle_relay_update(&fx.ctx(), &data).is_none());
        assert_eq!(fx.metrics.get(Counter::RelayUpdateDropped), 1);
    }
}
