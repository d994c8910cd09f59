use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use backend::{
    handle_match_data, handle_relay_update, handle_server_init, handle_server_update,
    handle_session_update, BackendConfig, BackendKeys, BillingQueue, Counter, Database,
    HandlerContext, IpLocator, MagicValues, Metrics, RouteMatrix, SessionUpdateContext,
    SnapshotCell,
};
use tracing::debug;
use wire::framing::{basic_packet_filter, unwrap_sdk5, wrap_sdk5};
use wire::{packet_type, PacketType};

/// Everything the workers share.
pub struct State {
    pub backend: BackendConfig,
    pub public_address: SocketAddr,
    pub keys: BackendKeys,
    pub database: SnapshotCell<Database>,
    pub route_matrix: SnapshotCell<RouteMatrix>,
    pub magic: SnapshotCell<MagicValues>,
    pub locator: Box<dyn IpLocator>,
    pub metrics: Arc<Metrics>,
    pub billing: Option<BillingQueue>,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

impl State {
    /// Handles one datagram from a game server.
    ///
    /// SDK5 packets are filtered against the current magic values and
    /// answered in SDK5 framing; anything else is treated as SDK4.
    pub fn handle_sdk_datagram(&self, data: &[u8], from: SocketAddr, now: u64) -> Option<Vec<u8>> {
        let magic = self.magic.load();
        let sdk5 = basic_packet_filter(data);
        let packet = if sdk5 {
            match unwrap_sdk5(data, &magic.candidates(), &from, &self.public_address) {
                Ok(packet) => Cow::Owned(packet),
                Err(err) => {
                    self.metrics.increment(Counter::PacketFilterFailed);
                    debug!(%from, error = %err, "dropped sdk5 packet");
                    return None;
                }
            }
        } else {
            Cow::Borrowed(data)
        };

        let response = self.dispatch(&packet, &magic, now)?;
        if !sdk5 {
            return Some(response);
        }
        match wrap_sdk5(&response, &magic.current, &self.public_address, &from) {
            Ok(framed) => Some(framed),
            Err(err) => {
                debug!(%from, error = %err, "could not frame response");
                None
            }
        }
    }

    fn dispatch(&self, packet: &[u8], magic: &MagicValues, now: u64) -> Option<Vec<u8>> {
        let database = self.database.load();
        let handler_ctx = HandlerContext {
            config: &self.backend,
            database: &database,
            keys: &self.keys,
            metrics: &self.metrics,
            magic,
            now,
        };

        match packet_type(packet) {
            Ok(PacketType::SessionUpdate) => {
                let route_matrix = self.route_matrix.load();
                let ctx = SessionUpdateContext {
                    config: &self.backend,
                    database: &database,
                    route_matrix: &route_matrix,
                    keys: &self.keys,
                    locator: self.locator.as_ref(),
                    metrics: &self.metrics,
                    billing: self.billing.as_ref(),
                    now,
                };
                handle_session_update(&ctx, packet)
            }
            Ok(PacketType::ServerInitRequest) => handle_server_init(&handler_ctx, packet),
            Ok(PacketType::ServerUpdate) => {
                handle_server_update(&handler_ctx, packet);
                None
            }
            Ok(PacketType::MatchDataRequest) => handle_match_data(&handler_ctx, packet),
            Ok(_) | Err(_) => {
                self.metrics.increment(Counter::UnknownPacketType);
                None
            }
        }
    }

    /// Handles one relay update datagram.
    pub fn handle_relay_datagram(&self, data: &[u8], now: u64) -> Option<Vec<u8>> {
        let database = self.database.load();
        let magic = self.magic.load();
        let ctx = HandlerContext {
            config: &self.backend,
            database: &database,
            keys: &self.keys,
            metrics: &self.metrics,
            magic: &magic,
            now,
        };
        handle_relay_update(&ctx, data)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use backend::{Buyer, Datacenter, Location, StaticLocator};
    use ed25519_dalek::SigningKey;
    use wire::{
        read_packet, write_packet, SdkVersion, ServerInitRequestPacket, ServerInitResponsePacket,
        ServerInitResult,
    };

    const BUYER_ID: u64 = 0x11;
    const DATACENTER_ID: u64 = 0x22;

    pub(crate) fn state() -> State {
        let buyer = Buyer {
            id: BUYER_ID,
            name: "buyer".into(),
            live: true,
            analysis_only: false,
            large_customer: false,
            debug: false,
            public_key: buyer_key().verifying_key().to_bytes(),
            route_shader: None,
            accelerated_datacenters: vec![DATACENTER_ID],
        };
        let datacenter = Datacenter {
            id: DATACENTER_ID,
            name: "dc".into(),
            location: Location::new(1.0, 2.0, 0),
        };
        State {
            backend: BackendConfig::default(),
            public_address: SocketAddr::from(([192, 0, 2, 1], 40000)),
            keys: BackendKeys::from_bytes(&[5; 32], [6; 32]),
            database: SnapshotCell::new(Database::new(
                vec![buyer],
                Vec::new(),
                vec![datacenter],
                Vec::new(),
            )),
            route_matrix: SnapshotCell::new(
                RouteMatrix::new(0, Vec::new(), Vec::new(), Vec::new(), Vec::new()).unwrap(),
            ),
            magic: SnapshotCell::new(MagicValues {
                upcoming: [1; 8],
                current: [2; 8],
                previous: [3; 8],
            }),
            locator: Box::new(StaticLocator::default()),
            metrics: Arc::new(Metrics::new()),
            billing: None,
        }
    }

    fn buyer_key() -> SigningKey {
        SigningKey::from_bytes(&[9; 32])
    }

    pub(crate) fn init_request() -> Vec<u8> {
        let mut request = ServerInitRequestPacket {
            version: SdkVersion::CURRENT,
            buyer_id: BUYER_ID,
            datacenter_id: DATACENTER_ID,
            request_id: 5,
            datacenter_name: "dc".into(),
        };
        write_packet(&mut request, &buyer_key()).unwrap()
    }

    fn client() -> SocketAddr {
        SocketAddr::from(([198, 51, 100, 7], 50000))
    }

    #[test]
    fn sdk4_request_gets_sdk4_response() {
        let state = state();
        let response = state.handle_sdk_datagram(&init_request(), client(), 0).unwrap();
        let response: ServerInitResponsePacket =
            read_packet(&response, &state.keys.verifying_key()).unwrap();
        assert_eq!(response.response, ServerInitResult::Ok);
        assert_eq!(response.upcoming_magic, [1; 8]);
    }

    #[test]
    fn sdk5_request_gets_sdk5_response() {
        let state = state();
        // stamped with the previous magic while a rotation propagates
        let framed = wrap_sdk5(&init_request(), &[3; 8], &client(), &state.public_address).unwrap();
        let response = state.handle_sdk_datagram(&framed, client(), 0).unwrap();
        let unwrapped =
            unwrap_sdk5(&response, &[[2; 8]], &state.public_address, &client()).unwrap();
        let response: ServerInitResponsePacket =
            read_packet(&unwrapped, &state.keys.verifying_key()).unwrap();
        assert_eq!(response.request_id, 5);
    }

    #[test]
    fn unknown_magic_is_dropped() {
        let state = state();
        let framed = wrap_sdk5(&init_request(), &[7; 8], &client(), &state.public_address).unwrap();
        assert!(state.handle_sdk_datagram(&framed, client(), 0).is_none());
        assert_eq!(state.metrics.get(Counter::PacketFilterFailed), 1);
    }

    #[test]
    fn unknown_packet_type_is_counted() {
        let state = state();
        let mut data = init_request();
        data[0] = 7;
        assert!(state.handle_sdk_datagram(&data, client(), 0).is_none());
        assert_eq!(state.metrics.get(Counter::UnknownPacketType), 1);
    }
}
