//! Directory records: buyers, sellers, datacenters and relays.

use std::net::SocketAddr;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use wire::limits::{RELAY_TOKEN_BYTES, ROUTE_PUBLIC_KEY_BYTES};

use crate::pricing::Nibblins;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Geographic position of a client or datacenter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f32,
    pub longitude: f32,
    pub asn: u32,
}

impl Location {
    #[must_use]
    pub const fn new(latitude: f32, longitude: f32, asn: u32) -> Self {
        Self {
            latitude,
            longitude,
            asn,
        }
    }

    /// Returns `true` for the all-zero location of a session that was never located.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0 && self.asn == 0
    }

    /// Great-circle distance in kilometres (haversine).
    #[must_use]
    pub fn distance_km(&self, other: &Self) -> f64 {
        let lat1 = f64::from(self.latitude).to_radians();
        let lat2 = f64::from(other.latitude).to_radians();
        let dlat = lat2 - lat1;
        let dlon = (f64::from(other.longitude) - f64::from(self.longitude)).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Per-buyer thresholds that drive the route decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteShader {
    /// Never accelerate this buyer's sessions.
    pub disable_acceleration: bool,
    /// Accelerate only sessions with an even session id.
    pub ab_test: bool,
    /// Users that are never accelerated.
    pub banned_users: Vec<u64>,
    /// Minimum RTT improvement in milliseconds to take a route.
    pub latency_threshold: i32,
    /// Direct packet loss, in percent, that justifies a route on its own.
    pub packet_loss_threshold: f32,
    /// Consecutive lossy slices before packet loss alone takes a route.
    pub packet_loss_sustained_slices: u32,
    /// Improvement in milliseconds a new candidate needs to replace the current route.
    pub route_switch_threshold: i32,
    /// How far the measured next RTT may exceed the predicted cost.
    pub mispredict_threshold: i32,
    pub mispredict_slices: u32,
    pub latency_worse_slices: u32,
    /// Next RTT above this is never acceptable.
    pub max_next_rtt: i32,
    pub envelope_kbps_up: u32,
    pub envelope_kbps_down: u32,
    /// Routes start uncommitted and must prove themselves first.
    pub try_before_you_buy: bool,
    pub commit_slices: u32,
    pub multipath: bool,
}

impl Default for RouteShader {
    fn default() -> Self {
        Self {
            disable_acceleration: false,
            ab_test: false,
            banned_users: Vec::new(),
            latency_threshold: 5,
            packet_loss_threshold: 1.0,
            packet_loss_sustained_slices: 1,
            route_switch_threshold: 5,
            mispredict_threshold: 15,
            mispredict_slices: 3,
            latency_worse_slices: 3,
            max_next_rtt: 250,
            envelope_kbps_up: 256,
            envelope_kbps_down: 256,
            try_before_you_buy: false,
            commit_slices: 3,
            multipath: false,
        }
    }
}

/// A customer running game servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buyer {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub live: bool,
    /// Sessions are observed and billed but never accelerated.
    #[serde(default)]
    pub analysis_only: bool,
    #[serde(default)]
    pub large_customer: bool,
    /// Adds decision details to the response debug string.
    #[serde(default)]
    pub debug: bool,
    /// Ed25519 key that signs this buyer's requests.
    #[serde(with = "hex")]
    pub public_key: [u8; 32],
    /// Falls back to the configured default when absent.
    #[serde(default)]
    pub route_shader: Option<RouteShader>,
    /// Datacenters where acceleration is enabled for this buyer.
    #[serde(default)]
    pub accelerated_datacenters: Vec<u64>,
}

impl Buyer {
    /// Parsed signing key, `None` if the stored bytes are not a valid point.
    #[must_use]
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.public_key).ok()
    }

    #[must_use]
    pub fn route_shader<'a>(&'a self, default: &'a RouteShader) -> &'a RouteShader {
        self.route_shader.as_ref().unwrap_or(default)
    }

    #[must_use]
    pub fn is_acceleration_enabled(&self, datacenter_id: u64) -> bool {
        self.accelerated_datacenters.contains(&datacenter_id)
    }
}

/// A relay supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub egress_price_per_gb: Nibblins,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datacenter {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub location: Location,
}

/// A relay node in the overlay network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub address: SocketAddr,
    pub datacenter_id: u64,
    pub seller_id: u64,
    /// X25519 key that route tokens for this relay are encrypted to.
    #[serde(with = "hex")]
    pub public_key: [u8; ROUTE_PUBLIC_KEY_BYTES],
    /// Shared secret the relay presents in its updates.
    #[serde(with = "hex")]
    pub token: [u8; RELAY_TOKEN_BYTES],
    /// Replaces the seller's egress price for this relay.
    #[serde(default)]
    pub egress_price_override: Option<Nibblins>,
}
