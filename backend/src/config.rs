//! Backend tuning knobs.

use serde::{Deserialize, Serialize};
use wire::SdkVersion;

use crate::types::RouteShader;

/// Thresholds and timings shared by every handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Seconds after which the route matrix is considered stale.
    pub max_route_matrix_age: u64,
    /// Length of one session slice in seconds.
    pub slice_seconds: u32,
    /// First slice at which near relay stats may be held.
    pub hold_min_slice: u32,
    /// Near relays handed to a client.
    pub near_relay_count: usize,
    pub route_token_expire_seconds: u64,
    /// Servers older than this are told to upgrade at init.
    pub min_sdk_version: SdkVersion,
    /// Route shader for buyers that do not carry their own.
    pub default_route_shader: RouteShader,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            max_route_matrix_age: 30,
            slice_seconds: 10,
            hold_min_slice: 4,
            near_relay_count: 10,
            route_token_expire_seconds: 30,
            min_sdk_version: SdkVersion::MINIMUM,
            default_route_shader: RouteShader::default(),
        }
    }
}

impl BackendConfig {
    /// Short timings for tests that exercise expiry paths.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_route_matrix_age: 5,
            route_token_expire_seconds: 5,
            ..Self::default()
        }
    }
}
