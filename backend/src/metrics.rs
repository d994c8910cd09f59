//! Named counters shared by every worker.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

macro_rules! counters {
    ($($variant:ident => $name:literal,)+) => {
        /// A backend event counter.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Counter {
            $($variant,)+
        }

        impl Counter {
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];
            pub const COUNT: usize = Self::ALL.len();

            /// Stable snake_case name used in snapshots and logs.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }
    };
}

counters! {
    SessionUpdateReceived => "session_update_received",
    SessionUpdateReadPacketFailed => "session_update_read_packet_failed",
    SessionUpdateBuyerNotFound => "session_update_buyer_not_found",
    SessionUpdateBuyerNotLive => "session_update_buyer_not_live",
    SessionUpdateSignatureCheckFailed => "session_update_signature_check_failed",
    SessionUpdateBadSessionData => "session_update_bad_session_data",
    SessionUpdateBadSessionId => "session_update_bad_session_id",
    SessionUpdateBadSliceNumber => "session_update_bad_slice_number",
    SessionUpdateWriteResponseFailed => "session_update_write_response_failed",
    SessionUpdateResponded => "session_update_responded",
    NewSession => "new_session",
    AnalysisOnly => "analysis_only",
    LocationFailed => "location_failed",
    UnknownDatacenter => "unknown_datacenter",
    DatacenterNotEnabled => "datacenter_not_enabled",
    NoRelaysInDatacenter => "no_relays_in_datacenter",
    StaleRouteMatrix => "stale_route_matrix",
    FallbackToDirect => "fallback_to_direct",
    FallbackBadRouteToken => "fallback_bad_route_token",
    FallbackNoNextRouteToContinue => "fallback_no_next_route_to_continue",
    FallbackPreviousUpdateStillPending => "fallback_previous_update_still_pending",
    FallbackBadContinueToken => "fallback_bad_continue_token",
    FallbackRouteExpired => "fallback_route_expired",
    FallbackRouteRequestTimedOut => "fallback_route_request_timed_out",
    FallbackContinueRequestTimedOut => "fallback_continue_request_timed_out",
    FallbackClientTimedOut => "fallback_client_timed_out",
    FallbackUpgradeResponseTimedOut => "fallback_upgrade_response_timed_out",
    FallbackRouteUpdateTimedOut => "fallback_route_update_timed_out",
    FallbackDirectPongTimedOut => "fallback_direct_pong_timed_out",
    FallbackNextPongTimedOut => "fallback_next_pong_timed_out",
    FallbackUnknownReason => "fallback_unknown_reason",
    HoldNearRelays => "hold_near_relays",
    NearRelaysChanged => "near_relays_changed",
    RouteDirect => "route_direct",
    RouteNew => "route_new",
    RouteContinue => "route_continue",
    RouteSwitched => "route_switched",
    NoRoute => "no_route",
    NextWithoutRouteRelays => "next_without_route_relays",
    SdkAborted => "sdk_aborted",
    RouteLost => "route_lost",
    LatencyWorse => "latency_worse",
    Mispredict => "mispredict",
    CommitVeto => "commit_veto",
    NextLatencyTooHigh => "next_latency_too_high",
    Banned => "banned",
    Disabled => "disabled",
    NotSelected => "not_selected",
    BillingQueued => "billing_queued",
    BillingQueueFull => "billing_queue_full",
    BillingSucceeded => "billing_succeeded",
    BillingRetried => "billing_retried",
    BillingFailed => "billing_failed",
    ServerInitReceived => "server_init_received",
    ServerInitDropped => "server_init_dropped",
    ServerUpdateReceived => "server_update_received",
    ServerUpdateDropped => "server_update_dropped",
    MatchDataReceived => "match_data_received",
    MatchDataDropped => "match_data_dropped",
    RelayUpdateReceived => "relay_update_received",
    RelayUpdateDropped => "relay_update_dropped",
    UnknownPacketType => "unknown_packet_type",
    PacketFilterFailed => "packet_filter_failed",
    ReceiveQueueFull => "receive_queue_full",
}

/// Fallback counters indexed by [`wire::FallbackFlags`] bit position.
const FALLBACK_REASONS: [Counter; wire::FallbackFlags::COUNT as usize] = [
    Counter::FallbackBadRouteToken,
    Counter::FallbackNoNextRouteToContinue,
    Counter::FallbackPreviousUpdateStillPending,
    Counter::FallbackBadContinueToken,
    Counter::FallbackRouteExpired,
    Counter::FallbackRouteRequestTimedOut,
    Counter::FallbackContinueRequestTimedOut,
    Counter::FallbackClientTimedOut,
    Counter::FallbackUpgradeResponseTimedOut,
    Counter::FallbackRouteUpdateTimedOut,
    Counter::FallbackDirectPongTimedOut,
    Counter::FallbackNextPongTimedOut,
];

impl Counter {
    /// Counter for the fallback flag at bit `index`.
    #[must_use]
    pub fn fallback_reason(index: u32) -> Option<Self> {
        FALLBACK_REASONS.get(index as usize).copied()
    }
}

/// Lock-free counters. One instance is shared across all workers.
#[derive(Debug)]
pub struct Metrics {
    counters: [AtomicU64; Counter::COUNT],
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn increment(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, value: u64) {
        self.counters[counter as usize].fetch_add(value, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: Counter::ALL
                .iter()
                .map(|&counter| (counter.name(), self.get(counter)))
                .collect(),
        }
    }
}

/// Serializable copy of [`Metrics`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<&'static str, u64>,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters.get(counter.name()).copied().unwrap_or(0)
    }

    /// Counters that are non-zero, for compact logging.
    pub fn non_zero(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.counters
            .iter()
            .filter(|(_, &value)| value != 0)
            .map(|(&name, &value)| (name, value))
    }
}
