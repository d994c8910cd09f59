//! Routing backend for the nextroute protocol.
//!
//! This crate ties the [`wire`] packet formats to the routing logic: it
//! authenticates packets against the buyer directory, carries each session's
//! state in the [`SessionData`] blob, decides direct, new or continue for
//! every slice, prices the chosen route and hands a billing entry to the
//! billing queue.
//!
//! # Features
//!
//! - Session update pipeline with fallback accounting and near relay holds
//! - Server init, server update, match data and relay update handlers
//! - Egress pricing in nibblins
//! - Lock-free counters and a non-blocking billing queue
//!
//! # Design Principles
//!
//! - **Stateless between packets** - Everything a session needs travels in its session data.
//! - **Snapshots, not locks** - Directory and route matrix are immutable `Arc` snapshots.
//! - **Drop, count, move on** - A bad packet never produces a partial response.

mod billing;
mod config;
mod database;
mod error;
mod fallback;
mod keys;
mod locator;
mod magic;
mod metrics;
mod near_relays;
mod pricing;
mod route_decision;
mod route_matrix;
mod route_state;
mod server_handlers;
mod session_data;
mod session_update;
mod snapshot;
mod types;

pub use billing::{billing_channel, Biller, BillingEntry, BillingQueue, BillingWorker, RetryPolicy};
pub use config::BackendConfig;
pub use database::Database;
pub use error::{BillingError, HandlerError, LocateError, SessionUpdateError};
pub use fallback::{apply_fallback, record_fallback_reasons};
pub use keys::{BackendKeys, KeyError};
pub use locator::{IpLocator, StaticLocator};
pub use magic::{Magic, MagicValues};
pub use metrics::{Counter, Metrics, MetricsSnapshot};
pub use near_relays::{
    classify_near_relays, near_relays_changed, nearest_relays, should_hold,
    update_near_relay_stats, NearRelayCost, NearRelaySet,
};
pub use pricing::{envelope_bytes, hop_price, route_price, Nibblins, RoutePrice};
pub use route_decision::{
    best_route, candidate_routes, current_route, decide_route, veto_broken_route, DecisionContext,
    RouteCandidate, RouteDecision,
};
pub use route_matrix::{
    triangular_index, triangular_len, RouteMatrix, RouteMatrixError, INVALID_ROUTE_VALUE,
};
pub use route_state::{
    RouteState, MAX_COMMIT_COUNTER, MAX_SLICE_COUNTER, NEAR_RELAY_EXCLUDE_LOSSY_SLICES,
    NEAR_RELAY_HISTORY_SLICES,
};
pub use server_handlers::{
    handle_match_data, handle_relay_update, handle_server_init, handle_server_update,
    try_handle_match_data, try_handle_relay_update, try_handle_server_init,
    try_handle_server_update, HandlerContext,
};
pub use session_data::SessionData;
pub use session_update::{
    begin_slice, handle_session_update, process_session_update, try_handle_session_update,
    SessionUpdateContext, SessionUpdateOutcome,
};
pub use snapshot::SnapshotCell;
pub use types::{Buyer, Datacenter, Location, Relay, RouteShader, Seller};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_api_exports() {
        let _ = BackendConfig::default();
        let _ = Metrics::new();
        let _ = SessionData::default();
        let _ = RouteShader::default();
        let _ = Nibblins::ZERO;
        let _ = RetryPolicy::default();
        let _: Result<(), SessionUpdateError> = Ok(());
        let _: Result<(), HandlerError> = Ok(());
    }
}
