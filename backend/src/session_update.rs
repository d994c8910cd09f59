//! The session update handler.
//!
//! Every slice a game server reports each of its sessions and gets back the
//! route the session should take next. One update runs, in order:
//!
//! 1. packet decode, buyer lookup and signature check (drop on failure)
//! 2. session data decode with the identity and slice checks (drop on failure)
//! 3. geolocation and the soft checks that keep a session direct
//! 4. fallback-to-direct accounting
//! 5. near relay stabilization
//! 6. the route decision, tokens and pricing
//! 7. response and billing
//!
//! Nothing is kept between updates; the session's state travels in the
//! [`SessionData`] blob.

use rand::RngCore;
use tracing::{debug, warn};
use wire::limits::MAX_NEAR_RELAYS;
use wire::token::{
    encrypt_continue_route_tokens, encrypt_next_route_tokens, ContinueRouteToken, NextRouteToken,
    ROUTE_PRIVATE_KEY_BYTES,
};
use wire::{
    read_packet_unverified, verify_packet, write_packet, NearRelay, RouteType,
    SessionResponsePacket, SessionUpdatePacket, WireResult,
};
use x25519_dalek::PublicKey;

use crate::billing::{BillingEntry, BillingQueue};
use crate::config::BackendConfig;
use crate::database::Database;
use crate::error::SessionUpdateError;
use crate::fallback::apply_fallback;
use crate::keys::BackendKeys;
use crate::locator::IpLocator;
use crate::metrics::{Counter, Metrics};
use crate::near_relays::{
    classify_near_relays, near_relays_changed, nearest_relays, should_hold,
    update_near_relay_stats, NearRelaySet,
};
use crate::pricing::{envelope_bytes, route_price, RoutePrice};
use crate::route_decision::{
    decide_route, veto_broken_route, DecisionContext, RouteCandidate, RouteDecision,
};
use crate::route_matrix::RouteMatrix;
use crate::session_data::SessionData;
use crate::types::{Buyer, Relay, RouteShader};

/// Everything one session update reads.
pub struct SessionUpdateContext<'a> {
    pub config: &'a BackendConfig,
    pub database: &'a Database,
    pub route_matrix: &'a RouteMatrix,
    pub keys: &'a BackendKeys,
    pub locator: &'a dyn IpLocator,
    pub metrics: &'a Metrics,
    /// `None` disables billing.
    pub billing: Option<&'a BillingQueue>,
    /// Unix seconds.
    pub now: u64,
}

/// Result of a processed update, before signing.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdateOutcome {
    pub response: SessionResponsePacket,
    pub session_data: SessionData,
    pub billing: BillingEntry,
}

/// Handles one signed session update.
///
/// Returns the signed response, or `None` when the packet is dropped. Drops
/// are counted and logged at debug level.
pub fn handle_session_update(ctx: &SessionUpdateContext<'_>, data: &[u8]) -> Option<Vec<u8>> {
    ctx.metrics.increment(Counter::SessionUpdateReceived);
    match try_handle_session_update(ctx, data) {
        Ok(response) => {
            ctx.metrics.increment(Counter::SessionUpdateResponded);
            Some(response)
        }
        Err(err) => {
            ctx.metrics.increment(err.counter());
            debug!(error = %err, "dropped session update");
            None
        }
    }
}

/// Like [`handle_session_update`] without the counting.
pub fn try_handle_session_update(
    ctx: &SessionUpdateContext<'_>,
    data: &[u8],
) -> Result<Vec<u8>, SessionUpdateError> {
    let packet: SessionUpdatePacket =
        read_packet_unverified(data).map_err(SessionUpdateError::ReadPacket)?;

    let buyer_id = packet.buyer_id;
    let buyer = ctx
        .database
        .buyer(buyer_id)
        .ok_or(SessionUpdateError::BuyerNotFound { buyer_id })?;
    if !buyer.live {
        return Err(SessionUpdateError::BuyerNotLive { buyer_id });
    }
    let key = buyer
        .verifying_key()
        .ok_or(SessionUpdateError::SignatureCheckFailed { buyer_id })?;
    verify_packet(data, &key).map_err(|_| SessionUpdateError::SignatureCheckFailed { buyer_id })?;

    let SessionUpdateOutcome {
        mut response,
        billing,
        ..
    } = process_session_update(ctx, buyer, &packet)?;
    let bytes = write_packet(&mut response, &ctx.keys.signing_key)
        .map_err(SessionUpdateError::WriteResponse)?;

    if let Some(queue) = ctx.billing {
        // a rejected entry is counted and logged by the queue
        let _ = queue.submit(billing);
    }
    Ok(bytes)
}

/// Runs the pipeline for an authenticated packet.
pub fn process_session_update(
    ctx: &SessionUpdateContext<'_>,
    buyer: &Buyer,
    packet: &SessionUpdatePacket,
) -> Result<SessionUpdateOutcome, SessionUpdateError> {
    let (input, mut output) = begin_slice(packet, buyer)?;
    if output.initial {
        ctx.metrics.increment(Counter::NewSession);
    }
    output.route_state.user_id = packet.user_hash;
    locate(ctx, packet, &mut output);

    let shader = buyer.route_shader(&ctx.config.default_route_shader);
    let mut near_relays_update = NearRelaysUpdate::default();
    let mut decision = RouteDecision::Direct;

    let vetoed = veto_broken_route(packet, &input, &mut output.route_state, ctx.metrics);
    if is_eligible(ctx, buyer, packet, &mut output)
        && !apply_fallback(packet.fallback_to_direct, packet.flags, &input, &mut output, ctx.metrics)
        && !vetoed
    {
        near_relays_update = stabilize_near_relays(ctx, buyer, packet, &input, &mut output);
        let destination = ctx.route_matrix.relays_in_datacenter(packet.datacenter_id);
        let decision_ctx = DecisionContext {
            matrix: ctx.route_matrix,
            shader,
            near_relays: &near_relays_update.set.usable,
            destination_relays: &destination,
            metrics: ctx.metrics,
        };
        decision = decide_route(&decision_ctx, packet, &input, &mut output);
    } else {
        output.route_state.take_direct(false);
    }

    let route = resolve_route(ctx, decision, &mut output);
    let mut route_type = RouteType::Direct;
    let mut tokens = Vec::new();
    let mut price = RoutePrice::default();
    let bytes_up = envelope_bytes(shader.envelope_kbps_up, ctx.config.slice_seconds);
    let bytes_down = envelope_bytes(shader.envelope_kbps_down, ctx.config.slice_seconds);

    match &route {
        Some(ResolvedRoute { new, relays, cost }) => {
            let relay_ids: Vec<u64> = relays.iter().map(|relay| relay.id).collect();
            output.set_route(&relay_ids, *cost);
            output.expire_timestamp = ctx.now + ctx.config.route_token_expire_seconds;
            if *new {
                output.session_version = input.session_version.wrapping_add(1);
                output.initial = true;
                output.ever_on_next = true;
                route_type = RouteType::New;
            } else {
                route_type = RouteType::Continue;
            }
            tokens = route_tokens(ctx, packet, &output, shader, relays, *new)
                .map_err(SessionUpdateError::WriteResponse)?;

            let rates: Vec<_> = relay_ids
                .iter()
                .map(|&id| ctx.database.relay_egress_price(id))
                .collect();
            price = route_price(&rates, bytes_up, bytes_down);
            output.total_price_sum = output.total_price_sum + price.total;
            output.next_envelope_bytes_up_sum =
                output.next_envelope_bytes_up_sum.saturating_add(bytes_up);
            output.next_envelope_bytes_down_sum =
                output.next_envelope_bytes_down_sum.saturating_add(bytes_down);
            output.duration_on_next = output
                .duration_on_next
                .saturating_add(ctx.config.slice_seconds);
        }
        None => output.clear_route(),
    }
    ctx.metrics.increment(match route_type {
        RouteType::Direct => Counter::RouteDirect,
        RouteType::New => Counter::RouteNew,
        RouteType::Continue => Counter::RouteContinue,
    });

    output.prev_packets_sent_client_to_server = packet.packets_sent_client_to_server;
    output.prev_packets_sent_server_to_client = packet.packets_sent_server_to_client;
    output.prev_packets_lost_client_to_server = packet.packets_lost_client_to_server;
    output.prev_packets_lost_server_to_client = packet.packets_lost_server_to_client;

    let session_data = output
        .write()
        .map_err(SessionUpdateError::WriteResponse)?;
    let on_route = route.is_some();
    let num_tokens = route.as_ref().map_or(0, |r| r.relays.len() + 2);
    let any_excluded = near_relays_update.set.any_excluded();

    let response = SessionResponsePacket {
        version: packet.version,
        session_id: packet.session_id,
        slice_number: output.slice_number,
        session_data,
        route_type,
        near_relays_changed: near_relays_update.changed,
        near_relays: if near_relays_update.changed {
            near_relays_update.nearest
        } else {
            Vec::new()
        },
        multipath: on_route && output.route_state.multipath,
        committed: on_route && output.route_state.committed,
        num_tokens,
        tokens,
        debug: if buyer.debug {
            debug_summary(packet, &output, route_type)
        } else {
            String::new()
        },
        exclude_near_relays: any_excluded,
        near_relay_excluded: if any_excluded {
            near_relays_update.set.excluded
        } else {
            [false; MAX_NEAR_RELAYS]
        },
        dont_ping_near_relays: output.hold_near_relays,
    };

    let billing = BillingEntry {
        timestamp: ctx.now,
        buyer_id: buyer.id,
        session_id: packet.session_id,
        user_hash: packet.user_hash,
        datacenter_id: packet.datacenter_id,
        slice_number: output.slice_number,
        platform_type: packet.platform_type,
        connection_type: packet.connection_type,
        route_type,
        route_relay_ids: output.route_relays().to_vec(),
        relay_prices: price.hops,
        route_price: price.total,
        envelope_bytes_up: if on_route { bytes_up } else { 0 },
        envelope_bytes_down: if on_route { bytes_down } else { 0 },
        direct_rtt: packet.direct_rtt,
        direct_jitter: packet.direct_jitter,
        direct_packet_loss: packet.direct_packet_loss,
        next_rtt: packet.next_rtt,
        next_jitter: packet.next_jitter,
        next_packet_loss: packet.next_packet_loss,
        fallback_to_direct: output.fell_back_to_direct,
        fallback_flags: packet.flags.raw(),
        tags: packet.tags.clone(),
    };

    Ok(SessionUpdateOutcome {
        response,
        session_data: output,
        billing,
    })
}

/// Decodes the echoed session data and returns `(input, output)`.
///
/// An empty blob, or one that never got past slice zero, starts a new
/// session at slice 1. Otherwise the packet must belong to the same session
/// and carry the slice after the last one accepted.
pub fn begin_slice(
    packet: &SessionUpdatePacket,
    buyer: &Buyer,
) -> Result<(SessionData, SessionData), SessionUpdateError> {
    let stored = if packet.session_data.is_empty() {
        None
    } else {
        Some(SessionData::read(&packet.session_data).map_err(SessionUpdateError::BadSessionData)?)
    };

    match stored {
        Some(input) if input.slice_number != 0 => {
            if input.session_id != packet.session_id {
                return Err(SessionUpdateError::BadSessionId {
                    expected: input.session_id,
                    found: packet.session_id,
                });
            }
            let expected = input.slice_number.wrapping_add(1);
            if packet.slice_number != expected {
                return Err(SessionUpdateError::BadSliceNumber {
                    expected,
                    found: packet.slice_number,
                });
            }
            let mut output = input.clone();
            output.version = SessionData::VERSION;
            output.slice_number = expected;
            output.initial = false;
            output.hold_near_relays = false;
            output.hold_near_relay_rtt.clear();
            Ok((input, output))
        }
        _ => {
            let input = SessionData {
                session_id: packet.session_id,
                slice_number: 1,
                initial: true,
                large_customer: buyer.large_customer,
                ..SessionData::default()
            };
            let output = input.clone();
            Ok((input, output))
        }
    }
}

/// Looks the client up while its location is unknown.
fn locate(ctx: &SessionUpdateContext<'_>, packet: &SessionUpdatePacket, output: &mut SessionData) {
    if !output.location.is_unknown() {
        return;
    }
    let located = packet
        .client_address
        .map(|address| ctx.locator.locate(address.ip()));
    match located {
        Some(Ok(location)) => {
            output.location = location;
            output.route_state.location_veto = false;
        }
        Some(Err(err)) => {
            ctx.metrics.increment(Counter::LocationFailed);
            debug!(session_id = packet.session_id, error = %err, "could not locate client");
            output.route_state.location_veto = true;
        }
        None => {
            ctx.metrics.increment(Counter::LocationFailed);
            output.route_state.location_veto = true;
        }
    }
}

/// Soft checks. A session failing any of them is answered direct.
fn is_eligible(
    ctx: &SessionUpdateContext<'_>,
    buyer: &Buyer,
    packet: &SessionUpdatePacket,
    output: &mut SessionData,
) -> bool {
    let state = &mut output.route_state;
    let datacenter_id = packet.datacenter_id;

    state.unknown_datacenter = ctx.database.datacenter(datacenter_id).is_none();
    if state.unknown_datacenter {
        ctx.metrics.increment(Counter::UnknownDatacenter);
    }
    state.datacenter_not_enabled = !buyer.is_acceleration_enabled(datacenter_id);
    if state.datacenter_not_enabled {
        ctx.metrics.increment(Counter::DatacenterNotEnabled);
    }
    let no_relays = ctx.database.relays_in_datacenter(datacenter_id).is_empty();
    if no_relays {
        ctx.metrics.increment(Counter::NoRelaysInDatacenter);
    }
    state.stale_route_matrix = ctx
        .route_matrix
        .is_stale(ctx.now, ctx.config.max_route_matrix_age);
    if state.stale_route_matrix {
        ctx.metrics.increment(Counter::StaleRouteMatrix);
        warn!(
            age = ctx.route_matrix.age(ctx.now),
            max_age = ctx.config.max_route_matrix_age,
            "route matrix is stale"
        );
    }
    if buyer.analysis_only {
        ctx.metrics.increment(Counter::AnalysisOnly);
    }

    !(buyer.analysis_only
        || state.unknown_datacenter
        || state.datacenter_not_enabled
        || no_relays
        || state.stale_route_matrix)
}

#[derive(Debug, Default)]
struct NearRelaysUpdate {
    set: NearRelaySet,
    changed: bool,
    nearest: Vec<NearRelay>,
}

fn stabilize_near_relays(
    ctx: &SessionUpdateContext<'_>,
    buyer: &Buyer,
    packet: &SessionUpdatePacket,
    input: &SessionData,
    output: &mut SessionData,
) -> NearRelaysUpdate {
    let hold = should_hold(
        buyer.large_customer,
        input,
        output.slice_number,
        ctx.config.hold_min_slice,
    );
    if hold {
        ctx.metrics.increment(Counter::HoldNearRelays);
    }
    // a tier change is only absorbed by a slice that could hold for it
    output.large_customer = buyer.large_customer;
    update_near_relay_stats(&packet.near_relays, input, output, hold);
    let set = classify_near_relays(&packet.near_relays, output, ctx.route_matrix);

    let mut update = NearRelaysUpdate {
        set,
        ..NearRelaysUpdate::default()
    };
    if !output.location.is_unknown() {
        update.nearest = nearest_relays(ctx.database, &output.location, ctx.config.near_relay_count);
        update.changed = near_relays_changed(&packet.near_relays, &update.nearest);
        if update.changed {
            ctx.metrics.increment(Counter::NearRelaysChanged);
        }
    }
    update
}

struct ResolvedRoute<'a> {
    new: bool,
    relays: Vec<&'a Relay>,
    cost: i32,
}

/// Maps a decision's matrix indices to database relays.
///
/// A relay the database no longer knows loses the route.
fn resolve_route<'a>(
    ctx: &SessionUpdateContext<'a>,
    decision: RouteDecision,
    output: &mut SessionData,
) -> Option<ResolvedRoute<'a>> {
    let (new, RouteCandidate { relays, cost }) = match decision {
        RouteDecision::Direct => return None,
        RouteDecision::New(candidate) => (true, candidate),
        RouteDecision::Continue(candidate) => (false, candidate),
    };
    let resolved = relays
        .iter()
        .map(|&index| {
            ctx.route_matrix
                .relay_id(index)
                .and_then(|id| ctx.database.relay(id))
        })
        .collect::<Option<Vec<_>>>();
    match resolved {
        Some(relays) if !relays.is_empty() => Some(ResolvedRoute { new, relays, cost }),
        _ => {
            output.route_state.route_lost = true;
            output.route_state.take_direct(false);
            ctx.metrics.increment(Counter::RouteLost);
            None
        }
    }
}

/// One token per hop: client, each relay, then the server.
fn route_tokens(
    ctx: &SessionUpdateContext<'_>,
    packet: &SessionUpdatePacket,
    output: &SessionData,
    shader: &RouteShader,
    relays: &[&Relay],
    new: bool,
) -> WireResult<Vec<u8>> {
    let recipients: Vec<PublicKey> = std::iter::once(packet.client_route_public_key)
        .chain(relays.iter().map(|relay| relay.public_key))
        .chain(std::iter::once(packet.server_route_public_key))
        .map(PublicKey::from)
        .collect();

    if !new {
        let token = ContinueRouteToken {
            expire_timestamp: output.expire_timestamp,
            session_id: output.session_id,
            session_version: output.session_version,
        };
        let tokens = vec![token; recipients.len()];
        return encrypt_continue_route_tokens(&tokens, &recipients, &ctx.keys.route_secret);
    }

    let mut private_key = [0u8; ROUTE_PRIVATE_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut private_key);

    // hop i forwards to hop i + 1; the server is the last stop
    let next_addresses = relays
        .iter()
        .map(|relay| Some(relay.address))
        .chain(std::iter::once(packet.server_address))
        .chain(std::iter::once(None));
    let tokens: Vec<NextRouteToken> = next_addresses
        .map(|next_address| NextRouteToken {
            expire_timestamp: output.expire_timestamp,
            session_id: output.session_id,
            session_version: output.session_version,
            kbps_up: shader.envelope_kbps_up,
            kbps_down: shader.envelope_kbps_down,
            next_address,
            private_key,
        })
        .collect();
    encrypt_next_route_tokens(&tokens, &recipients, &ctx.keys.route_secret)
}

fn debug_summary(packet: &SessionUpdatePacket, output: &SessionData, route_type: RouteType) -> String {
    format!(
        "{route_type:?} relays={:?} cost={} direct_rtt={:.1} next_rtt={:.1}",
        output.route_relays(),
        output.route_cost,
        packet.direct_rtt,
        packet.next_rtt,
    )
}
