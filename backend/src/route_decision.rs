//! Direct, new or continue.
//!
//! Candidate routes start at one of the client's near relays and end at a
//! relay in the game server's datacenter, either directly (the near relay is
//! in that datacenter) or through one matrix link. A session takes a route
//! only when it beats direct by the route shader's margins, and leaves it as
//! soon as the measurements stop backing that choice.

use wire::SessionUpdatePacket;

use crate::metrics::{Counter, Metrics};
use crate::near_relays::NearRelayCost;
use crate::route_matrix::{RouteMatrix, INVALID_ROUTE_VALUE};
use crate::route_state::{saturating_increment, RouteState, MAX_COMMIT_COUNTER, MAX_SLICE_COUNTER};
use crate::session_data::SessionData;
use crate::types::RouteShader;

/// A route through the relay network, as matrix indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCandidate {
    pub relays: Vec<usize>,
    /// Predicted client-to-server RTT through the route, in milliseconds.
    pub cost: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Direct,
    New(RouteCandidate),
    Continue(RouteCandidate),
}

/// Read-only inputs of one decision.
pub struct DecisionContext<'a> {
    pub matrix: &'a RouteMatrix,
    pub shader: &'a RouteShader,
    pub near_relays: &'a [NearRelayCost],
    /// Matrix indices of the relays in the server's datacenter.
    pub destination_relays: &'a [usize],
    pub metrics: &'a Metrics,
}

/// All one- and two-hop routes from the near relays to the destination.
#[must_use]
pub fn candidate_routes(
    matrix: &RouteMatrix,
    near_relays: &[NearRelayCost],
    destination_relays: &[usize],
) -> Vec<RouteCandidate> {
    let mut candidates = Vec::new();
    for near in near_relays {
        if destination_relays.contains(&near.matrix_index) {
            candidates.push(RouteCandidate {
                relays: vec![near.matrix_index],
                cost: near.rtt,
            });
        }
        for &destination in destination_relays {
            if let Some(link) = matrix.cost(near.matrix_index, destination) {
                candidates.push(RouteCandidate {
                    relays: vec![near.matrix_index, destination],
                    cost: (near.rtt + link).min(INVALID_ROUTE_VALUE),
                });
            }
        }
    }
    candidates
}

/// Cheapest candidate, preferring fewer hops on a tie.
#[must_use]
pub fn best_route(candidates: &[RouteCandidate]) -> Option<&RouteCandidate> {
    candidates
        .iter()
        .min_by_key(|candidate| (candidate.cost, candidate.relays.len()))
}

/// Re-prices an existing route, `None` if it can no longer be travelled.
#[must_use]
pub fn current_route(
    matrix: &RouteMatrix,
    near_relays: &[NearRelayCost],
    relay_ids: &[u64],
) -> Option<RouteCandidate> {
    let relays = relay_ids
        .iter()
        .map(|&id| matrix.relay_index(id))
        .collect::<Option<Vec<_>>>()?;
    let first = *relays.first()?;
    let mut cost = near_relays
        .iter()
        .find(|near| near.matrix_index == first)?
        .rtt;
    for pair in relays.windows(2) {
        cost += matrix.cost(pair[0], pair[1])?;
    }
    Some(RouteCandidate {
        relays,
        cost: cost.min(INVALID_ROUTE_VALUE),
    })
}

fn milliseconds(value: f32) -> i32 {
    if value.is_finite() {
        value.round().clamp(0.0, INVALID_ROUTE_VALUE as f32) as i32
    } else {
        INVALID_ROUTE_VALUE
    }
}

fn slices(value: u32) -> i32 {
    value.min(MAX_SLICE_COUNTER as u32) as i32
}

/// Sets the shader driven flags, counting them the first time they appear.
fn apply_shader_flags(
    shader: &RouteShader,
    packet: &SessionUpdatePacket,
    state: &mut RouteState,
    metrics: &Metrics,
) {
    if !state.banned && shader.banned_users.contains(&packet.user_hash) {
        state.banned = true;
        metrics.increment(Counter::Banned);
    }
    if !state.disabled && shader.disable_acceleration {
        state.disabled = true;
        metrics.increment(Counter::Disabled);
    }
    state.ab_test = shader.ab_test;
    if !state.not_selected && shader.ab_test && packet.session_id % 2 == 1 {
        state.not_selected = true;
        metrics.increment(Counter::NotSelected);
    }
}

fn veto(state: &mut RouteState, metrics: &Metrics, counter: Counter) -> RouteDecision {
    state.take_direct(true);
    metrics.increment(counter);
    RouteDecision::Direct
}

/// Vetoes a session that was on a route it can no longer be on: either the
/// stored route has no relays or the SDK dropped off it. Holds for every
/// slice, whether or not a route decision follows.
///
/// Returns `true` when the session was vetoed.
pub fn veto_broken_route(
    packet: &SessionUpdatePacket,
    input: &SessionData,
    state: &mut RouteState,
    metrics: &Metrics,
) -> bool {
    if !input.route_state.next {
        return false;
    }
    if input.route_num_relays == 0 {
        state.next_without_route_relays = true;
        veto(state, metrics, Counter::NextWithoutRouteRelays);
        return true;
    }
    if !packet.next {
        state.sdk_aborted = true;
        veto(state, metrics, Counter::SdkAborted);
        return true;
    }
    false
}

/// Decides the route for this slice and updates `output.route_state`.
///
/// `input` is the session data as it arrived; the route itself is not
/// written to `output` here.
pub fn decide_route(
    ctx: &DecisionContext<'_>,
    packet: &SessionUpdatePacket,
    input: &SessionData,
    output: &mut SessionData,
) -> RouteDecision {
    let state = &mut output.route_state;
    let was_on_next = input.route_state.next;

    if veto_broken_route(packet, input, state, ctx.metrics) {
        return RouteDecision::Direct;
    }

    apply_shader_flags(ctx.shader, packet, state, ctx.metrics);
    if state.is_vetoed() {
        state.take_direct(false);
        return RouteDecision::Direct;
    }

    let candidates: Vec<_> =
        candidate_routes(ctx.matrix, ctx.near_relays, ctx.destination_relays)
            .into_iter()
            .filter(|candidate| candidate.cost <= ctx.shader.max_next_rtt)
            .collect();

    if was_on_next {
        stay_on_route(ctx, packet, input, state, &candidates)
    } else {
        take_route(ctx, packet, state, &candidates)
    }
}

fn take_route(
    ctx: &DecisionContext<'_>,
    packet: &SessionUpdatePacket,
    state: &mut RouteState,
    candidates: &[RouteCandidate],
) -> RouteDecision {
    let shader = ctx.shader;
    if packet.direct_packet_loss >= shader.packet_loss_threshold {
        saturating_increment(&mut state.packet_loss_sustained_counter, MAX_SLICE_COUNTER);
    } else {
        state.packet_loss_sustained_counter = 0;
    }

    let Some(best) = best_route(candidates) else {
        state.no_route = true;
        ctx.metrics.increment(Counter::NoRoute);
        return RouteDecision::Direct;
    };
    state.no_route = false;

    let reduce_latency = milliseconds(packet.direct_rtt) - best.cost >= shader.latency_threshold;
    let reduce_packet_loss =
        state.packet_loss_sustained_counter >= slices(shader.packet_loss_sustained_slices.max(1));
    if !reduce_latency && !reduce_packet_loss {
        return RouteDecision::Direct;
    }

    state.next = true;
    state.reduce_latency = reduce_latency;
    state.reduce_packet_loss = reduce_packet_loss;
    state.multipath = shader.multipath;
    state.committed = !shader.try_before_you_buy;
    state.commit_counter = 0;
    state.latency_worse_counter = 0;
    state.mispredict_counter = 0;
    RouteDecision::New(best.clone())
}

fn stay_on_route(
    ctx: &DecisionContext<'_>,
    packet: &SessionUpdatePacket,
    input: &SessionData,
    state: &mut RouteState,
    candidates: &[RouteCandidate],
) -> RouteDecision {
    let shader = ctx.shader;
    let Some(current) = current_route(ctx.matrix, ctx.near_relays, input.route_relays()) else {
        state.route_lost = true;
        state.take_direct(false);
        ctx.metrics.increment(Counter::RouteLost);
        return RouteDecision::Direct;
    };

    let direct_rtt = milliseconds(packet.direct_rtt);
    let next_rtt = milliseconds(packet.next_rtt);

    if next_rtt > shader.max_next_rtt {
        state.next_latency_too_high = true;
        return veto(state, ctx.metrics, Counter::NextLatencyTooHigh);
    }

    if next_rtt > direct_rtt + shader.latency_threshold {
        saturating_increment(&mut state.latency_worse_counter, MAX_SLICE_COUNTER);
    } else {
        state.latency_worse_counter = 0;
    }
    if state.latency_worse_counter >= slices(shader.latency_worse_slices) {
        state.latency_worse = true;
        return veto(state, ctx.metrics, Counter::LatencyWorse);
    }

    if next_rtt > input.route_cost + shader.mispredict_threshold {
        saturating_increment(&mut state.mispredict_counter, MAX_SLICE_COUNTER);
    } else {
        state.mispredict_counter = 0;
    }
    if state.mispredict_counter >= slices(shader.mispredict_slices) {
        state.mispredict = true;
        return veto(state, ctx.metrics, Counter::Mispredict);
    }

    if !state.committed {
        if next_rtt < direct_rtt {
            saturating_increment(&mut state.commit_counter, MAX_COMMIT_COUNTER);
            let needed = shader.commit_slices.min(MAX_COMMIT_COUNTER as u32) as i32;
            if state.commit_counter >= needed {
                state.committed = true;
            }
        } else {
            state.commit_veto = true;
            return veto(state, ctx.metrics, Counter::CommitVeto);
        }
    }

    if let Some(best) = best_route(candidates) {
        if best.relays != current.relays && best.cost + shader.route_switch_threshold < current.cost
        {
            ctx.metrics.increment(Counter::RouteSwitched);
            return RouteDecision::New(best.clone());
        }
    }
    RouteDecision::Continue(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    // Relays 0 and 1 are near the client, 2 and 3 are in the server's datacenter.
    fn matrix() -> RouteMatrix {
        let addr = |i: u8| SocketAddr::from(([10, 0, 0, i], 40000));
        // pairs: (1,0) (2,0) (2,1) (3,0) (3,1) (3,2)
        RouteMatrix::new(
            0,
            vec![10, 11, 20, 21],
            vec![addr(1), addr(2), addr(3), addr(4)],
            vec![1, 1, 2, 2],
            vec![5, 30, 15, -1, 40, 1],
        )
        .unwrap()
    }

    fn near() -> Vec<NearRelayCost> {
        vec![
            NearRelayCost { matrix_index: 0, rtt: 10 },
            NearRelayCost { matrix_index: 1, rtt: 12 },
        ]
    }

    fn packet(direct_rtt: f32) -> SessionUpdatePacket {
        SessionUpdatePacket {
            session_id: 2,
            direct_rtt,
            ..SessionUpdatePacket::default()
        }
    }

    struct Fixture {
        matrix: RouteMatrix,
        shader: RouteShader,
        near: Vec<NearRelayCost>,
        metrics: Metrics,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                matrix: matrix(),
                shader: RouteShader::default(),
                near: near(),
                metrics: Metrics::new(),
            }
        }

        fn decide(
            &self,
            packet: &SessionUpdatePacket,
            input: &SessionData,
        ) -> (RouteDecision, SessionData) {
            let ctx = DecisionContext {
                matrix: &self.matrix,
                shader: &self.shader,
                near_relays: &self.near,
                destination_relays: &[2, 3],
                metrics: &self.metrics,
            };
            let mut output = input.clone();
            let decision = decide_route(&ctx, packet, input, &mut output);
            (decision, output)
        }
    }

    fn on_route(relay_ids: &[u64], cost: i32) -> SessionData {
        let mut data = SessionData::default();
        data.route_state.next = true;
        data.route_state.committed = true;
        data.set_route(relay_ids, cost);
        data
    }

    #[test]
    fn candidates_and_best() {
        let m = matrix();
        let candidates = candidate_routes(&m, &near(), &[2, 3]);
        let costs: Vec<_> = candidates.iter().map(|c| (c.relays.clone(), c.cost)).collect();
        assert_eq!(
            costs,
            vec![(vec![0, 2], 40), (vec![1, 2], 27), (vec![1, 3], 52)]
        );
        assert_eq!(best_route(&candidates).unwrap().relays, vec![1, 2]);
        assert!(best_route(&[]).is_none());
    }

    #[test]
    fn one_hop_when_near_relay_is_in_destination() {
        let m = matrix();
        let near = [NearRelayCost { matrix_index: 2, rtt: 8 }];
        let candidates = candidate_routes(&m, &near, &[2, 3]);
        assert_eq!(candidates[0], RouteCandidate { relays: vec![2], cost: 8 });
        assert_eq!(best_route(&candidates).unwrap().relays, vec![2]);
    }

    #[test]
    fn current_route_repriced() {
        let m = matrix();
        assert_eq!(current_route(&m, &near(), &[11, 20]).unwrap().cost, 27);
        assert!(current_route(&m, &near(), &[10, 21]).is_none());
        assert!(current_route(&m, &near(), &[99, 20]).is_none());
        assert!(current_route(&m, &near(), &[20, 21]).is_none());
        assert!(current_route(&m, &near(), &[]).is_none());
    }

    #[test]
    fn takes_route_that_reduces_latency() {
        let fx = Fixture::new();
        let (decision, output) = fx.decide(&packet(60.0), &SessionData::default());
        let RouteDecision::New(route) = decision else {
            panic!("expected a new route");
        };
        assert_eq!(route.relays, vec![1, 2]);
        assert!(output.route_state.next);
        assert!(output.route_state.reduce_latency);
        assert!(output.route_state.committed);
    }

    #[test]
    fn stays_direct_without_improvement() {
        let fx = Fixture::new();
        let (decision, output) = fx.decide(&packet(30.0), &SessionData::default());
        assert_eq!(decision, RouteDecision::Direct);
        assert!(!output.route_state.next);
    }

    #[test]
    fn packet_loss_takes_route() {
        let fx = Fixture::new();
        let mut p = packet(20.0);
        p.direct_packet_loss = 5.0;
        let (decision, output) = fx.decide(&p, &SessionData::default());
        assert!(matches!(decision, RouteDecision::New(_)));
        assert!(output.route_state.reduce_packet_loss);
        assert!(!output.route_state.reduce_latency);
    }

    #[test]
    fn no_candidates_is_no_route() {
        let mut fx = Fixture::new();
        fx.near.clear();
        let (decision, output) = fx.decide(&packet(200.0), &SessionData::default());
        assert_eq!(decision, RouteDecision::Direct);
        assert!(output.route_state.no_route);
        assert_eq!(fx.metrics.get(Counter::NoRoute), 1);
    }

    #[test]
    fn next_without_relays_vetoes() {
        let fx = Fixture::new();
        let mut input = SessionData::default();
        input.route_state.next = true;
        let (decision, output) = fx.decide(&packet(60.0), &input);
        assert_eq!(decision, RouteDecision::Direct);
        assert!(!output.route_state.next);
        assert!(output.route_state.veto);
        assert!(output.route_state.next_without_route_relays);
    }

    #[test]
    fn sdk_abort_vetoes() {
        let fx = Fixture::new();
        let mut p = packet(60.0);
        p.next = false;
        let (decision, output) = fx.decide(&p, &on_route(&[11, 20], 27));
        assert_eq!(decision, RouteDecision::Direct);
        assert!(output.route_state.veto);
        assert!(output.route_state.sdk_aborted);

        // the veto is sticky
        let (decision, _) = fx.decide(&packet(200.0), &output);
        assert_eq!(decision, RouteDecision::Direct);
    }

    #[test]
    fn continues_good_route() {
        let fx = Fixture::new();
        let mut p = packet(60.0);
        p.next = true;
        p.next_rtt = 28.0;
        let (decision, output) = fx.decide(&p, &on_route(&[11, 20], 27));
        assert_eq!(
            decision,
            RouteDecision::Continue(RouteCandidate { relays: vec![1, 2], cost: 27 })
        );
        assert!(output.route_state.next);
    }

    #[test]
    fn lost_route_goes_direct_without_veto() {
        let fx = Fixture::new();
        let mut p = packet(60.0);
        p.next = true;
        let (decision, output) = fx.decide(&p, &on_route(&[10, 21], 30));
        assert_eq!(decision, RouteDecision::Direct);
        assert!(output.route_state.route_lost);
        assert!(!output.route_state.veto);
    }

    #[test]
    fn latency_worse_after_consecutive_slices() {
        let fx = Fixture::new();
        let mut p = packet(20.0);
        p.next = true;
        p.next_rtt = 27.0;
        let mut data = on_route(&[11, 20], 27);
        for _ in 0..2 {
            let (decision, output) = fx.decide(&p, &data);
            assert!(matches!(decision, RouteDecision::Continue(_)));
            data = output;
        }
        let (decision, output) = fx.decide(&p, &data);
        assert_eq!(decision, RouteDecision::Direct);
        assert!(output.route_state.latency_worse);
        assert!(output.route_state.veto);
    }

    #[test]
    fn mispredict_after_consecutive_slices() {
        let fx = Fixture::new();
        let mut p = packet(100.0);
        p.next = true;
        p.next_rtt = 50.0;
        let mut data = on_route(&[11, 20], 27);
        for _ in 0..2 {
            let (decision, output) = fx.decide(&p, &data);
            assert!(matches!(decision, RouteDecision::Continue(_)));
            data = output;
        }
        let (_, output) = fx.decide(&p, &data);
        assert!(output.route_state.mispredict);
        assert!(!output.route_state.next);
    }

    #[test]
    fn try_before_you_buy_commits_or_vetoes() {
        let mut fx = Fixture::new();
        fx.shader.try_before_you_buy = true;
        let (_, mut data) = fx.decide(&packet(60.0), &SessionData::default());
        assert!(!data.route_state.committed);
        data.set_route(&[11, 20], 27);

        let mut p = packet(60.0);
        p.next = true;
        p.next_rtt = 30.0;
        for _ in 0..3 {
            let (decision, output) = fx.decide(&p, &data);
            assert!(matches!(decision, RouteDecision::Continue(_)));
            data = output;
        }
        assert!(data.route_state.committed);

        let (_, mut uncommitted) = fx.decide(&packet(60.0), &SessionData::default());
        uncommitted.set_route(&[11, 20], 27);
        p.next_rtt = 61.0;
        let (decision, output) = fx.decide(&p, &uncommitted);
        assert_eq!(decision, RouteDecision::Direct);
        assert!(output.route_state.commit_veto);
    }

    #[test]
    fn switches_to_much_better_route() {
        let fx = Fixture::new();
        let mut p = packet(100.0);
        p.next = true;
        p.next_rtt = 40.0;
        let (decision, _) = fx.decide(&p, &on_route(&[10, 20], 40));
        assert_eq!(
            decision,
            RouteDecision::New(RouteCandidate { relays: vec![1, 2], cost: 27 })
        );
        assert_eq!(fx.metrics.get(Counter::RouteSwitched), 1);
    }

    #[test]
    fn shader_flags_keep_session_direct() {
        let mut fx = Fixture::new();
        fx.shader.banned_users = vec![77];
        let mut p = packet(200.0);
        p.user_hash = 77;
        let (decision, output) = fx.decide(&p, &SessionData::default());
        assert_eq!(decision, RouteDecision::Direct);
        assert!(output.route_state.banned);

        let mut fx = Fixture::new();
        fx.shader.ab_test = true;
        let mut p = packet(200.0);
        p.session_id = 3;
        let (decision, output) = fx.decide(&p, &SessionData::default());
        assert_eq!(decision, RouteDecision::Direct);
        assert!(output.route_state.not_selected);
        p.session_id = 4;
        assert!(matches!(fx.decide(&p, &SessionData::default()).0, RouteDecision::New(_)));
    }
}
