//! Per-session route decision state carried inside the session data.

use bitstream::Stream;
use serde::{Deserialize, Serialize};
use wire::limits::MAX_NEAR_RELAYS;
use wire::{WireResult, MAX_NEAR_RELAY_MS};

/// Largest value of the commit counter.
pub const MAX_COMMIT_COUNTER: i32 = 4;

/// Largest value of the slice counters.
pub const MAX_SLICE_COUNTER: i32 = 7;

/// Slices of loss history kept per near relay.
pub const NEAR_RELAY_HISTORY_SLICES: u32 = 8;

/// Lossy slices within the history that exclude a near relay.
pub const NEAR_RELAY_EXCLUDE_LOSSY_SLICES: u32 = 3;

/// Decision flags, counters and near relay history of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteState {
    pub user_id: u64,
    pub next: bool,
    pub veto: bool,
    pub banned: bool,
    pub disabled: bool,
    pub not_selected: bool,
    pub ab_test: bool,
    pub reduce_latency: bool,
    pub reduce_packet_loss: bool,
    pub multipath: bool,
    pub committed: bool,
    pub commit_veto: bool,
    pub commit_counter: i32,
    pub latency_worse: bool,
    pub location_veto: bool,
    pub mispredict: bool,
    pub no_route: bool,
    pub next_latency_too_high: bool,
    pub route_lost: bool,
    pub sdk_aborted: bool,
    pub next_without_route_relays: bool,
    pub unknown_datacenter: bool,
    pub datacenter_not_enabled: bool,
    pub stale_route_matrix: bool,
    pub latency_worse_counter: i32,
    pub mispredict_counter: i32,
    pub packet_loss_sustained_counter: i32,
    pub num_near_relays: usize,
    pub near_relay_rtt: [i32; MAX_NEAR_RELAYS],
    pub near_relay_jitter: [i32; MAX_NEAR_RELAYS],
    /// Bit 0 is the latest slice; a set bit means loss was seen.
    pub near_relay_pl_history: [u8; MAX_NEAR_RELAYS],
}

impl Default for RouteState {
    fn default() -> Self {
        Self {
            user_id: 0,
            next: false,
            veto: false,
            banned: false,
            disabled: false,
            not_selected: false,
            ab_test: false,
            reduce_latency: false,
            reduce_packet_loss: false,
            multipath: false,
            committed: false,
            commit_veto: false,
            commit_counter: 0,
            latency_worse: false,
            location_veto: false,
            mispredict: false,
            no_route: false,
            next_latency_too_high: false,
            route_lost: false,
            sdk_aborted: false,
            next_without_route_relays: false,
            unknown_datacenter: false,
            datacenter_not_enabled: false,
            stale_route_matrix: false,
            latency_worse_counter: 0,
            mispredict_counter: 0,
            packet_loss_sustained_counter: 0,
            num_near_relays: 0,
            near_relay_rtt: [0; MAX_NEAR_RELAYS],
            near_relay_jitter: [0; MAX_NEAR_RELAYS],
            near_relay_pl_history: [0; MAX_NEAR_RELAYS],
        }
    }
}

impl RouteState {
    /// Any sticky flag that keeps the session off the network next.
    #[must_use]
    pub const fn is_vetoed(&self) -> bool {
        self.veto || self.banned || self.disabled || self.not_selected || self.location_veto
    }

    /// Whether near relay `index` is too unreliable to route through.
    #[must_use]
    pub fn near_relay_excluded(&self, index: usize) -> bool {
        if index >= self.num_near_relays {
            return true;
        }
        self.near_relay_rtt[index] >= MAX_NEAR_RELAY_MS
            || self.near_relay_pl_history[index].count_ones() >= NEAR_RELAY_EXCLUDE_LOSSY_SLICES
    }

    /// Leaves the route, counting it as a veto when `veto` is set.
    pub fn take_direct(&mut self, veto: bool) {
        self.next = false;
        self.committed = false;
        self.commit_counter = 0;
        self.latency_worse_counter = 0;
        self.mispredict_counter = 0;
        if veto {
            self.veto = true;
        }
    }

    pub(crate) fn serialize_state<S: Stream>(&mut self, stream: &mut S) -> WireResult<()> {
        stream.serialize_uint64(&mut self.user_id);
        for flag in [
            &mut self.next,
            &mut self.veto,
            &mut self.banned,
            &mut self.disabled,
            &mut self.not_selected,
            &mut self.ab_test,
            &mut self.reduce_latency,
            &mut self.reduce_packet_loss,
            &mut self.multipath,
            &mut self.committed,
            &mut self.commit_veto,
        ] {
            stream.serialize_bool(flag);
        }
        stream.serialize_integer(&mut self.commit_counter, 0, MAX_COMMIT_COUNTER);
        for flag in [
            &mut self.latency_worse,
            &mut self.location_veto,
            &mut self.mispredict,
            &mut self.no_route,
            &mut self.next_latency_too_high,
            &mut self.route_lost,
            &mut self.sdk_aborted,
            &mut self.next_without_route_relays,
            &mut self.unknown_datacenter,
            &mut self.datacenter_not_enabled,
            &mut self.stale_route_matrix,
        ] {
            stream.serialize_bool(flag);
        }
        stream.serialize_integer(&mut self.latency_worse_counter, 0, MAX_SLICE_COUNTER);
        stream.serialize_integer(&mut self.mispredict_counter, 0, MAX_SLICE_COUNTER);
        stream.serialize_integer(&mut self.packet_loss_sustained_counter, 0, MAX_SLICE_COUNTER);

        stream.serialize_length(&mut self.num_near_relays, MAX_NEAR_RELAYS);
        stream.result()?;
        for i in 0..self.num_near_relays {
            stream.serialize_integer(&mut self.near_relay_rtt[i], 0, MAX_NEAR_RELAY_MS);
            stream.serialize_integer(&mut self.near_relay_jitter[i], 0, MAX_NEAR_RELAY_MS);
            let mut history = u32::from(self.near_relay_pl_history[i]);
            stream.serialize_bits(&mut history, NEAR_RELAY_HISTORY_SLICES);
            self.near_relay_pl_history[i] = history as u8;
        }
        Ok(stream.result()?)
    }
}

/// Increments a slice counter without passing `max`.
pub(crate) fn saturating_increment(counter: &mut i32, max: i32) {
    *counter = (*counter + 1).min(max);
}
