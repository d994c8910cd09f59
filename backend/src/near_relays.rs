//! Near relay selection and stabilization.
//!
//! Clients ping a handful of relays close to them and report the results
//! every slice. The backend picks that set by distance, folds the reports
//! into the session's history and, for one slice after a customer tier
//! change, holds the previous RTTs so routes do not flap.

use wire::limits::MAX_NEAR_RELAYS;
use wire::{NearRelay, NearRelayStats, MAX_NEAR_RELAY_MS};

use crate::database::Database;
use crate::route_matrix::RouteMatrix;
use crate::session_data::SessionData;
use crate::types::Location;

/// A usable near relay: its matrix index and the client's RTT to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NearRelayCost {
    pub matrix_index: usize,
    pub rtt: i32,
}

/// Reported near relays mapped against the route matrix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NearRelaySet {
    /// Matrix index per reported relay, `None` when the relay is gone.
    pub matrix_indices: Vec<Option<usize>>,
    /// Relays that may start a route.
    pub usable: Vec<NearRelayCost>,
    /// Per reported relay, whether the client should stop routing through it.
    pub excluded: [bool; MAX_NEAR_RELAYS],
}

impl NearRelaySet {
    #[must_use]
    pub fn any_excluded(&self) -> bool {
        self.excluded[..self.matrix_indices.len()].iter().any(|&e| e)
    }
}

/// Whether near relay stats should be frozen for this slice.
///
/// Holds when the buyer's customer tier changed since the previous slice,
/// once the session is past its first few slices.
#[must_use]
pub fn should_hold(
    buyer_large_customer: bool,
    input: &SessionData,
    slice_number: u32,
    hold_min_slice: u32,
) -> bool {
    slice_number >= hold_min_slice && buyer_large_customer != input.large_customer
}

/// Folds reported stats into `output`'s near relay history.
///
/// When `hold` is set the RTTs keep their values from `input` and are also
/// stored as the hold snapshot.
pub fn update_near_relay_stats(
    reported: &[NearRelayStats],
    input: &SessionData,
    output: &mut SessionData,
    hold: bool,
) {
    let previous = &input.route_state;
    let state = &mut output.route_state;
    let count = reported.len().min(MAX_NEAR_RELAYS);

    state.num_near_relays = count;
    for (i, stats) in reported.iter().take(count).enumerate() {
        let history = if i < previous.num_near_relays {
            previous.near_relay_pl_history[i]
        } else {
            0
        };
        state.near_relay_pl_history[i] = (history << 1) | u8::from(stats.packet_loss > 0);
        state.near_relay_jitter[i] = stats.jitter.clamp(0, MAX_NEAR_RELAY_MS);
        state.near_relay_rtt[i] = if hold && i < previous.num_near_relays {
            previous.near_relay_rtt[i]
        } else {
            stats.rtt.clamp(0, MAX_NEAR_RELAY_MS)
        };
    }

    output.hold_near_relays = hold;
    output.hold_near_relay_rtt = if hold {
        state.near_relay_rtt[..count].to_vec()
    } else {
        Vec::new()
    };
}

/// Maps reported relays to the matrix and applies the exclusion rules to
/// the stats already folded into `output`.
#[must_use]
pub fn classify_near_relays(
    reported: &[NearRelayStats],
    output: &SessionData,
    matrix: &RouteMatrix,
) -> NearRelaySet {
    let state = &output.route_state;
    let mut set = NearRelaySet {
        matrix_indices: Vec::with_capacity(reported.len()),
        usable: Vec::with_capacity(reported.len()),
        excluded: [false; MAX_NEAR_RELAYS],
    };
    for (i, stats) in reported.iter().take(MAX_NEAR_RELAYS).enumerate() {
        let index = matrix.relay_index(stats.relay_id);
        set.matrix_indices.push(index);
        match index {
            Some(matrix_index) if !state.near_relay_excluded(i) => {
                set.usable.push(NearRelayCost {
                    matrix_index,
                    rtt: state.near_relay_rtt[i],
                });
            }
            _ => set.excluded[i] = true,
        }
    }
    set
}

/// The `count` relays closest to `location`, nearest first.
#[must_use]
pub fn nearest_relays(database: &Database, location: &Location, count: usize) -> Vec<NearRelay> {
    let mut candidates: Vec<_> = database
        .relays()
        .filter_map(|relay| {
            let datacenter = database.datacenter(relay.datacenter_id)?;
            Some((location.distance_km(&datacenter.location), relay.id, relay.address))
        })
        .collect();
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    candidates
        .into_iter()
        .take(count.min(MAX_NEAR_RELAYS))
        .map(|(_, relay_id, address)| NearRelay { relay_id, address })
        .collect()
}

/// Whether the relays the client pinged differ from the ones it should ping.
#[must_use]
pub fn near_relays_changed(reported: &[NearRelayStats], nearest: &[NearRelay]) -> bool {
    reported.len() != nearest.len()
        || reported
            .iter()
            .zip(nearest)
            .any(|(stats, relay)| stats.relay_id != relay.relay_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::Nibblins;
    use crate::types::{Datacenter, Relay, Seller};
    use std::net::SocketAddr;

    fn stats(relay_id: u64, rtt: i32, packet_loss: i32) -> NearRelayStats {
        NearRelayStats {
            relay_id,
            rtt,
            jitter: 2,
            packet_loss,
        }
    }

    fn addr(i: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, i], 40000))
    }

    #[test]
    fn hold_requires_flip_and_min_slice() {
        let input = SessionData {
            large_customer: false,
            ..SessionData::default()
        };
        assert!(!should_hold(false, &input, 10, 4));
        assert!(!should_hold(true, &input, 3, 4));
        assert!(should_hold(true, &input, 4, 4));
    }

    #[test]
    fn adopt_reported_stats() {
        let input = SessionData::default();
        let mut output = input.clone();
        update_near_relay_stats(&[stats(1, 20, 0), stats(2, 300, 5)], &input, &mut output, false);
        let state = &output.route_state;
        assert_eq!(state.num_near_relays, 2);
        assert_eq!(state.near_relay_rtt[..2], [20, MAX_NEAR_RELAY_MS]);
        assert_eq!(state.near_relay_pl_history[..2], [0, 1]);
        assert!(!output.hold_near_relays);
        assert!(output.hold_near_relay_rtt.is_empty());
    }

    #[test]
    fn hold_keeps_previous_rtts() {
        let mut input = SessionData::default();
        update_near_relay_stats(&[stats(1, 20, 0), stats(2, 30, 0)], &SessionData::default(), &mut input, false);

        let mut output = input.clone();
        update_near_relay_stats(&[stats(1, 90, 1), stats(2, 95, 0), stats(3, 40, 0)], &input, &mut output, true);
        let state = &output.route_state;
        assert_eq!(state.near_relay_rtt[..3], [20, 30, 40]);
        assert_eq!(state.near_relay_pl_history[0], 1);
        assert!(output.hold_near_relays);
        assert_eq!(output.hold_near_relay_rtt, vec![20, 30, 40]);
    }

    #[test]
    fn loss_history_shifts() {
        let mut data = SessionData::default();
        for loss in [1, 0, 1, 1] {
            let input = data.clone();
            update_near_relay_stats(&[stats(1, 10, loss)], &input, &mut data, false);
        }
        assert_eq!(data.route_state.near_relay_pl_history[0], 0b1011);
        assert!(data.route_state.near_relay_excluded(0));
    }

    #[test]
    fn classify_excludes_missing_and_unreliable() {
        let matrix = RouteMatrix::new(
            0,
            vec![1, 2, 3],
            vec![addr(1), addr(2), addr(3)],
            vec![0, 0, 0],
            vec![5, 5, 5],
        )
        .unwrap();
        let reported = [stats(1, 10, 0), stats(2, 255, 0), stats(9, 10, 0), stats(3, 12, 0)];
        let input = SessionData::default();
        let mut output = input.clone();
        update_near_relay_stats(&reported, &input, &mut output, false);

        let set = classify_near_relays(&reported, &output, &matrix);
        assert_eq!(set.matrix_indices, vec![Some(0), Some(1), None, Some(2)]);
        assert_eq!(
            set.usable,
            vec![
                NearRelayCost { matrix_index: 0, rtt: 10 },
                NearRelayCost { matrix_index: 2, rtt: 12 },
            ]
        );
        assert_eq!(set.excluded[..4], [false, true, true, false]);
        assert!(set.any_excluded());
    }

    #[test]
    fn nearest_by_distance() {
        let relay = |id: u64, datacenter_id: u64| Relay {
            id,
            name: String::new(),
            address: addr(id as u8),
            datacenter_id,
            seller_id: 1,
            public_key: [0; 32],
            token: [0; 32],
            egress_price_override: None,
        };
        let datacenter = |id: u64, latitude: f32| Datacenter {
            id,
            name: format!("dc-{id}"),
            location: Location::new(latitude, 0.0, 0),
        };
        let db = Database::new(
            Vec::new(),
            vec![Seller {
                id: 1,
                name: String::new(),
                egress_price_per_gb: Nibblins::ZERO,
            }],
            vec![datacenter(1, 10.0), datacenter(2, 50.0), datacenter(3, 30.0)],
            vec![relay(1, 1), relay(2, 2), relay(3, 3), relay(4, 99)],
        );
        let client = Location::new(45.0, 0.0, 0);
        let nearest = nearest_relays(&db, &client, 2);
        let ids: Vec<_> = nearest.iter().map(|r| r.relay_id).collect();
        assert_eq!(ids, vec![2, 3]);

        assert!(!near_relays_changed(&[stats(2, 1, 0), stats(3, 1, 0)], &nearest));
        assert!(near_relays_changed(&[stats(3, 1, 0), stats(2, 1, 0)], &nearest));
        assert!(near_relays_changed(&[], &nearest));
    }
}
