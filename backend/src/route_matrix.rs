//! Precomputed relay-to-relay costs.
//!
//! The matrix is produced elsewhere and consumed here read-only. Costs are
//! symmetric, so only the lower triangle is stored: entry `(i, j)` with
//! `i > j` lives at `i * (i - 1) / 2 + j`. A negative cost means no link.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Upper bound for any route cost in milliseconds.
pub const INVALID_ROUTE_VALUE: i32 = 10_000;

/// Errors building a route matrix from its parts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteMatrixError {
    #[error("relay columns disagree: {ids} ids, {addresses} addresses, {datacenters} datacenters")]
    ColumnMismatch {
        ids: usize,
        addresses: usize,
        datacenters: usize,
    },

    #[error("expected {expected} costs for the relay count, found {found}")]
    CostCount { expected: usize, found: usize },

    #[error("relay {0:016x} appears twice")]
    DuplicateRelay(u64),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RouteMatrixFile {
    created_at: u64,
    relay_ids: Vec<u64>,
    relay_addresses: Vec<SocketAddr>,
    relay_datacenter_ids: Vec<u64>,
    costs: Vec<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "RouteMatrixFile", into = "RouteMatrixFile")]
pub struct RouteMatrix {
    created_at: u64,
    relay_ids: Vec<u64>,
    relay_addresses: Vec<SocketAddr>,
    relay_datacenter_ids: Vec<u64>,
    costs: Vec<i32>,
    index: HashMap<u64, usize>,
}

impl TryFrom<RouteMatrixFile> for RouteMatrix {
    type Error = RouteMatrixError;

    fn try_from(file: RouteMatrixFile) -> Result<Self, Self::Error> {
        Self::new(
            file.created_at,
            file.relay_ids,
            file.relay_addresses,
            file.relay_datacenter_ids,
            file.costs,
        )
    }
}

impl From<RouteMatrix> for RouteMatrixFile {
    fn from(matrix: RouteMatrix) -> Self {
        Self {
            created_at: matrix.created_at,
            relay_ids: matrix.relay_ids,
            relay_addresses: matrix.relay_addresses,
            relay_datacenter_ids: matrix.relay_datacenter_ids,
            costs: matrix.costs,
        }
    }
}

/// Number of stored entries for `n` relays.
#[must_use]
pub const fn triangular_len(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Storage slot of the unordered pair `(i, j)`, `i != j`.
#[must_use]
pub const fn triangular_index(i: usize, j: usize) -> usize {
    let (hi, lo) = if i > j { (i, j) } else { (j, i) };
    hi * (hi - 1) / 2 + lo
}

impl RouteMatrix {
    pub fn new(
        created_at: u64,
        relay_ids: Vec<u64>,
        relay_addresses: Vec<SocketAddr>,
        relay_datacenter_ids: Vec<u64>,
        costs: Vec<i32>,
    ) -> Result<Self, RouteMatrixError> {
        let n = relay_ids.len();
        if relay_addresses.len() != n || relay_datacenter_ids.len() != n {
            return Err(RouteMatrixError::ColumnMismatch {
                ids: n,
                addresses: relay_addresses.len(),
                datacenters: relay_datacenter_ids.len(),
            });
        }
        if costs.len() != triangular_len(n) {
            return Err(RouteMatrixError::CostCount {
                expected: triangular_len(n),
                found: costs.len(),
            });
        }
        let mut index = HashMap::with_capacity(n);
        for (i, &id) in relay_ids.iter().enumerate() {
            if index.insert(id, i).is_some() {
                return Err(RouteMatrixError::DuplicateRelay(id));
            }
        }
        Ok(Self {
            created_at,
            relay_ids,
            relay_addresses,
            relay_datacenter_ids,
            costs,
            index,
        })
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Unix seconds at which the matrix was computed.
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    #[must_use]
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    #[must_use]
    pub fn is_stale(&self, now: u64, max_age: u64) -> bool {
        self.age(now) > max_age
    }

    #[must_use]
    pub fn num_relays(&self) -> usize {
        self.relay_ids.len()
    }

    #[must_use]
    pub fn relay_index(&self, relay_id: u64) -> Option<usize> {
        self.index.get(&relay_id).copied()
    }

    #[must_use]
    pub fn relay_id(&self, index: usize) -> Option<u64> {
        self.relay_ids.get(index).copied()
    }

    #[must_use]
    pub fn relay_address(&self, index: usize) -> Option<SocketAddr> {
        self.relay_addresses.get(index).copied()
    }

    #[must_use]
    pub fn relay_datacenter(&self, index: usize) -> Option<u64> {
        self.relay_datacenter_ids.get(index).copied()
    }

    /// Link cost between two relays, `None` for no link or the same relay.
    #[must_use]
    pub fn cost(&self, i: usize, j: usize) -> Option<i32> {
        if i == j || i >= self.num_relays() || j >= self.num_relays() {
            return None;
        }
        self.costs
            .get(triangular_index(i, j))
            .copied()
            .filter(|&cost| (0..INVALID_ROUTE_VALUE).contains(&cost))
    }

    /// Matrix indices of the relays in `datacenter_id`.
    #[must_use]
    pub fn relays_in_datacenter(&self, datacenter_id: u64) -> Vec<usize> {
        self.relay_datacenter_ids
            .iter()
            .enumerate()
            .filter(|(_, &dc)| dc == datacenter_id)
            .map(|(i, _)| i)
            .collect()
    }
}
