//! Route pricing.
//!
//! Each relay on a route charges its seller's egress rate for the envelope
//! bytes of the slice, in both directions. Prices are integral nibblins per
//! gigabyte and every hop is truncated toward zero on its own, so a route
//! never costs more than the sum of what its sellers are owed.

use std::iter::Sum;
use std::ops::Add;

use serde::{Deserialize, Serialize};

const BYTES_PER_GB: u128 = 1_000_000_000;

/// Smallest billing unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Nibblins(u64);

impl Nibblins {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for Nibblins {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Nibblins> for u64 {
    fn from(value: Nibblins) -> Self {
        value.0
    }
}

impl Add for Nibblins {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sum for Nibblins {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

/// Bytes one direction of a route may carry in a slice.
#[must_use]
pub const fn envelope_bytes(kbps: u32, slice_seconds: u32) -> u64 {
    (kbps as u64 * 1000 / 8).saturating_mul(slice_seconds as u64)
}

/// Price of carrying `bytes_up + bytes_down` through one relay.
#[must_use]
pub fn hop_price(rate_per_gb: Nibblins, bytes_up: u64, bytes_down: u64) -> Nibblins {
    let bytes = u128::from(bytes_up) + u128::from(bytes_down);
    let price = u128::from(rate_per_gb.raw())
        .checked_mul(bytes)
        .and_then(|scaled| u64::try_from(scaled / BYTES_PER_GB).ok())
        .unwrap_or(u64::MAX);
    Nibblins(price)
}

/// Per-hop and total price of a route for one slice.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RoutePrice {
    pub hops: Vec<Nibblins>,
    pub total: Nibblins,
}

/// Prices a route whose relays charge `rates`, in route order.
#[must_use]
pub fn route_price(rates: &[Nibblins], bytes_up: u64, bytes_down: u64) -> RoutePrice {
    let hops: Vec<_> = rates
        .iter()
        .map(|&rate| hop_price(rate, bytes_up, bytes_down))
        .collect();
    let total = hops.iter().copied().sum();
    RoutePrice { hops, total }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_for_default_shader() {
        // 256 kbps for a 10 second slice
        assert_eq!(envelope_bytes(256, 10), 320_000);
        assert_eq!(envelope_bytes(0, 10), 0);
    }

    #[test]
    fn hop_price_truncates() {
        // 1000 nibblins per GB over 640 KB is 0.64 nibblins
        assert_eq!(hop_price(Nibblins::new(1000), 320_000, 320_000), Nibblins::ZERO);
        assert_eq!(
            hop_price(Nibblins::new(1_000_000), 320_000, 320_000),
            Nibblins::new(640)
        );
    }

    #[test]
    fn hop_price_does_not_overflow() {
        let price = hop_price(Nibblins::new(u64::MAX), u64::MAX, u64::MAX);
        assert_eq!(price, Nibblins::new(u64::MAX));
        assert_eq!(envelope_bytes(u32::MAX, u32::MAX), u64::MAX);
    }

    #[test]
    fn route_total_is_sum_of_hops() {
        let rates = [Nibblins::new(1_000_000), Nibblins::new(2_500_000)];
        let price = route_price(&rates, 320_000, 320_000);
        assert_eq!(price.hops, vec![Nibblins::new(640), Nibblins::new(1600)]);
        assert_eq!(price.total, Nibblins::new(2240));
    }

    #[test]
    fn empty_route_is_free() {
        let price = route_price(&[], 320_000, 320_000);
        assert!(price.hops.is_empty());
        assert_eq!(price.total, Nibblins::ZERO);
    }
}
