//! Fallback-to-direct accounting.
//!
//! A client that loses its route falls back to direct on its own and tells
//! the backend why through [`FallbackFlags`]. Reasons are counted once, on
//! the first update that reports the fallback; after that the session stays
//! direct for good.

use wire::FallbackFlags;

use crate::metrics::{Counter, Metrics};
use crate::session_data::SessionData;

/// Counts each known reason in `flags`.
///
/// Flags with no known reason, or with bits outside the known set, also
/// count as an unknown reason.
pub fn record_fallback_reasons(flags: FallbackFlags, metrics: &Metrics) {
    let mut known = false;
    for counter in flags.reasons().filter_map(Counter::fallback_reason) {
        metrics.increment(counter);
        known = true;
    }
    if !known || flags.has_unknown_bits() {
        metrics.increment(Counter::FallbackUnknownReason);
    }
}

/// Applies a fallback report to `output`.
///
/// Returns `true` when the session is (now or already) fallen back and must
/// be answered with a direct route.
pub fn apply_fallback(
    fallback_to_direct: bool,
    flags: FallbackFlags,
    input: &SessionData,
    output: &mut SessionData,
    metrics: &Metrics,
) -> bool {
    if fallback_to_direct && !input.fell_back_to_direct {
        metrics.increment(Counter::FallbackToDirect);
        record_fallback_reasons(flags, metrics);
        output.fell_back_to_direct = true;
    }
    output.fell_back_to_direct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_known_bit_counts() {
        let metrics = Metrics::new();
        let flags = FallbackFlags::from_raw(
            FallbackFlags::BAD_ROUTE_TOKEN | FallbackFlags::CLIENT_TIMED_OUT,
        );
        record_fallback_reasons(flags, &metrics);
        assert_eq!(metrics.get(Counter::FallbackBadRouteToken), 1);
        assert_eq!(metrics.get(Counter::FallbackClientTimedOut), 1);
        assert_eq!(metrics.get(Counter::FallbackUnknownReason), 0);
    }

    #[test]
    fn empty_or_unknown_bits_count_unknown() {
        let metrics = Metrics::new();
        record_fallback_reasons(FallbackFlags::default(), &metrics);
        assert_eq!(metrics.get(Counter::FallbackUnknownReason), 1);

        record_fallback_reasons(
            FallbackFlags::from_raw(FallbackFlags::ROUTE_EXPIRED | 1 << 20),
            &metrics,
        );
        assert_eq!(metrics.get(Counter::FallbackRouteExpired), 1);
        assert_eq!(metrics.get(Counter::FallbackUnknownReason), 2);
    }

    #[test]
    fn reasons_counted_only_on_first_fallback() {
        let metrics = Metrics::new();
        let flags = FallbackFlags::from_raw(FallbackFlags::ROUTE_EXPIRED);
        let input = SessionData::default();
        let mut output = input.clone();
        assert!(apply_fallback(true, flags, &input, &mut output, &metrics));
        assert!(output.fell_back_to_direct);

        let input = output.clone();
        let mut output = input.clone();
        assert!(apply_fallback(true, flags, &input, &mut output, &metrics));
        assert_eq!(metrics.get(Counter::FallbackToDirect), 1);
        assert_eq!(metrics.get(Counter::FallbackRouteExpired), 1);
    }

    #[test]
    fn fallback_is_permanent() {
        let metrics = Metrics::new();
        let input = SessionData {
            fell_back_to_direct: true,
            ..SessionData::default()
        };
        let mut output = input.clone();
        assert!(apply_fallback(false, FallbackFlags::default(), &input, &mut output, &metrics));
        assert_eq!(metrics.get(Counter::FallbackToDirect), 0);
    }

    #[test]
    fn no_fallback_reported() {
        let metrics = Metrics::new();
        let input = SessionData::default();
        let mut output = input.clone();
        assert!(!apply_fallback(false, FallbackFlags::default(), &input, &mut output, &metrics));
    }
}
