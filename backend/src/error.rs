//! Error types for backend handlers.

use std::net::{IpAddr, SocketAddr};

use wire::WireError;

use crate::metrics::Counter;

/// Reasons a session update is dropped without a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionUpdateError {
    /// Packet framing, version or payload could not be decoded.
    #[error("could not read session update: {0}")]
    ReadPacket(#[source] WireError),

    #[error("buyer {buyer_id:016x} not found")]
    BuyerNotFound { buyer_id: u64 },

    #[error("buyer {buyer_id:016x} is not live")]
    BuyerNotLive { buyer_id: u64 },

    #[error("signature check failed for buyer {buyer_id:016x}")]
    SignatureCheckFailed { buyer_id: u64 },

    /// The session data blob echoed by the client could not be decoded.
    #[error("could not read session data: {0}")]
    BadSessionData(#[source] WireError),

    #[error("session id mismatch: session data has {expected:016x}, packet has {found:016x}")]
    BadSessionId { expected: u64, found: u64 },

    #[error("bad slice number: expected {expected}, packet has {found}")]
    BadSliceNumber { expected: u32, found: u32 },

    /// Tokens, session data or the response itself could not be written.
    #[error("could not write session response: {0}")]
    WriteResponse(#[source] WireError),
}

impl SessionUpdateError {
    /// Counter incremented when a packet is dropped for this reason.
    #[must_use]
    pub const fn counter(&self) -> Counter {
        match self {
            Self::ReadPacket(_) => Counter::SessionUpdateReadPacketFailed,
            Self::BuyerNotFound { .. } => Counter::SessionUpdateBuyerNotFound,
            Self::BuyerNotLive { .. } => Counter::SessionUpdateBuyerNotLive,
            Self::SignatureCheckFailed { .. } => Counter::SessionUpdateSignatureCheckFailed,
            Self::BadSessionData(_) => Counter::SessionUpdateBadSessionData,
            Self::BadSessionId { .. } => Counter::SessionUpdateBadSessionId,
            Self::BadSliceNumber { .. } => Counter::SessionUpdateBadSliceNumber,
            Self::WriteResponse(_) => Counter::SessionUpdateWriteResponseFailed,
        }
    }
}

/// Reasons a server init, server update, match data or relay update is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("could not read packet: {0}")]
    ReadPacket(#[source] WireError),

    #[error("buyer {buyer_id:016x} not found")]
    BuyerNotFound { buyer_id: u64 },

    #[error("signature check failed for buyer {buyer_id:016x}")]
    SignatureCheckFailed { buyer_id: u64 },

    #[error("no relay registered at {address}")]
    UnknownRelay { address: SocketAddr },

    #[error("relay {relay_id:016x} presented a bad token")]
    BadRelayToken { relay_id: u64 },

    #[error("could not write response: {0}")]
    WriteResponse(#[source] WireError),
}

/// Failures of a downstream biller or of the billing queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BillingError {
    /// The biller refused the entry; retrying will not help.
    #[error("billing entry rejected: {0}")]
    Rejected(String),

    /// The biller could not be reached; the entry may be retried.
    #[error("biller unavailable: {0}")]
    Unavailable(String),

    #[error("billing queue is full")]
    QueueFull,

    #[error("billing worker has shut down")]
    Disconnected,
}

impl BillingError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// IP geolocation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocateError {
    #[error("no location known for {0}")]
    NotFound(IpAddr),

    #[error("locator unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream::BitError;

    #[test]
    fn session_errors_map_to_counters() {
        let err = SessionUpdateError::BadSliceNumber {
            expected: 5,
            found: 9,
        };
        assert_eq!(err.counter(), Counter::SessionUpdateBadSliceNumber);
        assert!(err.to_string().contains("expected 5"));

        let err = SessionUpdateError::ReadPacket(WireError::Stream(BitError::InvalidUtf8));
        assert_eq!(err.counter(), Counter::SessionUpdateReadPacketFailed);
    }

    #[test]
    fn only_unavailable_billing_errors_retry() {
        assert!(BillingError::Unavailable("timeout".into()).is_retryable());
        assert!(!BillingError::Rejected("bad entry".into()).is_retryable());
        assert!(!BillingError::QueueFull.is_retryable());
    }

    #[test]
    fn errors_are_std_errors() {
        fn assert_error<E: std::error::Error + Send + Sync + 'static>() {}
        assert_error::<SessionUpdateError>();
        assert_error::<HandlerError>();
        assert_error::<BillingError>();
        assert_error::<LocateError>();
    }
}
