//! Error types for wire format operations.

use std::fmt;

use bitstream::BitError;

use crate::version::SdkVersion;

/// Result type for wire format operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors raised while encoding, decoding or authenticating packets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum WireError {
    /// The underlying bit stream failed.
    #[error("stream error: {0}")]
    Stream(#[from] BitError),

    /// Packet is too small to contain the required framing.
    #[error("packet too small: {actual} bytes, need at least {required}")]
    PacketTooSmall { actual: usize, required: usize },

    /// Packet exceeds the maximum size accepted for its kind.
    #[error("packet too large: {actual} bytes, maximum is {max}")]
    PacketTooLarge { actual: usize, max: usize },

    /// Leading type byte does not name a known packet.
    #[error("unknown packet type: {found}")]
    UnknownPacketType { found: u8 },

    /// Leading type byte names a different packet than the one requested.
    #[error("unexpected packet type: expected {expected}, found {found}")]
    UnexpectedPacketType { expected: u8, found: u8 },

    /// SDK version older than the minimum supported.
    #[error("unsupported sdk version {found}, minimum is {minimum}")]
    UnsupportedSdkVersion {
        found: SdkVersion,
        minimum: SdkVersion,
    },

    /// Relay update or session data version outside the supported window.
    #[error("unsupported envelope version {found}")]
    UnsupportedEnvelopeVersion { found: u32 },

    /// A required address was absent.
    #[error("required address is missing")]
    MissingAddress,

    /// Ed25519 signature did not verify.
    #[error("signature check failed")]
    SignatureCheckFailed,

    /// Chonkle/pittle value ranges are wrong.
    #[error("packet rejected by basic filter")]
    BasicFilterFailed,

    /// Chonkle/pittle do not match the magic and address tuple.
    #[error("packet rejected by advanced filter")]
    AdvancedFilterFailed,

    /// Key bytes could not be parsed.
    #[error("invalid key material")]
    InvalidKey,

    /// Token could not be encrypted.
    #[error("route token encryption failed")]
    TokenEncryptFailed,

    /// Token could not be decrypted or authenticated.
    #[error("route token decryption failed")]
    TokenDecryptFailed,

    /// A bounded list exceeded its limit.
    #[error("{kind} limit exceeded: {actual} > {limit}")]
    LimitsExceeded {
        kind: LimitKind,
        limit: usize,
        actual: usize,
    },
}

/// Bounded lists checked outside the stream's own range checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    PacketBytes,
    RouteRelays,
    Tokens,
    TokenBytes,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PacketBytes => "packet bytes",
            Self::RouteRelays => "route relays",
            Self::Tokens => "token count",
            Self::TokenBytes => "token bytes",
        };
        write!(f, "{name}")
    }
}
