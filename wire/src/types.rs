//! Enumerations and flag sets shared by several packets.

use crate::error::WireError;

/// Leading type byte of SDK packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum PacketType {
    ServerUpdate = 220,
    SessionUpdate = 221,
    SessionResponse = 222,
    ServerInitRequest = 223,
    ServerInitResponse = 224,
    MatchDataRequest = 225,
    MatchDataResponse = 226,
}

impl PacketType {
    /// Parses a packet type from its leading byte.
    pub fn parse(byte: u8) -> Result<Self, WireError> {
        match byte {
            220 => Ok(Self::ServerUpdate),
            221 => Ok(Self::SessionUpdate),
            222 => Ok(Self::SessionResponse),
            223 => Ok(Self::ServerInitRequest),
            224 => Ok(Self::ServerInitResponse),
            225 => Ok(Self::MatchDataRequest),
            226 => Ok(Self::MatchDataResponse),
            found => Err(WireError::UnknownPacketType { found }),
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` for packets sent by the backend.
    #[must_use]
    pub const fn is_response(self) -> bool {
        matches!(
            self,
            Self::SessionResponse | Self::ServerInitResponse | Self::MatchDataResponse
        )
    }
}

/// Routing decision returned to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i32)]
pub enum RouteType {
    #[default]
    Direct = 0,
    New = 1,
    Continue = 2,
}

impl RouteType {
    pub const MAX: i32 = Self::Continue as i32;

    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Direct),
            1 => Some(Self::New),
            2 => Some(Self::Continue),
            _ => None,
        }
    }
}

/// Client platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i32)]
pub enum PlatformType {
    #[default]
    Unknown = 0,
    Windows = 1,
    Mac = 2,
    Linux = 3,
    Switch = 4,
    Ps4 = 5,
    Ios = 6,
    XboxOne = 7,
    XboxSeriesX = 8,
    Ps5 = 9,
    Gdk = 10,
}

impl PlatformType {
    /// Largest platform value understood by SDKs older than 4.0.5.
    pub const MAX_LEGACY: i32 = Self::XboxSeriesX as i32;
    /// Largest platform value from 4.0.5.
    pub const MAX: i32 = Self::Gdk as i32;

    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Unknown,
            1 => Self::Windows,
            2 => Self::Mac,
            3 => Self::Linux,
            4 => Self::Switch,
            5 => Self::Ps4,
            6 => Self::Ios,
            7 => Self::XboxOne,
            8 => Self::XboxSeriesX,
            9 => Self::Ps5,
            10 => Self::Gdk,
            _ => return None,
        })
    }
}

/// Client connection type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i32)]
pub enum ConnectionType {
    #[default]
    Unknown = 0,
    Wired = 1,
    Wifi = 2,
    Cellular = 3,
}

impl ConnectionType {
    pub const MAX: i32 = Self::Cellular as i32;

    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Wired),
            2 => Some(Self::Wifi),
            3 => Some(Self::Cellular),
            _ => None,
        }
    }
}

/// Reasons a client fell back to direct, one bit each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FallbackFlags(u32);

impl FallbackFlags {
    pub const BAD_ROUTE_TOKEN: u32 = 1 << 0;
    pub const NO_NEXT_ROUTE_TO_CONTINUE: u32 = 1 << 1;
    pub const PREVIOUS_UPDATE_STILL_PENDING: u32 = 1 << 2;
    pub const BAD_CONTINUE_TOKEN: u32 = 1 << 3;
    pub const ROUTE_EXPIRED: u32 = 1 << 4;
    pub const ROUTE_REQUEST_TIMED_OUT: u32 = 1 << 5;
    pub const CONTINUE_REQUEST_TIMED_OUT: u32 = 1 << 6;
    pub const CLIENT_TIMED_OUT: u32 = 1 << 7;
    pub const UPGRADE_RESPONSE_TIMED_OUT: u32 = 1 << 8;
    pub const ROUTE_UPDATE_TIMED_OUT: u32 = 1 << 9;
    pub const DIRECT_PONG_TIMED_OUT: u32 = 1 << 10;
    pub const NEXT_PONG_TIMED_OUT: u32 = 1 << 11;

    /// Number of defined reasons; also the wire width of the field.
    pub const COUNT: u32 = 12;

    const KNOWN_MASK: u32 = (1 << Self::COUNT) - 1;

    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    /// Returns `true` if any bit outside the defined reasons is set.
    #[must_use]
    pub const fn has_unknown_bits(self) -> bool {
        self.0 & !Self::KNOWN_MASK != 0
    }

    /// Iterates the indices (0-based) of the defined reasons that are set.
    pub fn reasons(self) -> impl Iterator<Item = u32> {
        (0..Self::COUNT).filter(move |bit| self.0 & (1 << bit) != 0)
    }
}
