//! SDK protocol version.

use std::fmt;

use bitstream::Stream;

use crate::error::{WireError, WireResult};

/// SDK version triple carried at the start of every session-oriented packet.
///
/// Ordering is lexicographic over (major, minor, patch). Field presence is
/// always gated on `version >= SdkVersion::new(..)`, never on packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SdkVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl SdkVersion {
    /// Oldest version accepted by the backend.
    pub const MINIMUM: Self = Self::new(4, 0, 0);

    /// Newest version this crate knows how to encode.
    pub const CURRENT: Self = Self::new(4, 0, 6);

    #[must_use]
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns `true` if this version is at least `major.minor.patch`.
    #[must_use]
    pub const fn at_least(self, major: u8, minor: u8, patch: u8) -> bool {
        if self.major != major {
            return self.major > major;
        }
        if self.minor != minor {
            return self.minor > minor;
        }
        self.patch >= patch
    }

    /// Returns `true` if the backend accepts this version.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        self.at_least(Self::MINIMUM.major, Self::MINIMUM.minor, Self::MINIMUM.patch)
    }

    /// Serializes the triple as three 8-bit fields.
    pub fn serialize<S: Stream>(&mut self, stream: &mut S) {
        for part in [&mut self.major, &mut self.minor, &mut self.patch] {
            let mut value = u32::from(*part);
            stream.serialize_bits(&mut value, 8);
            *part = value as u8;
        }
    }
}

/// Serializes a packet's leading version and rejects versions older than
/// [`SdkVersion::MINIMUM`] in either direction.
pub(crate) fn serialize_sdk_version<S: Stream>(
    version: &mut SdkVersion,
    stream: &mut S,
) -> WireResult<()> {
    version.serialize(stream);
    stream.result()?;
    if !version.is_supported() {
        return Err(WireError::UnsupportedSdkVersion {
            found: *version,
            minimum: SdkVersion::MINIMUM,
        });
    }
    Ok(())
}

impl fmt::Display for SdkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream::{ReadStream, WriteStream};

    #[test]
    fn ordering_is_lexicographic() {
        assert!(SdkVersion::new(4, 0, 5) > SdkVersion::new(4, 0, 4));
        assert!(SdkVersion::new(4, 1, 0) > SdkVersion::new(4, 0, 9));
        assert!(SdkVersion::new(5, 0, 0) > SdkVersion::new(4, 9, 9));
    }

    #[test]
    fn at_least_agrees_with_ord() {
        let versions = [
            SdkVersion::new(3, 9, 9),
            SdkVersion::new(4, 0, 0),
            SdkVersion::new(4, 0, 3),
            SdkVersion::new(4, 0, 6),
            SdkVersion::new(4, 1, 0),
        ];
        for a in versions {
            for b in versions {
                assert_eq!(a.at_least(b.major, b.minor, b.patch), a >= b, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn minimum_support() {
        assert!(!SdkVersion::new(3, 4, 7).is_supported());
        assert!(SdkVersion::MINIMUM.is_supported());
        assert!(SdkVersion::CURRENT.is_supported());
    }

    #[test]
    fn serialize_roundtrip() {
        let mut stream = WriteStream::with_capacity(8);
        let mut version = SdkVersion::new(4, 0, 5);
        version.serialize(&mut stream);
        let bytes = stream.finish().unwrap();
        assert_eq!(bytes, vec![4, 0, 5]);

        let mut stream = ReadStream::new(&bytes);
        let mut decoded = SdkVersion::default();
        decoded.serialize(&mut stream);
        assert_eq!(decoded, SdkVersion::new(4, 0, 5));
    }
}
