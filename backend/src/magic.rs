//! Rotating network magic.
//!
//! SDK5 packets are stamped with a chonkle derived from an 8-byte magic that
//! the backend rotates periodically. Servers and relays learn the upcoming,
//! current and previous values, so a packet stamped with any of the three
//! is accepted while a rotation propagates.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use wire::limits::MAGIC_BYTES;

pub type Magic = [u8; MAGIC_BYTES];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MagicValues {
    pub upcoming: Magic,
    pub current: Magic,
    pub previous: Magic,
}

impl MagicValues {
    /// Fresh random values.
    #[must_use]
    pub fn generate<R: RngCore>(rng: &mut R) -> Self {
        let mut values = Self::default();
        rng.fill_bytes(&mut values.upcoming);
        rng.fill_bytes(&mut values.current);
        rng.fill_bytes(&mut values.previous);
        values
    }

    /// Shifts every value back one place and draws a new upcoming value.
    #[must_use]
    pub fn rotate<R: RngCore>(&self, rng: &mut R) -> Self {
        let mut upcoming = [0; MAGIC_BYTES];
        rng.fill_bytes(&mut upcoming);
        Self {
            upcoming,
            current: self.upcoming,
            previous: self.current,
        }
    }

    /// Values accepted on incoming packets, most likely first.
    #[must_use]
    pub const fn candidates(&self) -> [Magic; 3] {
        [self.current, self.upcoming, self.previous]
    }
}
