//! IP geolocation seam.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::Deserialize;

use crate::error::LocateError;
use crate::types::Location;

/// Resolves a client address to a location.
pub trait IpLocator: Send + Sync {
    fn locate(&self, ip: IpAddr) -> Result<Location, LocateError>;
}

/// Table-driven locator, loaded from JSON or built in tests.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StaticLocator {
    /// Returned for addresses missing from `entries`.
    pub default: Option<Location>,
    pub entries: HashMap<IpAddr, Location>,
}

impl StaticLocator {
    #[must_use]
    pub fn with_default(location: Location) -> Self {
        Self {
            default: Some(location),
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn insert(mut self, ip: IpAddr, location: Location) -> Self {
        self.entries.insert(ip, location);
        self
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl IpLocator for StaticLocator {
    fn locate(&self, ip: IpAddr) -> Result<Location, LocateError> {
        self.entries
            .get(&ip)
            .copied()
            .or(self.default)
            .ok_or(LocateError::NotFound(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_then_default() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let other: IpAddr = "5.6.7.8".parse().unwrap();
        let locator = StaticLocator::with_default(Location::new(1.0, 1.0, 1))
            .insert(ip, Location::new(2.0, 2.0, 2));
        assert_eq!(locator.locate(ip).unwrap().asn, 2);
        assert_eq!(locator.locate(other).unwrap().asn, 1);
    }

    #[test]
    fn empty_locator_fails() {
        let ip: IpAddr = "::1".parse().unwrap();
        assert_eq!(
            StaticLocator::default().locate(ip),
            Err(LocateError::NotFound(ip))
        );
    }

    #[test]
    fn from_json() {
        let locator = StaticLocator::from_json(
            r#"{ "entries": { "10.0.0.1": { "latitude": 3.0, "longitude": 4.0, "asn": 5 } } }"#,
        )
        .unwrap();
        let location = locator.locate("10.0.0.1".parse().unwrap()).unwrap();
        assert_eq!(location, Location::new(3.0, 4.0, 5));
        assert!(locator.locate("10.0.0.2".parse().unwrap()).is_err());
    }
}
