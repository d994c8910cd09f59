//! Backend key material.

use ed25519_dalek::{SigningKey, VerifyingKey};
use x25519_dalek::{PublicKey, StaticSecret};

/// Errors parsing key material.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected a 32-byte key, got {0} bytes")]
    Length(usize),
}

/// Keys the backend signs responses and encrypts route tokens with.
#[derive(Clone)]
pub struct BackendKeys {
    pub signing_key: SigningKey,
    pub route_secret: StaticSecret,
}

impl std::fmt::Debug for BackendKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendKeys")
            .field("verifying_key", &hex::encode(self.verifying_key().as_bytes()))
            .field("route_public_key", &hex::encode(self.route_public_key().as_bytes()))
            .finish_non_exhaustive()
    }
}

fn parse_key(text: &str) -> Result<[u8; 32], KeyError> {
    let bytes = hex::decode(text.trim())?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| KeyError::Length(bytes.len()))
}

impl BackendKeys {
    #[must_use]
    pub fn from_bytes(signing_key: &[u8; 32], route_secret: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(signing_key),
            route_secret: StaticSecret::from(route_secret),
        }
    }

    /// Parses two hex-encoded 32-byte secrets.
    pub fn from_hex(signing_key: &str, route_secret: &str) -> Result<Self, KeyError> {
        Ok(Self::from_bytes(
            &parse_key(signing_key)?,
            parse_key(route_secret)?,
        ))
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    #[must_use]
    pub fn route_public_key(&self) -> PublicKey {
        PublicKey::from(&self.route_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_keys() {
        let signing = "01".repeat(32);
        let route = "02".repeat(32);
        let keys = BackendKeys::from_hex(&signing, &format!("{route}\n")).unwrap();
        assert_eq!(keys.signing_key.to_bytes(), [1; 32]);
        assert_eq!(keys.route_secret.to_bytes(), [2; 32]);
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(matches!(
            BackendKeys::from_hex("zz", &"02".repeat(32)),
            Err(KeyError::Hex(_))
        ));
        assert_eq!(
            BackendKeys::from_hex(&"01".repeat(31), &"02".repeat(32)).unwrap_err(),
            KeyError::Length(31)
        );
    }

    #[test]
    fn debug_hides_secrets() {
        let keys = BackendKeys::from_bytes(&[7; 32], [9; 32]);
        let text = format!("{keys:?}");
        assert!(!text.contains(&hex::encode([7u8; 32])));
        assert!(!text.contains(&hex::encode([9u8; 32])));
    }
}
