//! Route tokens.
//!
//! A route is a chain client -> relays -> server. Every hop receives one token
//! encrypted for its own route public key, so a relay only learns where to
//! forward and for how long.
//!
//! # Design Principles
//!
//! - **Fixed sizes** - Plain and encrypted tokens have constant lengths, so a
//!   response's token block is exactly `num_tokens * size` bytes.
//! - **Authenticated** - X25519 agreement, a BLAKE3-derived key and
//!   XChaCha20-Poly1305 with a random 24-byte nonce prefixed to the output.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bitstream::{BitError, ADDRESS_IPV4, ADDRESS_IPV6, ADDRESS_NONE};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{LimitKind, WireError, WireResult};
use crate::limits::MAX_TOKENS;

/// Context string for token key derivation. Changing it invalidates every
/// token in flight.
const KDF_CONTEXT: &str = "nextroute 2024-01-01 route token encryption";

const NONCE_BYTES: usize = 24;
const TAG_BYTES: usize = 16;
const ADDRESS_BYTES: usize = 1 + 16 + 2;

/// Bytes of the per-route private key shared by every hop.
pub const ROUTE_PRIVATE_KEY_BYTES: usize = 32;

/// Plain next route token length.
pub const NEXT_ROUTE_TOKEN_BYTES: usize = 8 + 8 + 1 + 4 + 4 + ADDRESS_BYTES + ROUTE_PRIVATE_KEY_BYTES;

/// Plain continue route token length.
pub const CONTINUE_ROUTE_TOKEN_BYTES: usize = 8 + 8 + 1;

/// Encrypted next route token length.
pub const ENCRYPTED_NEXT_ROUTE_TOKEN_BYTES: usize = NONCE_BYTES + NEXT_ROUTE_TOKEN_BYTES + TAG_BYTES;

/// Encrypted continue route token length.
pub const ENCRYPTED_CONTINUE_ROUTE_TOKEN_BYTES: usize =
    NONCE_BYTES + CONTINUE_ROUTE_TOKEN_BYTES + TAG_BYTES;

/// Token establishing a new route through one hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NextRouteToken {
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub session_version: u8,
    pub kbps_up: u32,
    pub kbps_down: u32,
    /// Where this hop forwards; `None` for the last hop.
    pub next_address: Option<SocketAddr>,
    pub private_key: [u8; ROUTE_PRIVATE_KEY_BYTES],
}

/// Token extending an existing route through one hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContinueRouteToken {
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub session_version: u8,
}

fn write_address(address: Option<SocketAddr>, out: &mut [u8]) {
    out.fill(0);
    match address {
        None => out[0] = ADDRESS_NONE as u8,
        Some(SocketAddr::V4(v4)) => {
            out[0] = ADDRESS_IPV4 as u8;
            out[1..5].copy_from_slice(&v4.ip().octets());
            out[17..19].copy_from_slice(&v4.port().to_le_bytes());
        }
        Some(SocketAddr::V6(v6)) => {
            out[0] = ADDRESS_IPV6 as u8;
            out[1..17].copy_from_slice(&v6.ip().octets());
            out[17..19].copy_from_slice(&v6.port().to_le_bytes());
        }
    }
}

fn read_address(data: &[u8]) -> WireResult<Option<SocketAddr>> {
    let port = u16::from_le_bytes([data[17], data[18]]);
    match u32::from(data[0]) {
        ADDRESS_NONE => Ok(None),
        ADDRESS_IPV4 => {
            let ip = Ipv4Addr::new(data[1], data[2], data[3], data[4]);
            Ok(Some(SocketAddr::new(IpAddr::V4(ip), port)))
        }
        ADDRESS_IPV6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[1..17]);
            Ok(Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)))
        }
        tag => Err(BitError::InvalidAddressType { tag }.into()),
    }
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn token_cipher(secret: &StaticSecret, peer: &PublicKey) -> WireResult<XChaCha20Poly1305> {
    let shared = secret.diffie_hellman(peer);
    let key = blake3::derive_key(KDF_CONTEXT, shared.as_bytes());
    XChaCha20Poly1305::new_from_slice(&key).map_err(|_| WireError::InvalidKey)
}

fn seal(plain: &[u8], sender: &StaticSecret, recipient: &PublicKey, out: &mut [u8]) -> WireResult<()> {
    let cipher = token_cipher(sender, recipient)?;
    let mut nonce = [0u8; NONCE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), plain)
        .map_err(|_| WireError::TokenEncryptFailed)?;
    if NONCE_BYTES + sealed.len() != out.len() {
        return Err(WireError::TokenEncryptFailed);
    }
    out[..NONCE_BYTES].copy_from_slice(&nonce);
    out[NONCE_BYTES..].copy_from_slice(&sealed);
    Ok(())
}

fn open(
    sealed: &[u8],
    expected_len: usize,
    recipient: &StaticSecret,
    sender: &PublicKey,
) -> WireResult<Vec<u8>> {
    if sealed.len() != NONCE_BYTES + expected_len + TAG_BYTES {
        return Err(WireError::TokenDecryptFailed);
    }
    let cipher = token_cipher(recipient, sender)?;
    let (nonce, body) = sealed.split_at(NONCE_BYTES);
    cipher
        .decrypt(XNonce::from_slice(nonce), body)
        .map_err(|_| WireError::TokenDecryptFailed)
}

impl NextRouteToken {
    /// Plain little-endian layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; NEXT_ROUTE_TOKEN_BYTES] {
        let mut out = [0u8; NEXT_ROUTE_TOKEN_BYTES];
        out[0..8].copy_from_slice(&self.expire_timestamp.to_le_bytes());
        out[8..16].copy_from_slice(&self.session_id.to_le_bytes());
        out[16] = self.session_version;
        out[17..21].copy_from_slice(&self.kbps_up.to_le_bytes());
        out[21..25].copy_from_slice(&self.kbps_down.to_le_bytes());
        write_address(self.next_address, &mut out[25..25 + ADDRESS_BYTES]);
        out[25 + ADDRESS_BYTES..].copy_from_slice(&self.private_key);
        out
    }

    pub fn from_bytes(data: &[u8]) -> WireResult<Self> {
        if data.len() != NEXT_ROUTE_TOKEN_BYTES {
            return Err(WireError::TokenDecryptFailed);
        }
        let mut private_key = [0u8; ROUTE_PRIVATE_KEY_BYTES];
        private_key.copy_from_slice(&data[25 + ADDRESS_BYTES..]);
        Ok(Self {
            expire_timestamp: read_u64(data, 0),
            session_id: read_u64(data, 8),
            session_version: data[16],
            kbps_up: read_u32(data, 17),
            kbps_down: read_u32(data, 21),
            next_address: read_address(&data[25..25 + ADDRESS_BYTES])?,
            private_key,
        })
    }

    /// Encrypts for `recipient` using the backend's secret.
    pub fn encrypt(
        &self,
        backend_secret: &StaticSecret,
        recipient: &PublicKey,
    ) -> WireResult<[u8; ENCRYPTED_NEXT_ROUTE_TOKEN_BYTES]> {
        let mut out = [0u8; ENCRYPTED_NEXT_ROUTE_TOKEN_BYTES];
        seal(&self.to_bytes(), backend_secret, recipient, &mut out)?;
        Ok(out)
    }

    /// Decrypts a token addressed to `recipient_secret`.
    pub fn decrypt(
        data: &[u8],
        recipient_secret: &StaticSecret,
        backend_public: &PublicKey,
    ) -> WireResult<Self> {
        let plain = open(data, NEXT_ROUTE_TOKEN_BYTES, recipient_secret, backend_public)?;
        Self::from_bytes(&plain)
    }
}

impl ContinueRouteToken {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; CONTINUE_ROUTE_TOKEN_BYTES] {
        let mut out = [0u8; CONTINUE_ROUTE_TOKEN_BYTES];
        out[0..8].copy_from_slice(&self.expire_timestamp.to_le_bytes());
        out[8..16].copy_from_slice(&self.session_id.to_le_bytes());
        out[16] = self.session_version;
        out
    }

    pub fn from_bytes(data: &[u8]) -> WireResult<Self> {
        if data.len() != CONTINUE_ROUTE_TOKEN_BYTES {
            return Err(WireError::TokenDecryptFailed);
        }
        Ok(Self {
            expire_timestamp: read_u64(data, 0),
            session_id: read_u64(data, 8),
            session_version: data[16],
        })
    }

    pub fn encrypt(
        &self,
        backend_secret: &StaticSecret,
        recipient: &PublicKey,
    ) -> WireResult<[u8; ENCRYPTED_CONTINUE_ROUTE_TOKEN_BYTES]> {
        let mut out = [0u8; ENCRYPTED_CONTINUE_ROUTE_TOKEN_BYTES];
        seal(&self.to_bytes(), backend_secret, recipient, &mut out)?;
        Ok(out)
    }

    pub fn decrypt(
        data: &[u8],
        recipient_secret: &StaticSecret,
        backend_public: &PublicKey,
    ) -> WireResult<Self> {
        let plain = open(
            data,
            CONTINUE_ROUTE_TOKEN_BYTES,
            recipient_secret,
            backend_public,
        )?;
        Self::from_bytes(&plain)
    }
}

fn check_token_count(tokens: usize, keys: usize) -> WireResult<()> {
    if tokens > MAX_TOKENS {
        return Err(WireError::LimitsExceeded {
            kind: LimitKind::Tokens,
            limit: MAX_TOKENS,
            actual: tokens,
        });
    }
    if tokens != keys {
        return Err(WireError::InvalidKey);
    }
    Ok(())
}

/// Encrypts one next token per hop into a contiguous block.
pub fn encrypt_next_route_tokens(
    tokens: &[NextRouteToken],
    recipients: &[PublicKey],
    backend_secret: &StaticSecret,
) -> WireResult<Vec<u8>> {
    check_token_count(tokens.len(), recipients.len())?;
    let mut out = Vec::with_capacity(tokens.len() * ENCRYPTED_NEXT_ROUTE_TOKEN_BYTES);
    for (token, recipient) in tokens.iter().zip(recipients) {
        out.extend_from_slice(&token.encrypt(backend_secret, recipient)?);
    }
    Ok(out)
}

/// Encrypts one continue token per hop into a contiguous block.
pub fn encrypt_continue_route_tokens(
    tokens: &[ContinueRouteToken],
    recipients: &[PublicKey],
    backend_secret: &StaticSecret,
) -> WireResult<Vec<u8>> {
    check_token_count(tokens.len(), recipients.len())?;
    let mut out = Vec::with_capacity(tokens.len() * ENCRYPTED_CONTINUE_ROUTE_TOKEN_BYTES);
    for (token, recipient) in tokens.iter().zip(recipients) {
        out.extend_from_slice(&token.encrypt(backend_secret, recipient)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(seed: u8) -> (StaticSecret, PublicKey) {
        let secret = StaticSecret::from([seed; 32]);
        let public = PublicKey::from(&secret);
        (secret, public)
    }

    fn next_token() -> NextRouteToken {
        NextRouteToken {
            expire_timestamp: 1_700_000_030,
            session_id: 0xDEAD_BEEF,
            session_version: 3,
            kbps_up: 256,
            kbps_down: 512,
            next_address: Some("10.2.3.4:40000".parse().unwrap()),
            private_key: [0x42; ROUTE_PRIVATE_KEY_BYTES],
        }
    }

    #[test]
    fn sizes() {
        assert_eq!(NEXT_ROUTE_TOKEN_BYTES, 76);
        assert_eq!(ENCRYPTED_NEXT_ROUTE_TOKEN_BYTES, 116);
        assert_eq!(CONTINUE_ROUTE_TOKEN_BYTES, 17);
        assert_eq!(ENCRYPTED_CONTINUE_ROUTE_TOKEN_BYTES, 57);
    }

    #[test]
    fn plain_layout_roundtrip_with_ipv6() {
        let mut token = next_token();
        token.next_address = Some("[2001:db8::7]:1234".parse().unwrap());
        assert_eq!(NextRouteToken::from_bytes(&token.to_bytes()).unwrap(), token);
        token.next_address = None;
        assert_eq!(NextRouteToken::from_bytes(&token.to_bytes()).unwrap(), token);
    }

    #[test]
    fn encrypt_decrypt_next() {
        let (backend_secret, backend_public) = keypair(1);
        let (relay_secret, relay_public) = keypair(2);
        let sealed = next_token().encrypt(&backend_secret, &relay_public).unwrap();
        let opened = NextRouteToken::decrypt(&sealed, &relay_secret, &backend_public).unwrap();
        assert_eq!(opened, next_token());
    }

    #[test]
    fn wrong_recipient_cannot_decrypt() {
        let (backend_secret, backend_public) = keypair(1);
        let (_, relay_public) = keypair(2);
        let (other_secret, _) = keypair(3);
        let sealed = next_token().encrypt(&backend_secret, &relay_public).unwrap();
        assert_eq!(
            NextRouteToken::decrypt(&sealed, &other_secret, &backend_public),
            Err(WireError::TokenDecryptFailed)
        );
    }

    #[test]
    fn tampered_token_is_rejected() {
        let (backend_secret, backend_public) = keypair(1);
        let (relay_secret, relay_public) = keypair(2);
        let token = ContinueRouteToken {
            expire_timestamp: 10,
            session_id: 20,
            session_version: 1,
        };
        let mut sealed = token.encrypt(&backend_secret, &relay_public).unwrap();
        assert_eq!(
            ContinueRouteToken::decrypt(&sealed, &relay_secret, &backend_public).unwrap(),
            token
        );
        sealed[30] ^= 1;
        assert!(ContinueRouteToken::decrypt(&sealed, &relay_secret, &backend_public).is_err());
    }

    #[test]
    fn token_block_is_count_times_size() {
        let (backend_secret, _) = keypair(1);
        let recipients: Vec<PublicKey> = (2..6).map(|seed| keypair(seed).1).collect();
        let tokens = vec![next_token(); 4];
        let block = encrypt_next_route_tokens(&tokens, &recipients, &backend_secret).unwrap();
        assert_eq!(block.len(), 4 * ENCRYPTED_NEXT_ROUTE_TOKEN_BYTES);
    }

    #[test]
    fn token_block_limits() {
        let (backend_secret, _) = keypair(1);
        let recipients: Vec<PublicKey> = (0..8).map(|seed| keypair(seed).1).collect();
        let tokens = vec![ContinueRouteToken::default(); 8];
        let err = encrypt_continue_route_tokens(&tokens, &recipients, &backend_secret).unwrap_err();
        assert!(matches!(err, WireError::LimitsExceeded { kind: LimitKind::Tokens, .. }));

        let err =
            encrypt_continue_route_tokens(&tokens[..2], &recipients[..1], &backend_secret).unwrap_err();
        assert_eq!(err, WireError::InvalidKey);
    }
}
