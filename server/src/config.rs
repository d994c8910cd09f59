use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use backend::{BackendConfig, BackendKeys, RetryPolicy};
use serde::Deserialize;

/// Server settings, read from a JSON file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket game servers send SDK packets to.
    pub bind: SocketAddr,
    /// Address game servers see for `bind`, used in SDK5 framing.
    pub public_address: Option<SocketAddr>,
    /// Socket relays send updates to. Relay updates are ignored when unset.
    pub relay_bind: Option<SocketAddr>,
    pub workers: usize,
    /// Datagrams buffered between the receive loop and the workers.
    pub queue_depth: usize,
    /// Hex-encoded ed25519 secret used to sign responses.
    pub signing_key_path: PathBuf,
    /// Hex-encoded x25519 secret used to encrypt route tokens.
    pub route_key_path: PathBuf,
    pub database_path: PathBuf,
    pub route_matrix_path: PathBuf,
    pub locator_path: Option<PathBuf>,
    pub reload_interval_secs: u64,
    pub magic_rotation_secs: u64,
    pub billing_queue_size: usize,
    pub billing_max_retries: u32,
    /// Billing entries are appended here as JSON lines. Logged when unset.
    pub billing_path: Option<PathBuf>,
    pub backend: BackendConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 40000)),
            public_address: None,
            relay_bind: None,
            workers: 4,
            queue_depth: 4096,
            signing_key_path: PathBuf::from("keys/backend_signing.hex"),
            route_key_path: PathBuf::from("keys/backend_route.hex"),
            database_path: PathBuf::from("database.json"),
            route_matrix_path: PathBuf::from("route_matrix.json"),
            locator_path: None,
            reload_interval_secs: 10,
            magic_rotation_secs: 60,
            billing_queue_size: 8192,
            billing_max_retries: 3,
            billing_path: None,
            backend: BackendConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&contents).context("parse config json")
    }

    /// Address SDK5 framing is computed against.
    pub fn public_address(&self) -> SocketAddr {
        self.public_address.unwrap_or(self.bind)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs.max(1))
    }

    pub fn magic_rotation(&self) -> Duration {
        Duration::from_secs(self.magic_rotation_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.billing_max_retries,
            ..RetryPolicy::default()
        }
    }

    pub fn load_keys(&self) -> Result<BackendKeys> {
        let signing = fs::read_to_string(&self.signing_key_path)
            .with_context(|| format!("read signing key {}", self.signing_key_path.display()))?;
        let route = fs::read_to_string(&self.route_key_path)
            .with_context(|| format!("read route key {}", self.route_key_path.display()))?;
        BackendKeys::from_hex(&signing, &route).context("parse backend keys")
    }
}
