use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use backend::{Database, RouteMatrix, StaticLocator};
use rand::thread_rng;
use tracing::{info, warn};

use crate::state::State;

pub fn load_database(path: &Path) -> Result<Database> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("read database {}", path.display()))?;
    Database::from_json(&json).with_context(|| format!("parse database {}", path.display()))
}

pub fn load_route_matrix(path: &Path) -> Result<RouteMatrix> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("read route matrix {}", path.display()))?;
    RouteMatrix::from_json(&json)
        .with_context(|| format!("parse route matrix {}", path.display()))
}

pub fn load_locator(path: Option<&Path>) -> Result<StaticLocator> {
    let Some(path) = path else {
        return Ok(StaticLocator::default());
    };
    let json =
        fs::read_to_string(path).with_context(|| format!("read locator {}", path.display()))?;
    StaticLocator::from_json(&json).with_context(|| format!("parse locator {}", path.display()))
}

pub struct ReloadPaths {
    pub database: PathBuf,
    pub route_matrix: PathBuf,
}

/// Reloads the database and route matrix every `interval`.
///
/// A file that fails to load leaves the previous snapshot in place.
pub fn spawn_reloader(
    paths: ReloadPaths,
    interval: Duration,
    state: Arc<State>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("reloader".into())
        .spawn(move || loop {
            thread::sleep(interval);
            reload_once(&paths, &state);
        })
}

fn reload_once(paths: &ReloadPaths, state: &State) {
    match load_database(&paths.database) {
        Ok(database) => {
            let (buyers, sellers, datacenters, relays) = database.counts();
            state.database.store(database);
            info!(buyers, sellers, datacenters, relays, "database reloaded");
        }
        Err(err) => warn!(error = %format!("{err:#}"), "keeping previous database"),
    }
    match load_route_matrix(&paths.route_matrix) {
        Ok(matrix) => {
            let relays = matrix.num_relays();
            let created_at = matrix.created_at();
            state.route_matrix.store(matrix);
            info!(relays, created_at, "route matrix reloaded");
        }
        Err(err) => warn!(error = %format!("{err:#}"), "keeping previous route matrix"),
    }

    let snapshot = state.metrics.snapshot();
    for (name, value) in snapshot.non_zero() {
        info!(counter = name, value, "metrics");
    }
}

/// Rotates the magic values every `interval`.
pub fn spawn_magic_rotation(interval: Duration, state: Arc<State>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("magic-rotation".into())
        .spawn(move || loop {
            thread::sleep(interval);
            let next = state.magic.load().rotate(&mut thread_rng());
            state.magic.store(next);
            info!("magic rotated");
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("nextroute-{}-{name}", std::process::id()))
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let state = crate::state::tests::state();
        let before = state.database.load();
        let paths = ReloadPaths {
            database: temp_path("missing-database.json"),
            route_matrix: temp_path("missing-matrix.json"),
        };
        reload_once(&paths, &state);
        assert!(Arc::ptr_eq(&before, &state.database.load()));
    }

    #[test]
    fn reload_replaces_snapshot() {
        let state = crate::state::tests::state();
        let database = temp_path("database.json");
        fs::write(
            &database,
            r#"{ "buyers": [], "sellers": [], "datacenters": [], "relays": [] }"#,
        )
        .unwrap();
        let paths = ReloadPaths {
            database: database.clone(),
            route_matrix: temp_path("missing-matrix.json"),
        };
        reload_once(&paths, &state);
        assert_eq!(state.database.load().counts(), (0, 0, 0, 0));
        fs::remove_file(database).unwrap();
    }

    #[test]
    fn missing_locator_path_uses_empty_locator() {
        let locator = load_locator(None).unwrap();
        assert!(locator.entries.is_empty());
    }
}
