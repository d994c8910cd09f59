use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use backend::{billing_channel, Biller, MagicValues, Metrics, SnapshotCell};
use clap::Parser;
use rand::thread_rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod billing;
mod config;
mod reload;
mod state;
mod workers;

use config::ServerConfig;
use state::State;

#[derive(Parser)]
#[command(
    name = "nextroute-server",
    version,
    about = "nextroute session and relay backend"
)]
struct Cli {
    /// Path to the server config JSON.
    #[arg(long, default_value = "server.json")]
    config: PathBuf,
    /// Override the SDK bind address.
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Override the relay update bind address.
    #[arg(long)]
    relay_bind: Option<SocketAddr>,
    /// Override the number of worker threads.
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = if cli.config.exists() {
        ServerConfig::load(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "config not found, using defaults");
        ServerConfig::default()
    };
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(relay_bind) = cli.relay_bind {
        config.relay_bind = Some(relay_bind);
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    run(config)
}

fn run(config: ServerConfig) -> Result<()> {
    let keys = config.load_keys()?;
    let database = reload::load_database(&config.database_path)?;
    let route_matrix = reload::load_route_matrix(&config.route_matrix_path)?;
    let locator = reload::load_locator(config.locator_path.as_deref())?;
    let metrics = Arc::new(Metrics::new());

    let biller: Arc<dyn Biller> = match &config.billing_path {
        Some(path) => Arc::new(
            billing::FileBiller::open(path)
                .with_context(|| format!("open billing file {}", path.display()))?,
        ),
        None => Arc::new(billing::LogBiller),
    };
    let (billing_queue, billing_worker) = billing_channel(
        config.billing_queue_size,
        vec![biller],
        config.retry_policy(),
        Arc::clone(&metrics),
    );
    billing_worker.spawn().context("spawn billing worker")?;

    let (buyers, sellers, datacenters, relays) = database.counts();
    info!(
        buyers,
        sellers,
        datacenters,
        relays,
        matrix_relays = route_matrix.num_relays(),
        "loaded database and route matrix"
    );

    let state = Arc::new(State {
        backend: config.backend.clone(),
        public_address: config.public_address(),
        keys,
        database: SnapshotCell::new(database),
        route_matrix: SnapshotCell::new(route_matrix),
        magic: SnapshotCell::new(MagicValues::generate(&mut thread_rng())),
        locator: Box::new(locator),
        metrics,
        billing: Some(billing_queue),
    });

    reload::spawn_reloader(
        reload::ReloadPaths {
            database: config.database_path.clone(),
            route_matrix: config.route_matrix_path.clone(),
        },
        config.reload_interval(),
        Arc::clone(&state),
    )
    .context("spawn reloader")?;
    reload::spawn_magic_rotation(config.magic_rotation(), Arc::clone(&state))
        .context("spawn magic rotation")?;

    if let Some(relay_bind) = config.relay_bind {
        let socket = UdpSocket::bind(relay_bind)
            .with_context(|| format!("bind relay socket {relay_bind}"))?;
        info!(%relay_bind, "listening for relay updates");
        workers::spawn_relay_loop(socket, Arc::clone(&state)).context("spawn relay loop")?;
    }

    let socket = Arc::new(
        UdpSocket::bind(config.bind).with_context(|| format!("bind {}", config.bind))?,
    );
    let (sender, receiver) = crossbeam_channel::bounded(config.queue_depth);
    workers::spawn_workers(config.workers, &receiver, &socket, &state)
        .context("spawn workers")?;
    drop(receiver);

    info!(
        bind = %config.bind,
        public_address = %state.public_address,
        workers = config.workers,
        "listening for sdk packets"
    );
    workers::receive_loop(&socket, &sender, &state).context("sdk socket failed")
}
