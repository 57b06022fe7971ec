//! ---
//! agvs_section: "07-daemon"
//! agvs_subsection: "binary"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Binary entrypoint for the AGVS daemon."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use agvs_common::config::AppConfig;
use agvs_common::logging::{init_tracing, LOG_ENV};
use agvs_core::FleetCoordinator;
use agvs_metrics::{new_registry, spawn_http_server, CoordinatorMetrics, DaemonMetrics};
use agvs_msg::topics;
use agvs_store::{EventJournal, FleetSeed, MemoryStore, Vehicle};
use agvs_transport::{MqttBroker, MqttConnection};

mod version;

use version::VersionInfo;

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("AGVS ", env!("CARGO_PKG_VERSION"), " (", env!("VERGEN_GIT_SHA"), ")"),
    about = "AGV fleet supervision daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DIRECTIVE",
        help = "Log filter override (e.g. info, debug,rumqttc=warn)"
    )]
    log_level: Option<String>,

    #[arg(long, help = "Print the effective configuration as TOML and exit")]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the coordinator")]
    Run,
    #[command(about = "Print extended version information")]
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if matches!(cli.command, Some(Commands::Version)) {
        println!("{}", version.extended());
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("agvs.toml"));
    candidates.push(PathBuf::from("config/agvs.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    let load_duration = load_started.elapsed();

    if cli.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    if let Some(directive) = &cli.log_level {
        std::env::set_var(LOG_ENV, directive);
    }
    init_tracing("agvsd", &config.logging)?;
    info!(
        config_path = %loaded.source.display(),
        version = %version.banner(),
        "agvsd starting"
    );

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(&version.semver, &version.git_sha, &version.profile);

    run_daemon(config, registry).await
}

async fn run_daemon(config: AppConfig, registry: agvs_metrics::SharedRegistry) -> Result<()> {
    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let store = Arc::new(MemoryStore::new());
    for vehicle_id in &config.fleet.vehicles {
        store.seed_vehicle(Vehicle::new(*vehicle_id));
    }
    if let Some(path) = &config.fleet.seed_file {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read seed file {}", path.display()))?;
        let seed: FleetSeed = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse seed file {}", path.display()))?;
        info!(
            seed_file = %path.display(),
            vehicles = seed.vehicles.len(),
            nodes = seed.nodes.len(),
            arcs = seed.arcs.len(),
            "fleet seed loaded"
        );
        store.apply_seed(seed);
    }

    let journal = if config.journal.enabled {
        let path = config.journal.directory.join("fleet-events.log");
        let journal = EventJournal::open(&path)
            .with_context(|| format!("unable to open journal {}", path.display()))?;
        info!(journal = %path.display(), "event journal enabled");
        Some(Arc::new(journal))
    } else {
        None
    };

    let coordinator_metrics = CoordinatorMetrics::new(registry)?;

    let (broker_shutdown, _) = broadcast::channel(1);
    let MqttConnection {
        broker,
        inbound,
        supervisor,
    } = MqttBroker::connect(
        &config.broker,
        topics::API_STATUS,
        broker_shutdown.subscribe(),
    );

    let handle = FleetCoordinator::start(
        &config,
        Arc::new(broker),
        inbound,
        store,
        coordinator_metrics,
        journal,
    )
    .await?;

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    handle.shutdown().await?;
    // The coordinator is quiet now; close the broker session so the retained
    // availability flips to offline before the process exits.
    let _ = broker_shutdown.send(());
    if let Err(err) = supervisor.await {
        warn!(error = %err, "broker supervisor join failed");
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}
