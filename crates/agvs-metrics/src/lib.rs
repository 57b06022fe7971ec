//! ---
//! agvs_section: "05-metrics"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Metrics collection and export utilities."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{
    response::{IntoResponse, Response},
    Router,
};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint. Returns `text/plain` metrics even on large registries.
async fn metrics_handler(registry: SharedRegistry) -> Response {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "agvsd_starts_total",
            "Total number of times the AGVS daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "agvsd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "agvsd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "git_sha", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, git_sha: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, git_sha, profile])
            .set(1.0);
    }
}

/// Metrics recorded by the fleet coordinator.
#[derive(Clone)]
pub struct CoordinatorMetrics {
    registry: SharedRegistry,
    commands_issued: IntCounterVec,
    responses: IntCounterVec,
    responses_unmatched: IntCounter,
    commands_expired: IntCounterVec,
    commands_pending: IntGauge,
    states_recorded: IntCounterVec,
    states_dropped: IntCounterVec,
    travels_completed: IntCounter,
    travels_cancelled: IntCounter,
    alerts: IntCounterVec,
    alert_unresolved: IntCounterVec,
    map_snapshots: IntCounter,
    map_snapshot_failures: IntCounter,
}

impl CoordinatorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let commands_issued = IntCounterVec::new(
            Opts::new(
                "agvs_commands_issued_total",
                "Count of commands published to the fleet by action",
            ),
            &["action"],
        )?;
        registry.register(Box::new(commands_issued.clone()))?;

        let responses = IntCounterVec::new(
            Opts::new(
                "agvs_responses_total",
                "Count of correlated command responses by action and outcome",
            ),
            &["action", "outcome"],
        )?;
        registry.register(Box::new(responses.clone()))?;

        let responses_unmatched = IntCounter::with_opts(Opts::new(
            "agvs_responses_unmatched_total",
            "Count of responses whose command id matched no pending command",
        ))?;
        registry.register(Box::new(responses_unmatched.clone()))?;

        let commands_expired = IntCounterVec::new(
            Opts::new(
                "agvs_commands_expired_total",
                "Count of pending commands dropped after the response deadline",
            ),
            &["action"],
        )?;
        registry.register(Box::new(commands_expired.clone()))?;

        let commands_pending = IntGauge::with_opts(Opts::new(
            "agvs_commands_pending",
            "Number of commands currently awaiting a response",
        ))?;
        registry.register(Box::new(commands_pending.clone()))?;

        let states_recorded = IntCounterVec::new(
            Opts::new(
                "agvs_vehicle_states_total",
                "Count of vehicle state reports persisted by vehicle",
            ),
            &["vehicle"],
        )?;
        registry.register(Box::new(states_recorded.clone()))?;

        let states_dropped = IntCounterVec::new(
            Opts::new(
                "agvs_vehicle_states_dropped_total",
                "Count of vehicle state reports discarded on queue overflow",
            ),
            &["vehicle"],
        )?;
        registry.register(Box::new(states_dropped.clone()))?;

        let travels_completed = IntCounter::with_opts(Opts::new(
            "agvs_travels_completed_total",
            "Count of travels transitioned to completed by telemetry",
        ))?;
        registry.register(Box::new(travels_completed.clone()))?;

        let travels_cancelled = IntCounter::with_opts(Opts::new(
            "agvs_travels_cancelled_total",
            "Count of travels cancelled through the coordinator",
        ))?;
        registry.register(Box::new(travels_cancelled.clone()))?;

        let alerts = IntCounterVec::new(
            Opts::new(
                "agvs_alerts_total",
                "Count of fleet alerts recorded by severity level",
            ),
            &["level"],
        )?;
        registry.register(Box::new(alerts.clone()))?;

        let alert_unresolved = IntCounterVec::new(
            Opts::new(
                "agvs_alert_unresolved_refs_total",
                "Count of alert references that matched no taxonomy row",
            ),
            &["reference"],
        )?;
        registry.register(Box::new(alert_unresolved.clone()))?;

        let map_snapshots = IntCounter::with_opts(Opts::new(
            "agvs_map_snapshots_total",
            "Count of map snapshots served to clients",
        ))?;
        registry.register(Box::new(map_snapshots.clone()))?;

        let map_snapshot_failures = IntCounter::with_opts(Opts::new(
            "agvs_map_snapshot_failures_total",
            "Count of map snapshot requests answered with a failure response",
        ))?;
        registry.register(Box::new(map_snapshot_failures.clone()))?;

        Ok(Self {
            registry,
            commands_issued,
            responses,
            responses_unmatched,
            commands_expired,
            commands_pending,
            states_recorded,
            states_dropped,
            travels_completed,
            travels_cancelled,
            alerts,
            alert_unresolved,
            map_snapshots,
            map_snapshot_failures,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_command(&self, action: &str) {
        self.commands_issued.with_label_values(&[action]).inc();
    }

    pub fn record_response(&self, action: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.responses.with_label_values(&[action, outcome]).inc();
    }

    pub fn record_unmatched_response(&self) {
        self.responses_unmatched.inc();
    }

    pub fn record_expired(&self, action: &str) {
        self.commands_expired.with_label_values(&[action]).inc();
    }

    pub fn set_pending(&self, count: usize) {
        self.commands_pending.set(count as i64);
    }

    pub fn record_state(&self, vehicle: i64) {
        self.states_recorded
            .with_label_values(&[&vehicle.to_string()])
            .inc();
    }

    pub fn record_state_dropped(&self, vehicle: i64) {
        self.states_dropped
            .with_label_values(&[&vehicle.to_string()])
            .inc();
    }

    pub fn record_travel_completed(&self) {
        self.travels_completed.inc();
    }

    pub fn record_travel_cancelled(&self) {
        self.travels_cancelled.inc();
    }

    pub fn record_alert(&self, level: &str) {
        self.alerts.with_label_values(&[level]).inc();
    }

    pub fn record_unresolved_reference(&self, reference: &str) {
        self.alert_unresolved.with_label_values(&[reference]).inc();
    }

    pub fn record_map_snapshot(&self) {
        self.map_snapshots.inc();
    }

    pub fn record_map_snapshot_failure(&self) {
        self.map_snapshot_failures.inc();
    }
}

pub use prometheus;
