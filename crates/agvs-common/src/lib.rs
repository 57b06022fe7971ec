//! ---
//! agvs_section: "01-common-runtime"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Shared primitives for the AGVS coordinator."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
//! Shared primitives for the AGVS coordinator workspace: configuration
//! loading and validation, tracing initialisation, and small time helpers
//! consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, BrokerConfig, CorrelatorConfig, FleetConfig, JournalConfig, LoadedAppConfig,
    LoggingConfig, MetricsConfig, TelemetryConfig,
};
pub use logging::{init_tracing, LogFormat};
