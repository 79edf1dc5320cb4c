//! ---
//! wiki_section: "01-core-functionality"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Shared primitives and utilities for the core runtime."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! Core shared primitives for the wiki bus workspace.
//! This crate exposes configuration loading and the tracing bootstrap
//! consumed by every unit and by the daemon binary.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, BusConfig, DatabaseConfig, DeploymentConfig, ExchangeRateConfig, HttpConfig,
    LoadedAppConfig, LoggingConfig, RollbackPolicy,
};
pub use logging::{init_tracing, log_file_name, LogFormat};
