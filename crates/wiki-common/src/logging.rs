//! ---
//! wiki_section: "01-core-functionality"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Shared primitives and utilities for the core runtime."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "WIKI_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Install the process-wide subscriber for `service_name`.
///
/// `WIKI_LOG` takes precedence over `RUST_LOG` as the filter; without either
/// the daemon logs at `info`. Stdout carries JSON or pretty output per
/// `logging.format`. A daily rolling JSON file named by [`log_file_name`] is
/// written to `logging.directory`.
///
/// Calling this more than once keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;

    let file_appender = daily(&config.directory, log_file_name(service_name, config));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };
    let file_layer = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}

/// Base name of the rolling log file: `{file_prefix}-{service}.log`, or
/// `{service}.log` when no prefix is configured.
pub fn log_file_name(service_name: &str, config: &LoggingConfig) -> String {
    match config.file_prefix.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(prefix) => format!("{prefix}-{service_name}.log"),
        None => format!("{service_name}.log"),
    }
}

fn env_filter() -> EnvFilter {
    let Ok(directive) = std::env::var(LOG_ENV) else {
        return EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("invalid {LOG_ENV} directive {directive:?} ({err}); using {DEFAULT_DIRECTIVE}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path, file_prefix: Option<&str>) -> LoggingConfig {
        LoggingConfig {
            directory: dir.join("logs"),
            format: LogFormat::Pretty,
            file_prefix: file_prefix.map(str::to_owned),
        }
    }

    #[test]
    fn log_file_is_named_after_the_service() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(log_file_name("wikid", &config(dir.path(), None)), "wikid.log");
        assert_eq!(
            log_file_name("wikid", &config(dir.path(), Some("staging"))),
            "staging-wikid.log"
        );
        assert_eq!(log_file_name("wikid", &config(dir.path(), Some(" "))), "wikid.log");
    }

    #[test]
    fn init_creates_log_directory_and_is_repeatable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path(), Some("wiki-test"));
        init_tracing("wikid", &config).expect("first init");
        init_tracing("wikid", &config).expect("second init keeps first subscriber");
        assert!(config.directory.is_dir());
    }
}
