//! ---
//! wiki_section: "01-core-functionality"
//! wiki_subsection: "binary"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Binary entrypoint for the wiki daemon."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use wiki_common::{init_tracing, AppConfig};
use wiki_core::{OrchestratorError, WikiOrchestrator};

#[derive(Debug, Parser)]
#[command(author, version, about = "Wiki daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override the HTTP port")]
    http_port: Option<u16>,

    #[arg(long, help = "Override the number of HTTP replicas")]
    replicas: Option<usize>,

    #[arg(long, help = "Deploy the exchange-rate unit")]
    with_exchange_rates: bool,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.http_port {
            config.http.http_port = port;
        }
        if let Some(replicas) = self.replicas {
            config.http.replica_count = replicas;
        }
        if self.with_exchange_rates {
            config.exchange_rates.enabled = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/wiki.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    cli.apply(&mut config);
    config
        .validate()
        .context("configuration invalid after command line overrides")?;
    init_tracing("wikid", &config.logging)?;
    info!(source = %loaded.source.display(), "configuration loaded");

    let wiki = match WikiOrchestrator::new(config).start().await {
        Ok(wiki) => wiki,
        Err(err) => {
            error!(error = %err, "startup failed");
            if let OrchestratorError::Startup { cause, partial } = err {
                partial.shutdown().await;
                return Err(cause).context("wiki startup failed");
            }
            return Err(err.into());
        }
    };

    if let Some(addr) = wiki.http_address() {
        info!(address = %addr, "wiki running; waiting for termination signal");
    }
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    wiki.shutdown().await;
    Ok(())
}
