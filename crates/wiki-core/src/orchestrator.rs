//! ---
//! wiki_section: "01-core-functionality"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Wiki orchestrator and lifecycle management."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use wiki_common::AppConfig;
use wiki_db::{DatabaseUnit, DATABASE_UNIT};
use wiki_http::{bound_address, HttpUnit, HTTP_UNIT};
use wiki_msg::{Bus, BusError, CodecError};
use wiki_rates::{register_codecs, ExchangeRateUnit, RateSource, EXCHANGE_RATES_UNIT};
use wiki_runtime::{
    DeploymentOptions, PhaseOutcome, PhasedStartup, Runtime, StartupError, StartupReport,
};

/// Phase deploying the persistence unit.
pub const PHASE_DATABASE: &str = "database";
/// Phase deploying the HTTP replicas.
pub const PHASE_HTTP: &str = "http";
/// Optional phase deploying the exchange-rate unit.
pub const PHASE_EXCHANGE_RATES: &str = "exchange-rates";

/// Failures bringing the wiki up.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("bus setup failed: {0}")]
    Bus(#[from] BusError),
    #[error("codec registration failed: {0}")]
    Codec(#[from] CodecError),
    /// A phase failed. `partial` holds whatever is still running, which
    /// depends on the rollback policy.
    #[error("wiki startup failed")]
    Startup {
        #[source]
        cause: StartupError,
        partial: WikiHandle,
    },
}

impl OrchestratorError {
    pub fn startup_error(&self) -> Option<&StartupError> {
        match self {
            OrchestratorError::Startup { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Take the partially started wiki so it can be shut down.
    pub fn into_partial(self) -> Option<WikiHandle> {
        match self {
            OrchestratorError::Startup { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// Builds the bus, registers codecs and unit factories, and deploys
/// persistence, then HTTP, then the optional exchange-rate unit.
pub struct WikiOrchestrator {
    config: Arc<AppConfig>,
    rate_source: Option<Arc<dyn RateSource>>,
}

impl std::fmt::Debug for WikiOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WikiOrchestrator")
            .field("exchange_rates", &self.config.exchange_rates.enabled)
            .field("custom_rate_source", &self.rate_source.is_some())
            .finish_non_exhaustive()
    }
}

impl WikiOrchestrator {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            rate_source: None,
        }
    }

    /// Fetch exchange rates from `source` instead of the configured endpoint.
    pub fn with_rate_source(mut self, source: Arc<dyn RateSource>) -> Self {
        self.rate_source = Some(source);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn plan(&self) -> PhasedStartup {
        let deployment = &self.config.deployment;
        let mut plan = PhasedStartup::new(deployment.rollback)
            .phase(
                PHASE_DATABASE,
                DATABASE_UNIT,
                DeploymentOptions::from_config(deployment, 1),
            )
            .phase(
                PHASE_HTTP,
                HTTP_UNIT,
                DeploymentOptions::from_config(deployment, self.config.http.replica_count),
            );
        if self.config.exchange_rates.enabled {
            plan = plan.phase(
                PHASE_EXCHANGE_RATES,
                EXCHANGE_RATES_UNIT,
                DeploymentOptions::from_config(deployment, 1),
            );
        }
        plan
    }

    /// Run the phased startup.
    pub async fn start(self) -> Result<WikiHandle, OrchestratorError> {
        let bus = Bus::new(&self.config.bus)?;
        register_codecs(bus.codecs())?;

        let runtime = Runtime::new(bus, self.config.clone());
        runtime.register_factory(DATABASE_UNIT, DatabaseUnit::new);
        runtime.register_factory(HTTP_UNIT, HttpUnit::new);
        let source = self.rate_source.clone();
        runtime.register_factory(EXCHANGE_RATES_UNIT, move || match &source {
            Some(source) => ExchangeRateUnit::with_source(source.clone()),
            None => ExchangeRateUnit::new(),
        });
        let runtime = Arc::new(runtime);

        let plan = self.plan();
        info!(
            phases = plan.len(),
            replicas = self.config.http.replica_count,
            rollback = ?self.config.deployment.rollback,
            "starting wiki"
        );
        match plan.run(&runtime).await {
            Ok(report) => Ok(WikiHandle { runtime, report }),
            Err(cause) => {
                warn!(phase = %cause.phase, report = %cause.report, "wiki started partially or not at all");
                let partial = WikiHandle {
                    runtime,
                    report: cause.report.clone(),
                };
                Err(OrchestratorError::Startup { cause, partial })
            }
        }
    }
}

/// Running wiki.
#[derive(Debug)]
pub struct WikiHandle {
    runtime: Arc<Runtime>,
    report: StartupReport,
}

impl WikiHandle {
    pub fn bus(&self) -> &Bus {
        self.runtime.bus()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Per-phase outcome of the startup.
    pub fn report(&self) -> &StartupReport {
        &self.report
    }

    /// Address the HTTP replicas listen on, once the HTTP phase is running.
    pub fn http_address(&self) -> Option<SocketAddr> {
        match self.report.outcome(PHASE_HTTP) {
            Some(PhaseOutcome::Deployed(deployment_id)) => bound_address(deployment_id),
            _ => None,
        }
    }

    /// Undeploy every unit, last phase first.
    pub async fn shutdown(self) {
        self.runtime.close().await;
        info!("wiki shutdown complete");
    }
}
