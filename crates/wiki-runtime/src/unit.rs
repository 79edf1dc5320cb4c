//! ---
//! wiki_section: "04-configuration-orchestration"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Unit lifecycle, deployments and phased startup."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use wiki_common::AppConfig;
use wiki_msg::{Bus, EventLoop, Handler};

use crate::UnitError;

/// Lifecycle position of one unit instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Built by its factory, nothing run yet.
    Created,
    /// `init` in progress.
    Initializing,
    /// `start` in progress.
    Starting,
    /// Started and serving its addresses.
    Running,
    /// `stop` in progress.
    Stopping,
    /// Stopped cleanly.
    Stopped,
    /// Failed to start or to stop.
    Failed,
}

/// Independently deployable piece of logic.
///
/// Units never share memory; everything they need from each other goes over
/// the bus handed to them in the [`UnitContext`].
#[async_trait]
pub trait Unit: Send + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Load unit-local resources. Blocking work belongs in
    /// [`UnitContext::execute_blocking`].
    async fn init(&mut self, _ctx: &UnitContext) -> Result<(), UnitError> {
        Ok(())
    }

    /// Perform I/O setup and bind addresses. Resolving the future is the
    /// single completion signal; an error is terminal for the instance.
    async fn start(&mut self, ctx: &UnitContext) -> Result<(), UnitError>;

    /// Release resources. Addresses are unbound by the runtime afterwards.
    async fn stop(&mut self, _ctx: &UnitContext) -> Result<(), UnitError> {
        Ok(())
    }
}

/// What the runtime hands to each unit instance.
#[derive(Clone)]
pub struct UnitContext {
    bus: Bus,
    config: Arc<AppConfig>,
    unit_id: Arc<str>,
    deployment_id: Arc<str>,
    replica: usize,
    replicas: usize,
    event_loop: Arc<EventLoop>,
}

impl std::fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitContext")
            .field("unit", &self.unit_id)
            .field("deployment", &self.deployment_id)
            .field("replica", &self.replica)
            .field("replicas", &self.replicas)
            .finish()
    }
}

impl UnitContext {
    pub(crate) fn new(
        bus: Bus,
        config: Arc<AppConfig>,
        unit_id: Arc<str>,
        deployment_id: Arc<str>,
        replica: usize,
        replicas: usize,
    ) -> Self {
        let event_loop = Arc::new(EventLoop::spawn(&bus, format!("{unit_id}#{replica}")));
        Self {
            bus,
            config,
            unit_id,
            deployment_id,
            replica,
            replicas,
            event_loop,
        }
    }

    /// The shared bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Typed application configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Identifier the unit was deployed under.
    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// Deployment this instance belongs to.
    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Zero-based replica index within the deployment.
    pub fn replica(&self) -> usize {
        self.replica
    }

    /// Number of replicas in the deployment.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Bind `handler` to `address` on this instance's event loop.
    pub fn register<H: Handler>(&self, address: impl Into<String>, handler: H) -> Result<(), UnitError> {
        Ok(self.event_loop.register(address, handler)?)
    }

    /// Addresses bound by this instance.
    pub fn addresses(&self) -> Vec<String> {
        self.event_loop.addresses()
    }

    /// Run blocking work on the worker pool and wait for its result.
    pub async fn execute_blocking<F, T>(&self, f: F) -> Result<T, UnitError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|err| UnitError::Other(format!("blocking task failed: {err}")))
    }

    pub(crate) async fn shutdown_loop(&self) {
        self.event_loop.shutdown().await;
    }
}
