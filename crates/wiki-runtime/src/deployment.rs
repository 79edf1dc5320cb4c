//! ---
//! wiki_section: "04-configuration-orchestration"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Unit lifecycle, deployments and phased startup."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wiki_common::{AppConfig, DeploymentConfig};
use wiki_msg::Bus;

use crate::unit::{Unit, UnitContext, UnitState};
use crate::{DeployError, UnitError};

/// Default deadline for `init` plus `start` of one instance.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

type UnitFactory = Arc<dyn Fn() -> Box<dyn Unit> + Send + Sync>;

/// How many replicas to deploy and how long each may take to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentOptions {
    /// Number of replicas, at least one.
    pub instances: usize,
    /// Deadline for one replica's `init` and `start`.
    pub start_timeout: Duration,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            instances: 1,
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }
}

impl DeploymentOptions {
    /// Options for `instances` replicas with the default deadline.
    pub fn new(instances: usize) -> Self {
        Self {
            instances,
            ..Self::default()
        }
    }

    /// Options derived from the `[deployment]` configuration section.
    pub fn from_config(config: &DeploymentConfig, instances: usize) -> Self {
        Self {
            instances,
            start_timeout: config.start_timeout,
        }
    }

    /// Override the start deadline.
    pub fn with_start_timeout(mut self, start_timeout: Duration) -> Self {
        self.start_timeout = start_timeout;
        self
    }
}

/// Outcome of a deployment. Leaves `Pending` once and never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentStatus {
    /// Replicas are being started.
    Pending,
    /// Every replica started.
    Running,
    /// A replica failed; the text is the cause.
    Failed(String),
}

/// Bookkeeping kept for every deployment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    /// Unique deployment identifier.
    pub deployment_id: String,
    /// Factory identifier that was deployed.
    pub unit_id: String,
    /// Requested replica count.
    pub instances: usize,
    /// Current status.
    pub status: DeploymentStatus,
}

impl DeploymentRecord {
    fn settle(&mut self, status: DeploymentStatus) {
        if self.status == DeploymentStatus::Pending {
            self.status = status;
        } else {
            warn!(deployment = %self.deployment_id, current = ?self.status, ignored = ?status, "deployment record already settled");
        }
    }
}

struct Instance {
    unit: Box<dyn Unit>,
    ctx: UnitContext,
    state: UnitState,
}

impl Instance {
    async fn stop(&mut self) {
        self.state = UnitState::Stopping;
        match self.unit.stop(&self.ctx).await {
            Ok(()) => self.state = UnitState::Stopped,
            Err(err) => {
                error!(unit = %self.ctx.unit_id(), replica = self.ctx.replica(), error = %err, "unit stop failed");
                self.state = UnitState::Failed;
            }
        }
        self.ctx.shutdown_loop().await;
        debug!(unit = %self.ctx.unit_id(), replica = self.ctx.replica(), state = ?self.state, "unit instance stopped");
    }
}

struct Deployment {
    instances: Vec<Instance>,
}

/// Owns unit factories and the live deployments created from them.
pub struct Runtime {
    bus: Bus,
    config: Arc<AppConfig>,
    factories: RwLock<HashMap<String, UnitFactory>>,
    records: RwLock<IndexMap<String, DeploymentRecord>>,
    deployments: Mutex<IndexMap<String, Deployment>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("factories", &self.factories.read().keys().collect::<Vec<_>>())
            .field("deployments", &self.deployments.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Runtime {
    /// Create a runtime deploying onto `bus`.
    pub fn new(bus: Bus, config: Arc<AppConfig>) -> Self {
        Self {
            bus,
            config,
            factories: RwLock::new(HashMap::new()),
            records: RwLock::new(IndexMap::new()),
            deployments: Mutex::new(IndexMap::new()),
        }
    }

    /// The bus units are deployed onto.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Configuration handed to every unit.
    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    /// Register (or replace) the factory for `unit_id`.
    pub fn register_factory<F, U>(&self, unit_id: impl Into<String>, factory: F)
    where
        F: Fn() -> U + Send + Sync + 'static,
        U: Unit,
    {
        let unit_id = unit_id.into();
        let factory: UnitFactory = Arc::new(move || Box::new(factory()) as Box<dyn Unit>);
        if self.factories.write().insert(unit_id.clone(), factory).is_some() {
            warn!(unit = %unit_id, "unit factory replaced");
        }
    }

    /// Deploy `options.instances` replicas of `unit_id`.
    ///
    /// Replicas start one after another. When one fails or misses its
    /// deadline, the replicas already running are stopped, the record becomes
    /// `Failed` and the error is returned. Nothing is retried.
    pub async fn deploy(
        &self,
        unit_id: &str,
        options: DeploymentOptions,
    ) -> Result<String, DeployError> {
        let factory = self
            .factories
            .read()
            .get(unit_id)
            .cloned()
            .ok_or_else(|| DeployError::UnknownUnit(unit_id.to_owned()))?;
        if options.instances == 0 {
            return Err(DeployError::InvalidOptions(
                "instances must be at least one".into(),
            ));
        }
        if options.start_timeout.is_zero() {
            return Err(DeployError::InvalidOptions(
                "start timeout must be greater than zero".into(),
            ));
        }

        let deployment_id = format!("{unit_id}-{}", Uuid::new_v4().simple());
        self.records.write().insert(
            deployment_id.clone(),
            DeploymentRecord {
                deployment_id: deployment_id.clone(),
                unit_id: unit_id.to_owned(),
                instances: options.instances,
                status: DeploymentStatus::Pending,
            },
        );
        info!(unit = %unit_id, deployment = %deployment_id, instances = options.instances, "deploying unit");

        let unit_name: Arc<str> = Arc::from(unit_id);
        let deployment_name: Arc<str> = Arc::from(deployment_id.as_str());
        let mut started: Vec<Instance> = Vec::with_capacity(options.instances);
        for replica in 0..options.instances {
            let ctx = UnitContext::new(
                self.bus.clone(),
                self.config.clone(),
                unit_name.clone(),
                deployment_name.clone(),
                replica,
                options.instances,
            );
            let mut instance = Instance {
                unit: factory(),
                ctx,
                state: UnitState::Created,
            };

            if let Err(source) = start_instance(&mut instance, options.start_timeout).await {
                error!(unit = %unit_id, deployment = %deployment_id, replica, error = %source, "unit failed to start");
                instance.ctx.shutdown_loop().await;
                for sibling in started.iter_mut().rev() {
                    sibling.stop().await;
                }
                self.settle(&deployment_id, DeploymentStatus::Failed(source.to_string()));
                return Err(DeployError::Unit {
                    unit: unit_id.to_owned(),
                    source,
                });
            }
            debug!(unit = %unit_id, deployment = %deployment_id, replica, addresses = ?instance.ctx.addresses(), "unit replica running");
            started.push(instance);
        }

        self.deployments
            .lock()
            .insert(deployment_id.clone(), Deployment { instances: started });
        self.settle(&deployment_id, DeploymentStatus::Running);
        info!(unit = %unit_id, deployment = %deployment_id, "unit deployed");
        Ok(deployment_id)
    }

    /// Stop every replica of a live deployment and unbind its addresses.
    pub async fn undeploy(&self, deployment_id: &str) -> Result<(), DeployError> {
        let deployment = self
            .deployments
            .lock()
            .shift_remove(deployment_id)
            .ok_or_else(|| DeployError::UnknownDeployment(deployment_id.to_owned()))?;
        stop_deployment(deployment_id, deployment).await;
        Ok(())
    }

    /// Undeploy everything, most recent deployment first.
    pub async fn close(&self) {
        loop {
            let next = self.deployments.lock().pop();
            let Some((deployment_id, deployment)) = next else {
                break;
            };
            stop_deployment(&deployment_id, deployment).await;
        }
    }

    /// Record for one deployment attempt.
    pub fn record(&self, deployment_id: &str) -> Option<DeploymentRecord> {
        self.records.read().get(deployment_id).cloned()
    }

    /// Every deployment attempt, oldest first.
    pub fn records(&self) -> Vec<DeploymentRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Identifiers of live deployments, oldest first.
    pub fn deployment_ids(&self) -> Vec<String> {
        self.deployments.lock().keys().cloned().collect()
    }

    /// Lifecycle state of each replica of a live deployment.
    pub fn unit_states(&self, deployment_id: &str) -> Option<Vec<UnitState>> {
        self.deployments
            .lock()
            .get(deployment_id)
            .map(|deployment| deployment.instances.iter().map(|i| i.state).collect())
    }

    fn settle(&self, deployment_id: &str, status: DeploymentStatus) {
        if let Some(record) = self.records.write().get_mut(deployment_id) {
            record.settle(status);
        }
    }
}

async fn start_instance(instance: &mut Instance, deadline: Duration) -> Result<(), UnitError> {
    let Instance { unit, ctx, state } = instance;
    let lifecycle = async {
        *state = UnitState::Initializing;
        unit.init(ctx).await?;
        *state = UnitState::Starting;
        unit.start(ctx).await
    };
    let outcome = match tokio::time::timeout(deadline, lifecycle).await {
        Ok(result) => result,
        Err(_) => Err(UnitError::StartTimeout(deadline)),
    };
    *state = match outcome {
        Ok(()) => UnitState::Running,
        Err(_) => UnitState::Failed,
    };
    outcome
}

async fn stop_deployment(deployment_id: &str, mut deployment: Deployment) {
    info!(deployment = %deployment_id, "undeploying");
    for instance in deployment.instances.iter_mut().rev() {
        instance.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiki_common::BusConfig;
    use wiki_msg::{handler_fn, Message};

    struct Probe {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        fail_replica: Option<usize>,
        hang: bool,
    }

    #[async_trait]
    impl Unit for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        async fn start(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail_replica == Some(ctx.replica()) {
                return Err(UnitError::Connection("store unreachable".into()));
            }
            ctx.register(
                format!("probe.{}", ctx.replica()),
                handler_fn(|message: Message| async move { message.reply(()) }),
            )?;
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&mut self, _ctx: &UnitContext) -> Result<(), UnitError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Counters {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    fn runtime_with_probe(fail_replica: Option<usize>, hang: bool) -> (Runtime, Counters) {
        let bus = Bus::new(&BusConfig::default()).expect("bus");
        let runtime = Runtime::new(bus, Arc::new(AppConfig::default()));
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let (s, t) = (starts.clone(), stops.clone());
        runtime.register_factory("probe", move || Probe {
            starts: s.clone(),
            stops: t.clone(),
            fail_replica,
            hang,
        });
        (runtime, Counters { starts, stops })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deploy_runs_every_replica_and_records_running() {
        let (runtime, counters) = runtime_with_probe(None, false);
        let id = runtime
            .deploy("probe", DeploymentOptions::new(3))
            .await
            .expect("deploy");

        assert_eq!(counters.starts.load(Ordering::SeqCst), 3);
        assert_eq!(runtime.record(&id).expect("record").status, DeploymentStatus::Running);
        assert_eq!(
            runtime.unit_states(&id).expect("live"),
            vec![UnitState::Running; 3]
        );
        assert!(runtime.bus().is_registered("probe.2"));

        runtime.undeploy(&id).await.expect("undeploy");
        assert_eq!(counters.stops.load(Ordering::SeqCst), 3);
        assert!(!runtime.bus().is_registered("probe.0"));
        assert_eq!(runtime.record(&id).expect("kept").status, DeploymentStatus::Running);
        assert!(matches!(
            runtime.undeploy(&id).await,
            Err(DeployError::UnknownDeployment(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_replica_stops_started_siblings() {
        let (runtime, counters) = runtime_with_probe(Some(1), false);
        let err = runtime
            .deploy("probe", DeploymentOptions::new(3))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Unit { ref unit, source: UnitError::Connection(_) } if unit == "probe"
        ));
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
        assert!(!runtime.bus().is_registered("probe.0"));
        assert!(runtime.deployment_ids().is_empty());

        let record = runtime.records().pop().expect("record kept");
        assert!(matches!(record.status, DeploymentStatus::Failed(ref cause) if cause.contains("store unreachable")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unit_that_never_starts_hits_the_deadline() {
        let (runtime, _) = runtime_with_probe(None, true);
        let err = runtime
            .deploy(
                "probe",
                DeploymentOptions::new(1).with_start_timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeployError::Unit {
                source: UnitError::StartTimeout(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unknown_units_and_zero_instances_are_rejected() {
        let (runtime, _) = runtime_with_probe(None, false);
        assert!(matches!(
            runtime.deploy("missing", DeploymentOptions::default()).await,
            Err(DeployError::UnknownUnit(_))
        ));
        assert!(matches!(
            runtime.deploy("probe", DeploymentOptions::new(0)).await,
            Err(DeployError::InvalidOptions(_))
        ));
        assert!(runtime.records().is_empty());
    }

    #[test]
    fn settled_record_does_not_change() {
        let mut record = DeploymentRecord {
            deployment_id: "d".into(),
            unit_id: "u".into(),
            instances: 1,
            status: DeploymentStatus::Pending,
        };
        record.settle(DeploymentStatus::Running);
        record.settle(DeploymentStatus::Failed("late".into()));
        assert_eq!(record.status, DeploymentStatus::Running);
    }
}
