//! ---
//! wiki_section: "04-configuration-orchestration"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Unit lifecycle, deployments and phased startup."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! Ordered startup: phase `k + 1` is deployed only after phase `k` is
//! running. The first failure skips the rest.
use std::fmt;

use thiserror::Error;
use tracing::{info, warn};
use wiki_common::RollbackPolicy;

use crate::deployment::{DeploymentOptions, Runtime};
use crate::DeployError;

/// What happened to one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Deployed and still running.
    Deployed(String),
    /// Deployment failed with this cause.
    Failed(String),
    /// Never attempted because an earlier phase failed.
    Skipped,
    /// Deployed, then undeployed after a later phase failed.
    RolledBack(String),
}

/// Report line for one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    /// Phase name.
    pub phase: String,
    /// Factory identifier the phase deploys.
    pub unit_id: String,
    /// Outcome.
    pub outcome: PhaseOutcome,
}

/// Per-phase outcome of a startup run, in phase order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// One entry per configured phase.
    pub phases: Vec<PhaseReport>,
}

impl StartupReport {
    /// Outcome of the named phase.
    pub fn outcome(&self, phase: &str) -> Option<&PhaseOutcome> {
        self.phases
            .iter()
            .find(|report| report.phase == phase)
            .map(|report| &report.outcome)
    }

    /// Whether every phase is deployed.
    pub fn is_success(&self) -> bool {
        self.phases
            .iter()
            .all(|report| matches!(report.outcome, PhaseOutcome::Deployed(_)))
    }

    /// Deployment identifiers of the phases still running, in phase order.
    pub fn deployment_ids(&self) -> Vec<String> {
        self.phases
            .iter()
            .filter_map(|report| match &report.outcome {
                PhaseOutcome::Deployed(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for StartupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, report) in self.phases.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            match &report.outcome {
                PhaseOutcome::Deployed(id) => write!(f, "{}=deployed({id})", report.phase)?,
                PhaseOutcome::Failed(cause) => write!(f, "{}=failed({cause})", report.phase)?,
                PhaseOutcome::Skipped => write!(f, "{}=skipped", report.phase)?,
                PhaseOutcome::RolledBack(id) => write!(f, "{}=rolled-back({id})", report.phase)?,
            }
        }
        Ok(())
    }
}

/// Startup failed at `phase`; `cause` is that phase's own error.
#[derive(Debug, Error)]
#[error("startup phase '{phase}' failed: {cause}")]
pub struct StartupError {
    /// Name of the failed phase.
    pub phase: String,
    /// The failed phase's deployment error.
    #[source]
    pub cause: DeployError,
    /// Outcome of every phase, including the skipped ones.
    pub report: StartupReport,
}

#[derive(Debug, Clone)]
struct Phase {
    name: String,
    unit_id: String,
    options: DeploymentOptions,
}

/// Builder and driver for an ordered startup.
#[derive(Debug, Clone, Default)]
pub struct PhasedStartup {
    phases: Vec<Phase>,
    rollback: RollbackPolicy,
}

impl PhasedStartup {
    /// Empty startup with the given rollback policy.
    pub fn new(rollback: RollbackPolicy) -> Self {
        Self {
            phases: Vec::new(),
            rollback,
        }
    }

    /// Append a phase deploying `unit_id` with `options`.
    pub fn phase(
        mut self,
        name: impl Into<String>,
        unit_id: impl Into<String>,
        options: DeploymentOptions,
    ) -> Self {
        self.phases.push(Phase {
            name: name.into(),
            unit_id: unit_id.into(),
            options,
        });
        self
    }

    /// Number of configured phases.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Whether no phase is configured.
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Deploy the phases in order.
    ///
    /// With [`RollbackPolicy::KeepRunning`] phases that already succeeded stay
    /// up after a failure; with [`RollbackPolicy::UndeployCompleted`] they are
    /// undeployed in reverse order before the error is returned.
    pub async fn run(self, runtime: &Runtime) -> Result<StartupReport, StartupError> {
        let mut report = StartupReport {
            phases: self
                .phases
                .iter()
                .map(|phase| PhaseReport {
                    phase: phase.name.clone(),
                    unit_id: phase.unit_id.clone(),
                    outcome: PhaseOutcome::Skipped,
                })
                .collect(),
        };

        for (index, phase) in self.phases.iter().enumerate() {
            info!(phase = %phase.name, unit = %phase.unit_id, instances = phase.options.instances, "starting phase");
            match runtime.deploy(&phase.unit_id, phase.options).await {
                Ok(deployment_id) => {
                    report.phases[index].outcome = PhaseOutcome::Deployed(deployment_id);
                }
                Err(cause) => {
                    warn!(phase = %phase.name, error = %cause, rollback = ?self.rollback, "phase failed; skipping remaining phases");
                    report.phases[index].outcome = PhaseOutcome::Failed(cause.to_string());
                    if self.rollback == RollbackPolicy::UndeployCompleted {
                        rollback(runtime, &mut report.phases[..index]).await;
                    }
                    return Err(StartupError {
                        phase: phase.name.clone(),
                        cause,
                        report,
                    });
                }
            }
        }

        info!(report = %report, "startup complete");
        Ok(report)
    }
}

async fn rollback(runtime: &Runtime, completed: &mut [PhaseReport]) {
    for report in completed.iter_mut().rev() {
        let PhaseOutcome::Deployed(deployment_id) = &report.outcome else {
            continue;
        };
        let deployment_id = deployment_id.clone();
        if let Err(err) = runtime.undeploy(&deployment_id).await {
            warn!(phase = %report.phase, error = %err, "rollback undeploy failed");
        }
        report.outcome = PhaseOutcome::RolledBack(deployment_id);
    }
}
