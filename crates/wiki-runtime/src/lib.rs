//! ---
//! wiki_section: "04-configuration-orchestration"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Unit lifecycle, deployments and phased startup."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! Deployment runtime for units of execution.
//!
//! A [`Unit`] is built by a factory registered under an identifier, gets its
//! own event loop, and goes through `init` and `start` under a deadline.
//! [`Runtime::deploy`] creates the requested number of replicas and records
//! the outcome once; [`PhasedStartup`] chains deployments so a failed phase
//! stops everything after it.
#![warn(missing_docs)]

use std::time::Duration;

use thiserror::Error;
use wiki_msg::BusError;

pub mod deployment;
pub mod phases;
pub mod unit;

pub use deployment::{DeploymentOptions, DeploymentRecord, DeploymentStatus, Runtime};
pub use phases::{PhaseOutcome, PhaseReport, PhasedStartup, StartupError, StartupReport};
pub use unit::{Unit, UnitContext, UnitState};
pub use wiki_common::RollbackPolicy;

/// Failures raised by a unit while initialising, starting or stopping.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The unit was given settings it cannot work with.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A backing resource could not be reached.
    #[error("connection error: {0}")]
    Connection(String),
    /// `init` and `start` did not complete before the deadline.
    #[error("unit did not start within {0:?}")]
    StartTimeout(Duration),
    /// Local I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Registering on or talking to the bus failed.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// Anything else, carried as text.
    #[error("{0}")]
    Other(String),
}

/// Failures raised by [`Runtime`] operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// No factory is registered under the identifier.
    #[error("no unit factory registered as '{0}'")]
    UnknownUnit(String),
    /// The deployment options are unusable.
    #[error("invalid deployment options: {0}")]
    InvalidOptions(String),
    /// A replica failed to come up.
    #[error("unit '{unit}' failed to start: {source}")]
    Unit {
        /// Unit identifier.
        unit: String,
        /// What the replica reported.
        #[source]
        source: UnitError,
    },
    /// No live deployment has this identifier.
    #[error("unknown deployment '{0}'")]
    UnknownDeployment(String),
}
