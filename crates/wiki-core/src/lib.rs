//! ---
//! wiki_section: "01-core-functionality"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Wiki orchestrator and lifecycle management."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! Wiki orchestrator: one bus, three ordered deployment phases.

pub mod orchestrator;

pub use orchestrator::{
    OrchestratorError, WikiHandle, WikiOrchestrator, PHASE_DATABASE, PHASE_EXCHANGE_RATES,
    PHASE_HTTP,
};
