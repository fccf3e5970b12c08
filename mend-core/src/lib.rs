//! Closed-loop incident response: detect, diagnose, plan, execute, verify, report.
//!
//! [`workflow::Workflow`] sequences one pipeline run over pluggable collaborators.
//! Every collaborator sits behind a trait so the real and stub variants are chosen
//! once, when the workflow is assembled.

pub mod config;
pub mod context;
pub mod diagnosis;
pub mod error;
pub mod event_log;
pub mod executor;
pub mod incident;
pub mod planner;
pub mod reasoning;
pub mod recovery;
pub mod report;
pub mod source;
pub mod workflow;

pub use config::{Settings, WorkflowConfig};
pub use diagnosis::{Diagnosis, RecommendedAction, FALLBACK_DIAGNOSIS};
pub use incident::{Incident, IncidentCategory};
pub use planner::PlannedAction;
pub use recovery::{RecoveryOutcome, RecoveryStatus};
pub use report::PostIncidentReport;
pub use workflow::{RunOutcome, Stage, Workflow};
