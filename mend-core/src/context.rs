use crate::error::ContextError;
use crate::incident::Incident;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub version: String,
    pub timestamp: String,
    pub status: String,
}

/// Evidence handed to the reasoning oracle alongside the incident.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentContext {
    pub logs: String,
    /// Newest first.
    pub deployments: Vec<Deployment>,
}

pub trait ContextProvider: Send + Sync {
    fn gather(&self, incident: &Incident) -> Result<IncidentContext, ContextError>;
}

/// Canned log lines and deployment history for demos and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticContext;

impl ContextProvider for StaticContext {
    fn gather(&self, incident: &Incident) -> Result<IncidentContext, ContextError> {
        Ok(IncidentContext {
            logs: format!(
                "[{}] service={} level=ERROR message=memory allocation failure deployment=v1.4.2",
                incident.detected_at.to_rfc3339(),
                incident.subject
            ),
            deployments: vec![
                Deployment {
                    version: "v1.4.2".into(),
                    timestamp: "2025-02-11T10:00:00Z".into(),
                    status: "deployed".into(),
                },
                Deployment {
                    version: "v1.4.1".into(),
                    timestamp: "2025-02-11T09:30:00Z".into(),
                    status: "deployed".into(),
                },
            ],
        })
    }
}
