use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentCategory {
    LatencySpike,
    CrashLoop,
    MemoryLeak,
    DeploymentFailure,
}

impl IncidentCategory {
    pub const ALL: [IncidentCategory; 4] = [
        IncidentCategory::LatencySpike,
        IncidentCategory::CrashLoop,
        IncidentCategory::MemoryLeak,
        IncidentCategory::DeploymentFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentCategory::LatencySpike => "latency_spike",
            IncidentCategory::CrashLoop => "crash_loop",
            IncidentCategory::MemoryLeak => "memory_leak",
            IncidentCategory::DeploymentFailure => "deployment_failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == value.trim().to_lowercase())
    }

    /// Classify a metric or alert name. Unrecognised signals are treated as crash loops.
    pub fn from_signal(signal: &str) -> Self {
        let lower = signal.to_lowercase();

        if lower.contains("error") || lower.contains("failure") || lower.contains("crash") {
            IncidentCategory::CrashLoop
        } else if lower.contains("duration") || lower.contains("latency") {
            IncidentCategory::LatencySpike
        } else if lower.contains("memory") || lower.contains("throttle") || lower.contains("oom") {
            IncidentCategory::MemoryLeak
        } else if lower.contains("deploy") {
            IncidentCategory::DeploymentFailure
        } else {
            IncidentCategory::CrashLoop
        }
    }
}

impl fmt::Display for IncidentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected operational anomaly. Read-only once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub category: IncidentCategory,
    pub subject: String,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl Incident {
    pub fn new(category: IncidentCategory, subject: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            category,
            subject: subject.into(),
            detected_at: Utc::now(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_detected_at(mut self, detected_at: DateTime<Utc>) -> Self {
        self.detected_at = detected_at;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

pub fn generate_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("inc-{}", &hex[..8])
}
