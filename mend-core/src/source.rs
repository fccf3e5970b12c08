use crate::error::AlertError;
use crate::executor::is_path_segment;
use crate::incident::{generate_id, Incident, IncidentCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};

pub const ALERT_SCHEMA_V1: &str = "alert.v1";
pub const DEFAULT_SUBJECT: &str = "checkout";

/// Pull-based incident feed, one incident per call.
pub trait IncidentSource: Send {
    fn next(&mut self) -> Option<Incident>;
}

/// Yields one synthetic incident, then nothing.
pub struct SimulatedSource {
    pending: Option<Incident>,
}

impl SimulatedSource {
    pub fn new(category: IncidentCategory) -> Self {
        let incident = Incident::new(category, DEFAULT_SUBJECT)
            .with_context("source", serde_json::json!("simulated"))
            .with_context("metric", serde_json::json!("latency_p99"))
            .with_context("value", serde_json::json!(2500))
            .with_context("threshold", serde_json::json!(500));
        Self {
            pending: Some(incident),
        }
    }

    pub fn from_incident(incident: Incident) -> Self {
        Self {
            pending: Some(incident),
        }
    }

    pub fn empty() -> Self {
        Self { pending: None }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.pending = self.pending.map(|i| i.with_id(id));
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        if let Some(incident) = self.pending.as_mut() {
            incident.subject = subject;
        }
        self
    }
}

impl IncidentSource for SimulatedSource {
    fn next(&mut self) -> Option<Incident> {
        self.pending.take()
    }
}

/// Blocks until an incident is sent or every sender is dropped.
pub struct ChannelSource {
    rx: Receiver<Incident>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<Incident>) -> Self {
        Self { rx }
    }
}

impl IncidentSource for ChannelSource {
    fn next(&mut self) -> Option<Incident> {
        self.rx.recv().ok()
    }
}

pub fn incident_channel() -> (Sender<Incident>, ChannelSource) {
    let (tx, rx) = mpsc::channel();
    (tx, ChannelSource::new(rx))
}

/// Normalised inbound alert, whatever monitoring system sent it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CanonicalAlert {
    pub schema: String,
    pub id: String,
    pub title: String,
    pub severity: String,
    pub tags: Vec<String>,
    pub source: String,
    pub subject: String,
    pub occurred_at: DateTime<Utc>,
}

impl CanonicalAlert {
    pub fn validate(&self) -> Result<(), AlertError> {
        if self.schema != ALERT_SCHEMA_V1 {
            return Err(AlertError::Schema(self.schema.clone()));
        }
        if self.id.trim().is_empty() {
            return Err(AlertError::MissingField("id"));
        }
        if self.title.trim().is_empty() {
            return Err(AlertError::MissingField("title"));
        }
        match self.severity.to_lowercase().as_str() {
            "low" | "medium" | "high" | "critical" => {}
            other => return Err(AlertError::Severity(other.to_string())),
        }
        let subject = self.subject.trim();
        if !subject.is_empty() && !is_path_segment(subject) {
            return Err(AlertError::Subject(self.subject.clone()));
        }
        Ok(())
    }

    pub fn into_incident(self) -> Incident {
        let subject = if self.subject.trim().is_empty() {
            DEFAULT_SUBJECT.to_string()
        } else {
            self.subject.trim().to_string()
        };
        let id = if self.id.starts_with("inc-") {
            self.id.clone()
        } else {
            format!("inc-{}", self.id)
        };

        Incident::new(IncidentCategory::from_signal(&self.title), subject)
            .with_id(id)
            .with_detected_at(self.occurred_at)
            .with_context("source", serde_json::json!(self.source))
            .with_context("alert_id", serde_json::json!(self.id))
            .with_context("title", serde_json::json!(self.title))
            .with_context("severity", serde_json::json!(self.severity.to_lowercase()))
            .with_context("tags", serde_json::json!(self.tags))
    }
}

/// Fresh alert id for payloads that carry none.
pub fn fallback_alert_id() -> String {
    generate_id().trim_start_matches("inc-").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> CanonicalAlert {
        CanonicalAlert {
            schema: ALERT_SCHEMA_V1.into(),
            id: "a-17".into(),
            title: "p99 latency above threshold".into(),
            severity: "High".into(),
            tags: vec!["env:prod".into()],
            source: "generic".into(),
            subject: "payments".into(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn simulated_source_yields_once() {
        let mut source = SimulatedSource::new(IncidentCategory::LatencySpike)
            .with_id("inc-demo0001")
            .with_subject("checkout");
        let first = source.next().expect("incident");
        assert_eq!(first.id, "inc-demo0001");
        assert_eq!(first.context.get("source"), Some(&serde_json::json!("simulated")));
        assert!(source.next().is_none());
    }

    #[test]
    fn channel_source_ends_when_senders_drop() {
        let (tx, mut source) = incident_channel();
        tx.send(Incident::new(IncidentCategory::CrashLoop, "api").with_id("inc-x"))
            .expect("send");
        drop(tx);
        assert_eq!(source.next().map(|i| i.id), Some("inc-x".to_string()));
        assert!(source.next().is_none());
    }

    #[test]
    fn validates_alerts() {
        assert!(alert().validate().is_ok());

        let mut bad = alert();
        bad.schema = "alert.v0".into();
        assert!(matches!(bad.validate(), Err(AlertError::Schema(_))));

        let mut bad = alert();
        bad.title = "  ".into();
        assert!(matches!(bad.validate(), Err(AlertError::MissingField("title"))));

        let mut bad = alert();
        bad.severity = "urgent".into();
        assert!(matches!(bad.validate(), Err(AlertError::Severity(s)) if s == "urgent"));

        let mut bad = alert();
        bad.subject = "checkout/../../admin".into();
        assert!(matches!(bad.validate(), Err(AlertError::Subject(_))));
    }

    #[test]
    fn alert_becomes_incident() {
        let incident = alert().into_incident();
        assert_eq!(incident.id, "inc-a-17");
        assert_eq!(incident.subject, "payments");
        assert_eq!(incident.category, IncidentCategory::LatencySpike);
        assert_eq!(incident.context.get("severity"), Some(&serde_json::json!("high")));
    }
}
