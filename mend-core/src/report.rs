use crate::diagnosis::{Diagnosis, RecommendedAction};
use crate::error::PublishError;
use crate::incident::Incident;
use crate::recovery::RecoveryStatus;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed lines every timeline starts with.
pub const TIMELINE_PREAMBLE_LEN: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostIncidentReport {
    pub incident_id: String,
    pub root_cause: String,
    pub action_taken: String,
    pub confidence: f64,
    pub recovery_status: RecoveryStatus,
    pub recovery_time_seconds: f64,
    pub prevention_suggestion: String,
    pub timeline: Vec<String>,
}

pub fn build_report(
    incident: &Incident,
    diagnosis: &Diagnosis,
    recovery_seconds: f64,
    status: RecoveryStatus,
    extra_timeline: &[String],
) -> PostIncidentReport {
    let mut timeline = Vec::with_capacity(TIMELINE_PREAMBLE_LEN + extra_timeline.len());
    timeline.push(format!("alert received at {}", incident.detected_at.to_rfc3339()));
    timeline.push(format!("root cause: {}", diagnosis.summary));
    timeline.push(format!("action: {}", diagnosis.recommended_action));
    timeline.push(format!("recovery: {status} in {recovery_seconds:.1}s"));
    timeline.extend(extra_timeline.iter().cloned());

    PostIncidentReport {
        incident_id: incident.id.clone(),
        root_cause: diagnosis.summary.clone(),
        action_taken: diagnosis.recommended_action.as_str().to_string(),
        confidence: diagnosis.confidence,
        recovery_status: status,
        recovery_time_seconds: recovery_seconds,
        prevention_suggestion: prevention_for(diagnosis.recommended_action).to_string(),
        timeline,
    }
}

pub fn prevention_for(action: RecommendedAction) -> &'static str {
    match action {
        RecommendedAction::Rollback => {
            "Gate releases on canary latency and memory checks before full rollout"
        }
        RecommendedAction::Restart => "Add liveness probes so hung instances are recycled automatically",
        RecommendedAction::ScaleUp => "Configure autoscaling on request rate and CPU saturation",
        RecommendedAction::RestartDbPool => {
            "Alert on connection pool saturation and cap per-instance pool size"
        }
        RecommendedAction::Escalate => "Review the incident manually and add a runbook for this failure mode",
    }
}

/// Plain-text rendering used by chat publishers.
pub fn render_text(report: &PostIncidentReport) -> String {
    let mut out = format!(
        "Post-incident report {}\nRoot cause: {}\nAction: {} (confidence {:.2})\nRecovery: {} in {:.1}s\nPrevention: {}\nTimeline:",
        report.incident_id,
        report.root_cause,
        report.action_taken,
        report.confidence,
        report.recovery_status,
        report.recovery_time_seconds,
        report.prevention_suggestion,
    );
    for line in &report.timeline {
        out.push_str("\n  - ");
        out.push_str(line);
    }
    out
}

/// Delivers a finished report. `Ok(false)` means nothing was delivered.
pub trait Publisher: Send + Sync {
    fn publish(&self, report: &PostIncidentReport) -> Result<bool, PublishError>;
}

/// Writes the report to the log only.
#[derive(Clone, Debug, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, report: &PostIncidentReport) -> Result<bool, PublishError> {
        tracing::info!(
            incident_id = %report.incident_id,
            action = %report.action_taken,
            status = %report.recovery_status,
            recovery_secs = report.recovery_time_seconds,
            "no publish channel configured; report logged only\n{}",
            render_text(report)
        );
        Ok(false)
    }
}

/// Posts the rendered report to a Slack incoming webhook.
pub struct SlackPublisher {
    webhook_url: String,
    http: reqwest::blocking::Client,
}

impl SlackPublisher {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, PublishError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            webhook_url: webhook_url.into(),
            http,
        })
    }
}

impl Publisher for SlackPublisher {
    fn publish(&self, report: &PostIncidentReport) -> Result<bool, PublishError> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": render_text(report) }))
            .send()?;
        if !resp.status().is_success() {
            return Err(PublishError::Rejected(resp.status().as_u16()));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::IncidentCategory;
    use chrono::TimeZone;

    fn incident() -> Incident {
        Incident::new(IncidentCategory::LatencySpike, "checkout")
            .with_id("inc-1")
            .with_detected_at(chrono::Utc.with_ymd_and_hms(2025, 2, 11, 10, 5, 0).unwrap())
    }

    fn diagnosis() -> Diagnosis {
        Diagnosis::new("bad deploy v1.4.2", 0.92, RecommendedAction::Rollback, "timeline")
    }

    #[test]
    fn timeline_starts_with_fixed_lines_then_extras() {
        let extra = vec!["escalated: nothing to do".to_string(), "second".to_string()];
        let report = build_report(
            &incident(),
            &diagnosis(),
            6.0,
            RecoveryStatus::Recovered,
            &extra,
        );

        assert_eq!(report.timeline.len(), TIMELINE_PREAMBLE_LEN + 2);
        assert_eq!(report.timeline[0], "alert received at 2025-02-11T10:05:00+00:00");
        assert_eq!(report.timeline[1], "root cause: bad deploy v1.4.2");
        assert_eq!(report.timeline[2], "action: rollback");
        assert_eq!(report.timeline[3], "recovery: recovered in 6.0s");
        assert_eq!(&report.timeline[4..], extra.as_slice());
    }

    #[test]
    fn report_carries_diagnosis_fields() {
        let report = build_report(&incident(), &diagnosis(), 0.0, RecoveryStatus::Unknown, &[]);
        assert_eq!(report.incident_id, "inc-1");
        assert_eq!(report.action_taken, "rollback");
        assert_eq!(report.confidence, 0.92);
        assert_eq!(report.recovery_status, RecoveryStatus::Unknown);
        assert_eq!(report.timeline.len(), TIMELINE_PREAMBLE_LEN);
    }

    #[test]
    fn escalation_still_names_the_action() {
        let d = Diagnosis::new("unclear", 0.1, RecommendedAction::Escalate, "");
        let report = build_report(&incident(), &d, 0.0, RecoveryStatus::Unknown, &[]);
        assert_eq!(report.action_taken, "escalate");
        assert_eq!(report.timeline[2], "action: escalate");
    }

    #[test]
    fn render_text_lists_timeline() {
        let report = build_report(&incident(), &diagnosis(), 6.0, RecoveryStatus::Recovered, &[]);
        let text = render_text(&report);
        assert!(text.starts_with("Post-incident report inc-1"));
        assert!(text.contains("Action: rollback (confidence 0.92)"));
        assert!(text.contains("  - root cause: bad deploy v1.4.2"));
    }

    #[test]
    fn log_publisher_reports_nothing_delivered() {
        let report = build_report(&incident(), &diagnosis(), 6.0, RecoveryStatus::Recovered, &[]);
        assert!(!LogPublisher.publish(&report).expect("publish"));
    }
}
