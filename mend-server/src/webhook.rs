use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use chrono::{DateTime, Utc};
use mend_core::error::AlertError;
use mend_core::source::{fallback_alert_id, CanonicalAlert, ALERT_SCHEMA_V1, DEFAULT_SUBJECT};
use mend_core::Incident;
use serde_json::Value;
use std::sync::mpsc::Sender;

/// Turns one monitoring system's payload into a [`CanonicalAlert`].
pub trait AlertAdapter: Send + Sync + 'static {
    fn parse(&self, payload: &Value) -> Result<CanonicalAlert, AlertError>;
}

pub struct GenericAdapter;
pub struct AlertmanagerAdapter;

impl AlertAdapter for GenericAdapter {
    fn parse(&self, payload: &Value) -> Result<CanonicalAlert, AlertError> {
        let alert = CanonicalAlert {
            schema: ALERT_SCHEMA_V1.into(),
            id: str_field(payload, &["id", "incident_id"])
                .map(ToString::to_string)
                .unwrap_or_else(fallback_alert_id),
            title: str_field(payload, &["title", "alert_title"])
                .unwrap_or_default()
                .to_string(),
            severity: str_field(payload, &["severity"]).unwrap_or("high").to_string(),
            tags: payload
                .get("tags")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(ToString::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            source: "generic".into(),
            subject: str_field(payload, &["subject", "service"])
                .unwrap_or(DEFAULT_SUBJECT)
                .to_string(),
            occurred_at: timestamp(str_field(payload, &["occurred_at", "timestamp"])),
        };
        alert.validate()?;
        Ok(alert)
    }
}

impl AlertAdapter for AlertmanagerAdapter {
    fn parse(&self, payload: &Value) -> Result<CanonicalAlert, AlertError> {
        let first = payload
            .get("alerts")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .ok_or(AlertError::MissingField("alerts[0]"))?;

        let empty = Value::Object(Default::default());
        let labels = first.get("labels").unwrap_or(&empty);
        let annotations = first.get("annotations").unwrap_or(&empty);

        let title = str_field(annotations, &["summary", "description"])
            .or_else(|| str_field(labels, &["alertname"]))
            .unwrap_or("alertmanager alert")
            .to_string();

        let id = str_field(first, &["fingerprint"])
            .or_else(|| str_field(labels, &["alertname"]))
            .map(ToString::to_string)
            .unwrap_or_else(fallback_alert_id);

        let tags = labels
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| format!("{k}:{s}")))
                    .collect()
            })
            .unwrap_or_default();

        let alert = CanonicalAlert {
            schema: ALERT_SCHEMA_V1.into(),
            id,
            title,
            severity: str_field(labels, &["severity"]).unwrap_or("high").to_string(),
            tags,
            source: "alertmanager".into(),
            subject: str_field(labels, &["service", "job"])
                .unwrap_or(DEFAULT_SUBJECT)
                .to_string(),
            occurred_at: timestamp(str_field(first, &["startsAt"])),
        };
        alert.validate()?;
        Ok(alert)
    }
}

pub fn webhook_router(tx: Sender<Incident>) -> Router {
    Router::new()
        .route("/webhook/generic", post(handle_generic))
        .route("/webhook/alertmanager", post(handle_alertmanager))
        .with_state(tx)
}

pub fn parse_generic(body: &[u8]) -> Result<Incident, AlertError> {
    parse_with_adapter(body, GenericAdapter)
}

pub fn parse_alertmanager(body: &[u8]) -> Result<Incident, AlertError> {
    parse_with_adapter(body, AlertmanagerAdapter)
}

async fn handle_generic(State(tx): State<Sender<Incident>>, body: Bytes) -> StatusCode {
    enqueue(&tx, parse_generic(&body))
}

async fn handle_alertmanager(State(tx): State<Sender<Incident>>, body: Bytes) -> StatusCode {
    enqueue(&tx, parse_alertmanager(&body))
}

fn parse_with_adapter(body: &[u8], adapter: impl AlertAdapter) -> Result<Incident, AlertError> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| AlertError::Malformed(e.to_string()))?;
    Ok(adapter.parse(&payload)?.into_incident())
}

fn enqueue(tx: &Sender<Incident>, incident: Result<Incident, AlertError>) -> StatusCode {
    let incident = match incident {
        Ok(incident) => incident,
        Err(err) => {
            tracing::warn!(error = %err, "rejected alert payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    let incident_id = incident.id.clone();
    match tx.send(incident) {
        Ok(()) => {
            tracing::info!(%incident_id, "incident enqueued");
            StatusCode::ACCEPTED
        }
        Err(_) => {
            tracing::warn!(%incident_id, "orchestrator is not running");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

fn timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}
