//! Read-only view over the event log.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use mend_core::error::RecordError;
use mend_core::event_log::{Event, EventLog};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct IncidentIndex {
    /// Most recently touched first.
    pub all: Vec<String>,
    /// No terminal event yet.
    pub active: Vec<String>,
    pub latest_event_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub after: i64,
}

pub fn incidents_router(log: EventLog) -> Router {
    Router::new()
        .route("/api/incidents", get(list_incidents))
        .route("/api/incidents/:id/events", get(incident_events))
        .route("/api/events", get(events_after))
        .with_state(log)
}

async fn list_incidents(State(log): State<EventLog>) -> Result<Json<IncidentIndex>, StatusCode> {
    blocking(log, |log| {
        Ok(IncidentIndex {
            all: log.all_incidents()?,
            active: log.active_incidents()?,
            latest_event_id: log.latest_event_id()?,
        })
    })
    .await
}

async fn incident_events(
    State(log): State<EventLog>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Event>>, StatusCode> {
    let events = blocking(log, move |log| log.events_for_incident(&id)).await?;
    if events.0.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(events)
}

async fn events_after(
    State(log): State<EventLog>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>, StatusCode> {
    blocking(log, move |log| log.events_after(query.after)).await
}

async fn blocking<T, F>(log: EventLog, query: F) -> Result<Json<T>, StatusCode>
where
    T: Send + 'static,
    F: FnOnce(&EventLog) -> Result<T, RecordError> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || query(&log))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    result.map(Json).map_err(|err| {
        tracing::warn!(error = %err, "event log query failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
