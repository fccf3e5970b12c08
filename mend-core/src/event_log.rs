use crate::error::RecordError;
use crate::incident::Incident;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    IncidentDetected,
    DiagnosisProduced,
    PlanSelected,
    Escalated,
    ActionsExecuted,
    ActionsFailed,
    RecoveryVerified,
    RecoveryFailed,
    ReportPublished,
}

impl EventType {
    /// Events after which an incident needs no further automated work.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::Escalated
                | EventType::ActionsFailed
                | EventType::RecoveryVerified
                | EventType::RecoveryFailed
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<i64>,
    pub incident_id: String,
    pub event_type: EventType,
    pub description: String,
    pub details: Option<serde_json::Value>,
    pub timestamp: String,
}

impl Event {
    pub fn new(incident_id: &str, event_type: EventType, description: impl Into<String>) -> Self {
        Self {
            id: None,
            incident_id: incident_id.to_string(),
            event_type,
            description: description.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Best-effort persistence of incidents and stage events.
pub trait Recorder: Send + Sync {
    fn record(&self, incident: &Incident) -> Result<(), RecordError>;

    fn append(&self, _event: &Event) -> Result<(), RecordError> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Clone, Debug, Default)]
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn record(&self, _incident: &Incident) -> Result<(), RecordError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct EventLog {
    db_path: Arc<PathBuf>,
}

impl EventLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                incident_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                description TEXT NOT NULL,
                details TEXT,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_incident ON events(incident_id);
            CREATE INDEX IF NOT EXISTS idx_events_ts ON events(timestamp);
            ",
        )?;

        Ok(Self {
            db_path: Arc::new(db_path),
        })
    }

    fn connect(&self) -> Result<Connection, RecordError> {
        Ok(Connection::open(&*self.db_path)?)
    }

    pub fn append_event(&self, event: &Event) -> Result<i64, RecordError> {
        let conn = self.connect()?;
        let event_type = serde_json::to_string(&event.event_type)?;
        let details = event
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO events (incident_id, event_type, description, details, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.incident_id,
                event_type,
                event.description,
                details,
                event.timestamp,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    pub fn events_for_incident(&self, incident_id: &str) -> Result<Vec<Event>, RecordError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, incident_id, event_type, description, details, timestamp
             FROM events
             WHERE incident_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![incident_id], map_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn events_after(&self, after_id: i64) -> Result<Vec<Event>, RecordError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, incident_id, event_type, description, details, timestamp
             FROM events
             WHERE id > ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![after_id], map_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Incidents with no terminal event yet.
    pub fn active_incidents(&self) -> Result<Vec<String>, RecordError> {
        let conn = self.connect()?;
        let mut all = BTreeSet::new();
        let mut finished = BTreeSet::new();

        let mut stmt = conn.prepare("SELECT incident_id, event_type FROM events")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (incident_id, event_type) = row?;
            let event_type: EventType = serde_json::from_str(&event_type)?;
            if event_type.is_terminal() {
                finished.insert(incident_id.clone());
            }
            all.insert(incident_id);
        }

        Ok(all.difference(&finished).cloned().collect())
    }

    pub fn all_incidents(&self) -> Result<Vec<String>, RecordError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT incident_id
             FROM events
             GROUP BY incident_id
             ORDER BY MAX(id) DESC",
        )?;

        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn latest_event_id(&self) -> Result<Option<i64>, RecordError> {
        let conn = self.connect()?;
        Ok(conn
            .query_row("SELECT MAX(id) FROM events", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten())
    }
}

impl Recorder for EventLog {
    fn record(&self, incident: &Incident) -> Result<(), RecordError> {
        let event = Event::new(
            &incident.id,
            EventType::IncidentDetected,
            format!("{} on {}", incident.category, incident.subject),
        )
        .with_details(serde_json::to_value(incident)?);
        self.append_event(&event).map(|_| ())
    }

    fn append(&self, event: &Event) -> Result<(), RecordError> {
        self.append_event(event).map(|_| ())
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let event_type_str: String = row.get(2)?;
    let details_str: Option<String> = row.get(4)?;

    let event_type: EventType = serde_json::from_str(&event_type_str).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
    })?;

    let details = details_str
        .map(|s| {
            serde_json::from_str(&s).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(err))
            })
        })
        .transpose()?;

    Ok(Event {
        id: row.get(0)?,
        incident_id: row.get(1)?,
        event_type,
        description: row.get(3)?,
        details,
        timestamp: row.get(5)?,
    })
}

#[cfg(test)]
pub(crate) fn test_db_path(name: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    std::env::temp_dir()
        .join("mend-tests")
        .join(format!("{name}-{nanos}.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::IncidentCategory;

    #[test]
    fn record_and_query_roundtrip() {
        let log = EventLog::open(test_db_path("roundtrip")).expect("open");
        let incident = Incident::new(IncidentCategory::CrashLoop, "payments").with_id("inc-a");
        log.record(&incident).expect("record");

        let events = log.events_for_incident("inc-a").expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::IncidentDetected);
        assert_eq!(events[0].description, "crash_loop on payments");

        let details = events[0].details.clone().expect("details");
        let back: Incident = serde_json::from_value(details).expect("incident");
        assert_eq!(back, incident);
    }

    #[test]
    fn events_after_tracks_incremental_stream() {
        let log = EventLog::open(test_db_path("events-after")).expect("open");
        let a = log
            .append_event(&Event::new("inc-a", EventType::IncidentDetected, "detected"))
            .expect("append a");
        let b = log
            .append_event(&Event::new("inc-a", EventType::PlanSelected, "plan"))
            .expect("append b");

        let events = log.events_after(a).expect("events after");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, Some(b));
        assert_eq!(log.latest_event_id().expect("latest"), Some(b));
    }

    #[test]
    fn active_incidents_excludes_finished_runs() {
        let log = EventLog::open(test_db_path("active")).expect("open");
        for event in [
            Event::new("inc-1", EventType::IncidentDetected, "detected"),
            Event::new("inc-1", EventType::RecoveryVerified, "recovered"),
            Event::new("inc-2", EventType::IncidentDetected, "detected"),
            Event::new("inc-3", EventType::IncidentDetected, "detected"),
            Event::new("inc-3", EventType::Escalated, "escalated"),
        ] {
            log.append(&event).expect("append");
        }

        assert_eq!(log.active_incidents().expect("active"), vec!["inc-2".to_string()]);
        assert_eq!(
            log.all_incidents().expect("all"),
            vec!["inc-3".to_string(), "inc-2".to_string(), "inc-1".to_string()]
        );
    }

    #[test]
    fn empty_log_has_no_latest_id() {
        let log = EventLog::open(test_db_path("empty")).expect("open");
        assert_eq!(log.latest_event_id().expect("latest"), None);
    }
}
