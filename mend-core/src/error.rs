//! Error types for each collaborator seam.
//!
//! None of these escape [`crate::workflow::Workflow::run`]; the orchestrator folds
//! them into report lines and a verdict.

/// Failure of a single reasoning-oracle attempt.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("llm prompt failed: {0}")]
    Prompt(String),

    #[error("unusable diagnosis: {0}")]
    Unusable(String),

    #[error("unsupported llm provider '{0}'")]
    UnsupportedProvider(String),

    #[error("missing env var {0}")]
    MissingCredential(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("llm runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Failure of a single health query. Swallowed by the poller.
#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("health request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("health endpoint returned {0}")]
    Status(u16),

    #[error("malformed health response: {0}")]
    Malformed(String),
}

/// Failure of a whole verification call.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("verification unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publish request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("publish rejected with status {0}")]
    Rejected(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("log context unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("failed to initialise {component}: {reason}")]
    Setup {
        component: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Inbound alert payload rejected before it becomes an incident.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("unsupported schema '{0}'")]
    Schema(String),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("invalid severity '{0}'")]
    Severity(String),

    #[error("subject '{0}' is not a plain service name")]
    Subject(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}
