use crate::context::IncidentContext;
use crate::diagnosis::{parse_diagnosis, Diagnosis, RecommendedAction, FALLBACK_DIAGNOSIS};
use crate::error::OracleError;
use crate::incident::Incident;
use rig::client::completion::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use serde::{Deserialize, Serialize};

/// Root-cause reasoning. One call is one attempt; retries live in [`DiagnosisRetry`].
pub trait ReasoningOracle: Send + Sync {
    fn analyze(
        &self,
        incident: &Incident,
        context: &IncidentContext,
    ) -> Result<Diagnosis, OracleError>;
}

impl<T: ReasoningOracle + ?Sized> ReasoningOracle for Box<T> {
    fn analyze(
        &self,
        incident: &Incident,
        context: &IncidentContext,
    ) -> Result<Diagnosis, OracleError> {
        (**self).analyze(incident, context)
    }
}

/// Calls an oracle up to `1 + retries` times and fails closed to [`FALLBACK_DIAGNOSIS`].
pub struct DiagnosisRetry<O> {
    oracle: O,
    retries: u32,
}

impl<O: ReasoningOracle> DiagnosisRetry<O> {
    pub fn new(oracle: O, retries: u32) -> Self {
        Self { oracle, retries }
    }

    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    pub fn diagnose(&self, incident: &Incident, context: &IncidentContext) -> Diagnosis {
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            match self.oracle.analyze(incident, context) {
                Ok(diagnosis) => {
                    tracing::info!(
                        incident_id = %incident.id,
                        attempt,
                        recommended_action = %diagnosis.recommended_action,
                        confidence = diagnosis.confidence,
                        "diagnosis produced"
                    );
                    return diagnosis;
                }
                Err(err) => {
                    tracing::warn!(
                        incident_id = %incident.id,
                        attempt,
                        attempts,
                        error = %err,
                        "reasoning attempt failed"
                    );
                }
            }
        }

        tracing::warn!(incident_id = %incident.id, attempts, "reasoning exhausted; using fallback");
        FALLBACK_DIAGNOSIS.clone()
    }
}

/// Deterministic bad-deploy diagnosis for demos and CI.
#[derive(Clone, Debug, Default)]
pub struct StubOracle;

impl ReasoningOracle for StubOracle {
    fn analyze(
        &self,
        incident: &Incident,
        _context: &IncidentContext,
    ) -> Result<Diagnosis, OracleError> {
        Ok(Diagnosis::new(
            format!(
                "{} latency increased after deployment v1.4.2. Logs show memory allocation \
                 failure; likely a memory leak in the latest release.",
                incident.subject
            ),
            0.92,
            RecommendedAction::Rollback,
            "Logs and deployment timeline point to v1.4.2; rollback is lowest risk.",
        ))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f64,
    /// Overrides the provider's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: 0.2,
            base_url: None,
        }
    }
}

const PREAMBLE: &str = "You are a site reliability engineer diagnosing a production incident. \
Reply with a single JSON object and nothing else.\n\
Keys: \"summary\" (one or two sentences naming the root cause), \"confidence\" (0 to 1), \
\"recommended_action\" (one of rollback, restart, scale_up, restart_db_pool, escalate), \
\"reasoning\" (short justification).\n\
Choose rollback for regressions after a deploy, restart for hung processes, scale_up for \
capacity exhaustion, restart_db_pool for database connection exhaustion, and escalate \
whenever the cause is unclear or acting would be unsafe.";

/// Model-backed oracle. Owns a current-thread runtime so it can be driven from the
/// orchestrator's plain OS thread.
pub struct LlmOracle {
    config: LlmConfig,
    runtime: tokio::runtime::Runtime,
}

impl LlmOracle {
    pub fn new(config: LlmConfig) -> Result<Self, OracleError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { config, runtime })
    }

    fn run_prompt(&self, prompt: &str) -> Result<String, OracleError> {
        let config = &self.config;
        if config.provider.to_lowercase() != "openai" {
            return Err(OracleError::UnsupportedProvider(config.provider.clone()));
        }
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| OracleError::MissingCredential(config.api_key_env.clone()))?;
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(OracleError::Prompt(
                "llm oracle must be called from a blocking thread".into(),
            ));
        }

        self.runtime.block_on(async {
            let mut builder = openai::Client::builder().api_key(&api_key);
            if let Some(base_url) = &config.base_url {
                builder = builder.base_url(base_url);
            }
            let client: openai::Client = builder
                .build()
                .map_err(|e| OracleError::Prompt(format!("openai client error: {e}")))?;

            let agent = client
                .agent(&config.model)
                .preamble(PREAMBLE)
                .temperature(config.temperature)
                .build();

            agent
                .prompt(prompt)
                .await
                .map_err(|e| OracleError::Prompt(e.to_string()))
        })
    }
}

impl ReasoningOracle for LlmOracle {
    fn analyze(
        &self,
        incident: &Incident,
        context: &IncidentContext,
    ) -> Result<Diagnosis, OracleError> {
        let prompt = build_prompt(incident, context)?;
        let raw = self.run_prompt(&prompt)?;
        parse_diagnosis(&raw).ok_or_else(|| OracleError::Unusable(truncate(&raw, 200)))
    }
}

pub fn build_prompt(incident: &Incident, context: &IncidentContext) -> Result<String, OracleError> {
    let deployments = if context.deployments.is_empty() {
        "  (none)".to_string()
    } else {
        context
            .deployments
            .iter()
            .map(|d| format!("  - {} at {} ({})", d.version, d.timestamp, d.status))
            .collect::<Vec<_>>()
            .join("\n")
    };

    Ok(format!(
        "Incident category: {}\n\
         Service: {}\n\
         Detected at: {}\n\
         Signal: {}\n\n\
         Logs:\n{}\n\n\
         Deployment history (newest first):\n{}\n\n\
         Return the JSON diagnosis object only.",
        incident.category,
        incident.subject,
        incident.detected_at.to_rfc3339(),
        serde_json::to_string(&incident.context)?,
        context.logs,
        deployments,
    ))
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
