use crate::error::ConfigError;
use crate::reasoning::LlmConfig;
use crate::recovery::DEFAULT_POLL_INTERVAL;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DIAGNOSIS_RETRIES: u32 = 2;
pub const DEFAULT_VERIFICATION_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_UNVERIFIED_SETTLE: Duration = Duration::from_secs(1);
/// Upper bound for every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Knobs the orchestrator reads for one run.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowConfig {
    pub diagnosis_retries: u32,
    pub verification_timeout: Duration,
    pub poll_interval: Duration,
    /// Elapsed time reported when no health channel exists.
    pub nominal_recovery: Duration,
    pub unverified_settle: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            diagnosis_retries: DEFAULT_DIAGNOSIS_RETRIES,
            verification_timeout: DEFAULT_VERIFICATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            nominal_recovery: Duration::ZERO,
            unverified_settle: DEFAULT_UNVERIFIED_SETTLE,
        }
    }
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.verification_timeout.is_zero() {
            return Err(ConfigError::invalid(VERIFY_TIMEOUT, "must be positive"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid(POLL_INTERVAL, "must be positive"));
        }
        for (key, value) in [
            (VERIFY_TIMEOUT, self.verification_timeout),
            (POLL_INTERVAL, self.poll_interval),
            (NOMINAL_RECOVERY, self.nominal_recovery),
            ("unverified_settle", self.unverified_settle),
        ] {
            if value > MAX_DURATION {
                return Err(ConfigError::invalid(key, "must not exceed 24 hours"));
            }
        }
        Ok(())
    }
}

const DIAGNOSIS_RETRIES: &str = "MEND_DIAGNOSIS_RETRIES";
const VERIFY_TIMEOUT: &str = "MEND_VERIFY_TIMEOUT_SECS";
const POLL_INTERVAL: &str = "MEND_POLL_INTERVAL_SECS";
const NOMINAL_RECOVERY: &str = "MEND_NOMINAL_RECOVERY_SECS";

/// Process-level settings: the workflow knobs plus which collaborators are reachable.
#[derive(Clone, Debug)]
pub struct Settings {
    pub workflow: WorkflowConfig,
    pub health_url: Option<String>,
    pub dashboard_url: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub event_db: PathBuf,
    pub listen: String,
    pub llm: Option<LlmConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workflow: WorkflowConfig::default(),
            health_url: None,
            dashboard_url: None,
            slack_webhook_url: None,
            event_db: PathBuf::from("incidents.db"),
            listen: "0.0.0.0:8080".into(),
            llm: None,
        }
    }
}

impl Settings {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let workflow = WorkflowConfig {
            diagnosis_retries: match get(DIAGNOSIS_RETRIES) {
                Some(v) => v
                    .parse::<u32>()
                    .map_err(|_| ConfigError::invalid(DIAGNOSIS_RETRIES, format!("'{v}' is not a non-negative integer")))?,
                None => defaults.workflow.diagnosis_retries,
            },
            verification_timeout: seconds(get(VERIFY_TIMEOUT), VERIFY_TIMEOUT, defaults.workflow.verification_timeout)?,
            poll_interval: seconds(get(POLL_INTERVAL), POLL_INTERVAL, defaults.workflow.poll_interval)?,
            nominal_recovery: seconds(get(NOMINAL_RECOVERY), NOMINAL_RECOVERY, defaults.workflow.nominal_recovery)?,
            unverified_settle: defaults.workflow.unverified_settle,
        };
        workflow.validate()?;

        Ok(Self {
            workflow,
            health_url: get("MEND_HEALTH_URL"),
            dashboard_url: get("MEND_DASHBOARD_URL"),
            slack_webhook_url: get("MEND_SLACK_WEBHOOK_URL"),
            event_db: get("MEND_EVENT_DB").map(PathBuf::from).unwrap_or(defaults.event_db),
            listen: get("MEND_LISTEN").unwrap_or(defaults.listen),
            llm: llm_from_lookup(&get)?,
        })
    }
}

fn seconds(value: Option<String>, key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let Some(v) = value else {
        return Ok(default);
    };
    let secs = v
        .parse::<f64>()
        .map_err(|_| ConfigError::invalid(key, format!("'{v}' is not a number of seconds")))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ConfigError::invalid(key, format!("'{v}' is out of range")))
}

/// The LLM block is only present when the named API key variable is set.
fn llm_from_lookup(get: &impl Fn(&str) -> Option<String>) -> Result<Option<LlmConfig>, ConfigError> {
    let defaults = LlmConfig::default();
    let api_key_env = get("LLM_API_KEY_ENV").unwrap_or(defaults.api_key_env);
    if get(api_key_env.as_str()).is_none() {
        return Ok(None);
    }

    let temperature = match get("LLM_TEMPERATURE") {
        Some(v) => v
            .parse::<f64>()
            .map_err(|_| ConfigError::invalid("LLM_TEMPERATURE", format!("'{v}' is not a number")))?,
        None => defaults.temperature,
    };

    Ok(Some(LlmConfig {
        provider: get("LLM_PROVIDER").unwrap_or(defaults.provider),
        model: get("LLM_MODEL").unwrap_or(defaults.model),
        api_key_env,
        temperature,
        base_url: get("LLM_BASE_URL"),
    }))
}
