use crate::planner::{Effect, PlannedAction, CLICK_ROLLBACK};
use std::time::Duration;

/// Carries out a remediation plan in order. `true` only if every step succeeded.
pub trait ActionExecutor: Send + Sync {
    fn execute(&self, plan: &[PlannedAction], subject: &str) -> bool;
}

/// Logs each step and reports success. Used when no remediation channel is configured.
#[derive(Clone, Debug, Default)]
pub struct LoggingExecutor;

impl ActionExecutor for LoggingExecutor {
    fn execute(&self, plan: &[PlannedAction], subject: &str) -> bool {
        for step in plan {
            tracing::info!(
                subject,
                action = %step.action_type,
                target = %step.target,
                params = %serde_json::Value::from_iter(step.parameters.clone()),
                "simulated remediation step"
            );
        }
        true
    }
}

/// Runs each step through a closure, stopping at the first failure.
pub struct StepExecutor<F> {
    run_step: F,
}

impl<F> StepExecutor<F>
where
    F: Fn(&PlannedAction, &str) -> Result<serde_json::Value, String> + Send + Sync,
{
    pub fn new(run_step: F) -> Self {
        Self { run_step }
    }
}

impl<F> ActionExecutor for StepExecutor<F>
where
    F: Fn(&PlannedAction, &str) -> Result<serde_json::Value, String> + Send + Sync,
{
    fn execute(&self, plan: &[PlannedAction], subject: &str) -> bool {
        run_steps(plan, subject, &self.run_step)
    }
}

fn run_steps<F>(plan: &[PlannedAction], subject: &str, run_step: &F) -> bool
where
    F: Fn(&PlannedAction, &str) -> Result<serde_json::Value, String>,
{
    for (index, step) in plan.iter().enumerate() {
        tracing::info!(
            subject,
            step = index,
            action = %step.action_type,
            effect = ?step.effect(),
            "intent"
        );

        match run_step(step, subject) {
            Ok(output) => {
                tracing::info!(subject, step = index, action = %step.action_type, %output, "step succeeded");
            }
            Err(err) => {
                tracing::warn!(subject, step = index, action = %step.action_type, error = %err, "step failed");
                return false;
            }
        }
    }
    true
}

/// Drives the operations dashboard's HTTP API.
pub struct DashboardExecutor {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl DashboardExecutor {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn run_step(&self, step: &PlannedAction, subject: &str) -> Result<serde_json::Value, String> {
        if step.effect() == Effect::Observe {
            return Ok(serde_json::json!({ "observed": step.target }));
        }

        let url = step_url(&self.base_url, step, subject)?;
        let resp = self
            .http
            .post(url.clone())
            .json(&step.parameters)
            .send()
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("{url} returned {status}"));
        }
        resp.json::<serde_json::Value>()
            .or_else(|_| Ok(serde_json::json!({ "status": status.as_u16() })))
    }
}

impl ActionExecutor for DashboardExecutor {
    fn execute(&self, plan: &[PlannedAction], subject: &str) -> bool {
        run_steps(plan, subject, &|step: &PlannedAction, subject: &str| {
            self.run_step(step, subject)
        })
    }
}

/// `{base}/api/services/{subject}/{endpoint}`, with `subject` kept to a single path segment.
fn step_url(base: &str, step: &PlannedAction, subject: &str) -> Result<reqwest::Url, String> {
    if !is_path_segment(subject) {
        return Err(format!("refusing unsafe subject '{subject}'"));
    }
    let endpoint = if step.action_type == CLICK_ROLLBACK {
        "rollback"
    } else {
        step.action_type.as_str()
    };
    if !is_path_segment(endpoint) {
        return Err(format!("refusing unsafe action '{endpoint}'"));
    }

    let mut url = reqwest::Url::parse(base).map_err(|e| format!("bad dashboard url {base}: {e}"))?;
    url.path_segments_mut()
        .map_err(|_| format!("dashboard url {base} cannot carry a path"))?
        .pop_if_empty()
        .extend(["api", "services", subject, endpoint]);
    Ok(url)
}

pub fn is_path_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '?', '#', '%'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::RecommendedAction;
    use crate::planner::plan_for;
    use std::sync::Mutex;

    #[test]
    fn logging_executor_always_succeeds() {
        assert!(LoggingExecutor.execute(&plan_for(RecommendedAction::Restart), "checkout"));
        assert!(LoggingExecutor.execute(&[], "checkout"));
    }

    #[test]
    fn step_executor_preserves_order_and_stops_on_failure() {
        let seen = Mutex::new(Vec::new());
        let exec = StepExecutor::new(|step: &PlannedAction, _subject: &str| {
            seen.lock().expect("lock").push(step.action_type.clone());
            if step.action_type == "restart_instance" {
                Err("boom".to_string())
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        });

        let mut plan = plan_for(RecommendedAction::Restart);
        plan.push(PlannedAction::new("never_reached", "x"));
        assert!(!exec.execute(&plan, "checkout"));
        assert_eq!(
            *seen.lock().expect("lock"),
            vec!["navigate".to_string(), "restart_instance".to_string()]
        );
    }

    #[test]
    fn step_urls_follow_dashboard_routes() {
        let plan = plan_for(RecommendedAction::Rollback);
        assert_eq!(
            step_url("http://dash", &plan[1], "checkout").expect("url").as_str(),
            "http://dash/api/services/checkout/rollback"
        );
        let scale = plan_for(RecommendedAction::ScaleUp);
        assert_eq!(
            step_url("http://dash/", &scale[1], "api").expect("url").as_str(),
            "http://dash/api/services/api/scale_replicas"
        );
    }

    #[test]
    fn subjects_cannot_escape_the_service_path() {
        let plan = plan_for(RecommendedAction::Rollback);
        for subject in ["a/../../admin", "..", ".", "", "x?y=1", "x#frag", "a%2F..", "a\\b"] {
            assert!(step_url("http://dash", &plan[1], subject).is_err(), "{subject}");
        }

        let exec = DashboardExecutor::new("http://127.0.0.1:9").expect("client");
        assert!(!exec.execute(&plan, "checkout/../../admin"));
    }

    #[test]
    fn dashboard_executor_fails_when_unreachable() {
        let exec = DashboardExecutor::new("http://127.0.0.1:9/").expect("client");
        assert!(!exec.execute(&plan_for(RecommendedAction::Rollback), "checkout"));
        // Observation-only steps never touch the network.
        assert!(exec.execute(&[PlannedAction::new("navigate", "deployment_panel")], "checkout"));
    }
}
