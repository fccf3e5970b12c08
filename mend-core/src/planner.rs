use crate::diagnosis::{Diagnosis, RecommendedAction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Side-effect class of a remediation step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    /// Reads or navigates; safe to repeat.
    Observe,
    /// Changes the running system.
    Mutate,
}

/// One concrete remediation step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action_type: String,
    pub target: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl PlannedAction {
    pub fn new(action_type: &str, target: &str) -> Self {
        Self {
            action_type: action_type.into(),
            target: target.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn effect(&self) -> Effect {
        if self.action_type == NAVIGATE {
            Effect::Observe
        } else {
            Effect::Mutate
        }
    }
}

pub type Plan = Vec<PlannedAction>;

pub const NAVIGATE: &str = "navigate";
pub const CLICK_ROLLBACK: &str = "click_rollback";
pub const ROLLBACK_TARGET_VERSION: &str = "v1.4.1";
pub const SCALE_UP_REPLICAS: u64 = 4;

/// Map a diagnosis to its ordered remediation steps. An empty plan means escalate.
pub fn plan(diagnosis: &Diagnosis) -> Plan {
    plan_for(diagnosis.recommended_action)
}

pub fn plan_for(action: RecommendedAction) -> Plan {
    match action {
        RecommendedAction::Rollback => vec![
            PlannedAction::new(NAVIGATE, "deployment_panel"),
            PlannedAction::new(CLICK_ROLLBACK, "deployment_panel")
                .with_param("to_version", serde_json::json!(ROLLBACK_TARGET_VERSION)),
        ],
        RecommendedAction::Restart => vec![
            PlannedAction::new(NAVIGATE, "service_instances"),
            PlannedAction::new("restart_instance", "service_instances"),
        ],
        RecommendedAction::ScaleUp => vec![
            PlannedAction::new(NAVIGATE, "service_scaling"),
            PlannedAction::new("scale_replicas", "service_scaling")
                .with_param("replicas", serde_json::json!(SCALE_UP_REPLICAS)),
        ],
        RecommendedAction::RestartDbPool => vec![
            PlannedAction::new(NAVIGATE, "db_pool"),
            PlannedAction::new("restart_pool", "db_pool"),
        ],
        RecommendedAction::Escalate => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnosis(action: RecommendedAction) -> Diagnosis {
        Diagnosis::new("summary", 0.8, action, "")
    }

    #[test]
    fn rollback_plan_navigates_then_rolls_back() {
        let steps = plan(&diagnosis(RecommendedAction::Rollback));
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].action_type, NAVIGATE);
        assert_eq!(steps[0].effect(), Effect::Observe);
        assert_eq!(steps[1].action_type, CLICK_ROLLBACK);
        assert_eq!(steps[1].effect(), Effect::Mutate);
        assert_eq!(
            steps[1].parameters.get("to_version"),
            Some(&serde_json::json!("v1.4.1"))
        );
    }

    #[test]
    fn escalate_yields_empty_plan() {
        assert!(plan(&diagnosis(RecommendedAction::Escalate)).is_empty());
    }

    #[test]
    fn every_automated_action_has_steps() {
        for action in RecommendedAction::ALL {
            let steps = plan_for(action);
            if action == RecommendedAction::Escalate {
                continue;
            }
            assert!(!steps.is_empty() && steps.len() <= 2, "{action}");
        }
    }

    #[test]
    fn planning_is_deterministic() {
        for action in RecommendedAction::ALL {
            let d = diagnosis(action);
            assert_eq!(plan(&d), plan(&d));
        }
    }
}
