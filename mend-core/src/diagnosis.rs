use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Rollback,
    Restart,
    ScaleUp,
    RestartDbPool,
    Escalate,
}

impl RecommendedAction {
    pub const ALL: [RecommendedAction; 5] = [
        RecommendedAction::Rollback,
        RecommendedAction::Restart,
        RecommendedAction::ScaleUp,
        RecommendedAction::RestartDbPool,
        RecommendedAction::Escalate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::Rollback => "rollback",
            RecommendedAction::Restart => "restart",
            RecommendedAction::ScaleUp => "scale_up",
            RecommendedAction::RestartDbPool => "restart_db_pool",
            RecommendedAction::Escalate => "escalate",
        }
    }

    /// Unknown tags map to escalation.
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == tag)
            .unwrap_or(RecommendedAction::Escalate)
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root-cause analysis result. `confidence` is advisory and only travels into the report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub summary: String,
    pub confidence: f64,
    pub recommended_action: RecommendedAction,
    pub rationale: String,
}

impl Diagnosis {
    pub fn new(
        summary: impl Into<String>,
        confidence: f64,
        recommended_action: RecommendedAction,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            summary: summary.into(),
            confidence: clamp_confidence(confidence),
            recommended_action,
            rationale: rationale.into(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        *self == *FALLBACK_DIAGNOSIS
    }
}

pub const FALLBACK_SUMMARY: &str = "Root cause could not be determined; escalation recommended.";
pub const FALLBACK_RATIONALE: &str = "Analysis failed or returned invalid output.";

/// Returned when every reasoning attempt failed.
pub static FALLBACK_DIAGNOSIS: LazyLock<Diagnosis> = LazyLock::new(|| Diagnosis {
    summary: FALLBACK_SUMMARY.to_string(),
    confidence: 0.0,
    recommended_action: RecommendedAction::Escalate,
    rationale: FALLBACK_RATIONALE.to_string(),
});

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Parse model output into a diagnosis. `None` when the text carries no usable summary.
pub fn parse_diagnosis(raw: &str) -> Option<Diagnosis> {
    let cleaned = strip_code_fence(raw.trim());
    if cleaned.is_empty() {
        return None;
    }

    let v: serde_json::Value = serde_json::from_str(cleaned).ok()?;
    let obj = v.as_object()?;

    let summary = obj
        .get("summary")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.trim().is_empty())?
        .to_string();

    let confidence = match obj.get("confidence") {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };

    let recommended_action = obj
        .get("recommended_action")
        .and_then(serde_json::Value::as_str)
        .map(RecommendedAction::from_tag)
        .unwrap_or(RecommendedAction::Escalate);

    let rationale = obj
        .get("reasoning")
        .or_else(|| obj.get("rationale"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();

    Some(Diagnosis::new(summary, confidence, recommended_action, rationale))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. `json`) up to the first newline.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches("json"),
    };
    body.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_json() {
        let raw = r#"{"summary": "Memory leak in v1.4.2", "confidence": 0.9,
            "recommended_action": "rollback", "reasoning": "Logs point to deployment."}"#;
        let d = parse_diagnosis(raw).expect("parse");
        assert_eq!(d.summary, "Memory leak in v1.4.2");
        assert_eq!(d.confidence, 0.9);
        assert_eq!(d.recommended_action, RecommendedAction::Rollback);
        assert_eq!(d.rationale, "Logs point to deployment.");
    }

    #[test]
    fn parse_strips_markdown_fence() {
        let raw = "```json\n{\"summary\": \"Bad deploy\", \"confidence\": 0.8, \"recommended_action\": \"restart\"}\n```";
        let d = parse_diagnosis(raw).expect("parse");
        assert_eq!(d.summary, "Bad deploy");
        assert_eq!(d.recommended_action, RecommendedAction::Restart);
        assert_eq!(d.rationale, "");
    }

    #[test]
    fn parse_rejects_unusable_text() {
        assert!(parse_diagnosis("not json at all").is_none());
        assert!(parse_diagnosis("").is_none());
        assert!(parse_diagnosis("{}").is_none());
        assert!(parse_diagnosis("[1, 2]").is_none());
        assert!(parse_diagnosis(r#"{"summary": "   "}"#).is_none());
    }

    #[test]
    fn unknown_action_maps_to_escalate() {
        let raw = r#"{"summary": "Something broke", "confidence": 0.5, "recommended_action": "reboot_planet"}"#;
        let d = parse_diagnosis(raw).expect("parse");
        assert_eq!(d.recommended_action, RecommendedAction::Escalate);
    }

    #[test]
    fn confidence_is_clamped_and_coerced() {
        let high = parse_diagnosis(r#"{"summary": "x", "confidence": 7}"#).expect("parse");
        assert_eq!(high.confidence, 1.0);
        let text = parse_diagnosis(r#"{"summary": "x", "confidence": "0.25"}"#).expect("parse");
        assert_eq!(text.confidence, 0.25);
        let junk = parse_diagnosis(r#"{"summary": "x", "confidence": "high"}"#).expect("parse");
        assert_eq!(junk.confidence, 0.0);
    }

    #[test]
    fn fallback_is_a_stable_escalation() {
        assert_eq!(FALLBACK_DIAGNOSIS.recommended_action, RecommendedAction::Escalate);
        assert_eq!(FALLBACK_DIAGNOSIS.confidence, 0.0);
        assert_eq!(FALLBACK_DIAGNOSIS.clone(), *FALLBACK_DIAGNOSIS);
        assert!(FALLBACK_DIAGNOSIS.is_fallback());
    }

    #[test]
    fn action_tags_round_trip_through_from_tag() {
        for action in RecommendedAction::ALL {
            assert_eq!(RecommendedAction::from_tag(action.as_str()), action);
        }
    }
}
