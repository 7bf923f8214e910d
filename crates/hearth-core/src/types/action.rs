//! Action tree definitions.
//!
//! `ParsedAction` is the normalized form of one automation step. Composite
//! variants own their children exclusively; the parser always produces a
//! fresh tree, so sharing and cycles cannot occur.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One branch of a `choose` composite: the conditions carried verbatim from
/// the automation source plus the actions to run when they all match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub conditions: Vec<Value>,
    #[serde(default)]
    pub sequence: Vec<ParsedAction>,
}

/// Normalized action tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParsedAction {
    /// Pause execution for a fixed number of seconds
    Delay { delay_seconds: f64 },

    /// One outbound service invocation
    ServiceCall {
        /// The original `"domain.service"` string from the source
        action: String,
        domain: String,
        service: String,
        /// Target map (`entity_id` et al.), passed through as-is
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Value>,
        /// Service payload, passed through verbatim
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// Children executed strictly in order, fail-fast
    Sequence { actions: Vec<ParsedAction> },

    /// Children executed concurrently; all run to completion
    Parallel { actions: Vec<ParsedAction> },

    /// Child sequence executed `count` times
    Repeat { count: u32, actions: Vec<ParsedAction> },

    /// First choice whose conditions all match is executed
    Choose { choices: Vec<Choice> },
}

impl ParsedAction {
    /// Create a delay node.
    pub fn delay(delay_seconds: f64) -> Self {
        Self::Delay { delay_seconds }
    }

    /// Create a service-call node from a domain and service pair.
    pub fn service_call(domain: impl Into<String>, service: impl Into<String>) -> Self {
        let domain = domain.into();
        let service = service.into();
        Self::ServiceCall {
            action: format!("{}.{}", domain, service),
            domain,
            service,
            target: None,
            data: None,
        }
    }

    /// Attach a target map to a service-call node; no-op for other kinds.
    pub fn with_target(mut self, value: Value) -> Self {
        if let Self::ServiceCall { target, .. } = &mut self {
            *target = Some(value);
        }
        self
    }

    /// Attach a data payload to a service-call node; no-op for other kinds.
    pub fn with_data(mut self, value: Value) -> Self {
        if let Self::ServiceCall { data, .. } = &mut self {
            *data = Some(value);
        }
        self
    }

    /// Static label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delay { .. } => "delay",
            Self::ServiceCall { .. } => "service_call",
            Self::Sequence { .. } => "sequence",
            Self::Parallel { .. } => "parallel",
            Self::Repeat { .. } => "repeat",
            Self::Choose { .. } => "choose",
        }
    }

    /// Whether this node groups other actions.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Self::Sequence { .. } | Self::Parallel { .. } | Self::Repeat { .. } | Self::Choose { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serde_tag_round_trip() {
        let action = ParsedAction::service_call("light", "turn_on")
            .with_target(json!({"entity_id": "light.kitchen"}));
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "service_call");
        assert_eq!(value["domain"], "light");
        let back: ParsedAction = serde_json::from_value(value).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ParsedAction::delay(1.0).kind(), "delay");
        let composite = ParsedAction::Sequence {
            actions: vec![ParsedAction::delay(0.5)],
        };
        assert_eq!(composite.kind(), "sequence");
        assert!(composite.is_composite());
        assert!(!ParsedAction::delay(0.5).is_composite());
    }
}
