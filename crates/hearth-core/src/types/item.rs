//! Queued work item.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::ParsedAction;

/// One unit of queued work: a parsed action plus execution metadata.
///
/// `attempts` is mutated in place by the single task driving this item's
/// retry loop; the item is discarded once execution resolves.
#[derive(Debug, Clone)]
pub struct ActionItem {
    pub action: ParsedAction,
    /// Caller-provided key-value map, echoed into template rendering.
    pub context: Value,
    pub retry_on_failure: bool,
    /// Attempt counter; incremented once per attempt including the first.
    pub attempts: u32,
    pub queued_at: DateTime<Utc>,
    pub execution_id: String,
    /// Execution id of the composite parent, for log correlation only.
    pub parent_action_id: Option<String>,
}

impl ActionItem {
    /// Create a new item with a generated execution id.
    pub fn new(action: ParsedAction, context: Value) -> Self {
        Self {
            action,
            context,
            retry_on_failure: true,
            attempts: 0,
            queued_at: Utc::now(),
            execution_id: Uuid::new_v4().to_string(),
            parent_action_id: None,
        }
    }

    /// Override the generated execution id.
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    /// Enable or disable retries for this item.
    pub fn with_retry(mut self, retry_on_failure: bool) -> Self {
        self.retry_on_failure = retry_on_failure;
        self
    }

    /// Derive a child item for one node of a composite action.
    ///
    /// The child inherits the context and retry flag, gets a fresh
    /// execution id, and records this item as its parent.
    pub fn child(&self, action: ParsedAction) -> Self {
        Self {
            action,
            context: self.context.clone(),
            retry_on_failure: self.retry_on_failure,
            attempts: 0,
            queued_at: Utc::now(),
            execution_id: Uuid::new_v4().to_string(),
            parent_action_id: Some(self.execution_id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_inherits_context_and_retry_flag() {
        let parent = ActionItem::new(
            ParsedAction::Sequence {
                actions: vec![ParsedAction::delay(0.1)],
            },
            json!({"room": "kitchen"}),
        )
        .with_retry(false)
        .with_execution_id("parent-1");

        let child = parent.child(ParsedAction::delay(0.1));
        assert_eq!(child.context, json!({"room": "kitchen"}));
        assert!(!child.retry_on_failure);
        assert_eq!(child.parent_action_id.as_deref(), Some("parent-1"));
        assert_ne!(child.execution_id, parent.execution_id);
        assert_eq!(child.attempts, 0);
    }
}
