//! Execution result types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal result of one executed action item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRunResult {
    pub success: bool,
    /// Execution id of the item this result belongs to.
    pub action_id: String,
    pub execution_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// HTTP status of the final service call, when the action was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
    pub attempts: u32,
}

/// Aggregate outcome of a batch run.
///
/// `total_time_ms` is the wall-clock time of the whole batch call, not the
/// sum of per-item execution times.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_actions: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_time_ms: f64,
    pub results: Vec<ActionRunResult>,
    pub errors: Vec<String>,
}

impl BatchSummary {
    /// Tally one terminal result into the summary.
    pub fn record(&mut self, result: ActionRunResult) {
        if result.success {
            self.successful += 1;
        } else {
            self.failed += 1;
            if let Some(error) = &result.error {
                self.errors.push(format!("{}: {}", result.action_id, error));
            }
        }
        self.results.push(result);
    }

    /// Record an action that never produced a result.
    pub fn record_error(&mut self, action_id: &str, error: impl std::fmt::Display) {
        self.failed += 1;
        self.errors.push(format!("{}: {}", action_id, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(success: bool, id: &str) -> ActionRunResult {
        ActionRunResult {
            success,
            action_id: id.to_string(),
            execution_time_ms: 1.0,
            error: (!success).then(|| "boom".to_string()),
            status_code: None,
            response_data: None,
            attempts: 1,
        }
    }

    #[test]
    fn test_record_tallies_successes_and_failures() {
        let mut summary = BatchSummary {
            total_actions: 3,
            ..Default::default()
        };
        summary.record(result(true, "a"));
        summary.record(result(false, "b"));
        summary.record_error("c", "queue closed");

        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.errors, vec!["b: boom", "c: queue closed"]);
    }
}
