//! Error taxonomy shared by the parser and the executor.
//!
//! Structural errors (`ParseError`, `ExecuteError::InvalidAction`) are never
//! retried; transient errors (`ExecuteError::ServiceCall`) go through the
//! backoff policy and convert to `RetryExhausted` once the attempt budget is
//! gone. Control flow is `Result`-valued end to end.

use serde_json::Value;
use thiserror::Error;

pub use crate::state::StateError;

/// Structural errors raised while normalizing an automation description.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("automation source is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("automation description must be a mapping")]
    NotAMapping,
    #[error("malformed service action '{0}': expected \"domain.service\"")]
    MalformedService(String),
    #[error("unsupported delay value: {0}")]
    InvalidDelay(String),
}

/// Transport-level failure reported by a `ServiceGateway` implementation.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Template rendering failure; call sites fall back to the raw template
/// string instead of failing the action.
#[derive(Debug, Error)]
#[error("template rendering failed: {0}")]
pub struct TemplateError(pub String);

/// Execution-time errors for one action item.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Well-formed node missing required fields; never retried.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// Wraps a gateway failure; eligible for retry under backoff.
    #[error("service call failed: {message}")]
    ServiceCall {
        message: String,
        /// Whatever the gateway reported, kept for diagnostics.
        response_data: Option<Value>,
    },

    /// Retry budget exhausted for a retryable failure.
    #[error("retries exhausted after {attempts} attempt(s): {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// Illegal lifecycle transition in the driving code.
    #[error(transparent)]
    State(#[from] StateError),

    /// The executor has been shut down and no longer accepts work.
    #[error("executor is not accepting new work")]
    Closed,
}

impl ExecuteError {
    /// Convenience: wrap a gateway error for the retry path.
    pub fn service_call(error: &GatewayError) -> Self {
        Self::ServiceCall {
            message: error.to_string(),
            response_data: Some(Value::String(error.to_string())),
        }
    }

    /// Whether the standard backoff policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceCall { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_service_call_errors_are_retryable() {
        let transient = ExecuteError::service_call(&GatewayError::Transport("reset".into()));
        assert!(transient.is_retryable());

        assert!(!ExecuteError::InvalidAction("no domain".into()).is_retryable());
        assert!(!ExecuteError::Closed.is_retryable());
        assert!(!ExecuteError::RetryExhausted {
            attempts: 4,
            last_error: "boom".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_service_call_error_carries_response_data() {
        let error = ExecuteError::service_call(&GatewayError::Timeout(5000));
        match error {
            ExecuteError::ServiceCall { response_data, .. } => {
                assert!(response_data.is_some());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
