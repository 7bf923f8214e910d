//! # Hearth Runtime
//!
//! The orchestration core of the Hearth engine: a fixed pool of worker
//! tasks consumes queued action items from one shared unbounded channel and
//! drives each item through retry-with-backoff against the configured
//! `ServiceGateway`. Composite actions (sequence / parallel / repeat /
//! choose) dispatch recursively through the same per-item retry path.

mod executor;

pub use executor::{ActionExecutor, ExecutionHandle, ExecutorConfig};

// Re-export the core vocabulary so callers can depend on one crate.
pub use hearth_core::{
    ActionItem, ActionRunResult, ActionState, ActionStateMachine, BatchSummary, Choice,
    ExecuteError, GatewayResponse, ParsedAction, ServiceGateway, TemplateEngine,
};
