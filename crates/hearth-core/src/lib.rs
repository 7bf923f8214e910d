//! # Hearth Core
//!
//! Core abstractions for the Hearth action execution engine.
//!
//! This crate contains:
//! - The normalized action tree (`ParsedAction`) and work item types
//! - The automation description parser
//! - The per-item lifecycle state machine
//! - Error taxonomy shared by the parser and the executor
//! - Collaborator seams (`ServiceGateway`, `TemplateEngine`)
//!
//! This crate does NOT care about:
//! - How workers are scheduled (see `hearth-runtime`)
//! - How requests reach the control API (see `hearth-client`)
//! - Where configuration comes from (see `hearth-config`)

pub mod error;
pub mod gateway;
pub mod parser;
pub mod state;
pub mod template;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{
        ExecuteError, GatewayError, ParseError, StateError, TemplateError,
    };
    pub use crate::gateway::{GatewayResponse, ServiceGateway};
    pub use crate::parser::{parse_automation, parse_automation_yaml, parse_delay_value};
    pub use crate::state::{ActionState, ActionStateMachine};
    pub use crate::template::{NoopTemplateEngine, TemplateEngine};
    pub use crate::types::{
        ActionItem, ActionRunResult, BatchSummary, Choice, ParsedAction,
    };
}

// Re-export key types at crate root
pub use error::{ExecuteError, GatewayError, ParseError, StateError, TemplateError};
pub use gateway::{GatewayResponse, ServiceGateway};
pub use state::{ActionState, ActionStateMachine};
pub use template::{NoopTemplateEngine, TemplateEngine};
pub use types::{ActionItem, ActionRunResult, BatchSummary, Choice, ParsedAction};
