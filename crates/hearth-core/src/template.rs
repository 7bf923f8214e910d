//! Template engine seam.
//!
//! Rendering `{{ ... }}` templates is an external concern. The executor uses
//! it for two things: templated string values inside service-call data, and
//! `template` conditions in `choose` branches. A render failure is never
//! fatal; callers fall back to the raw template string.

use serde_json::Value;

use crate::error::TemplateError;

/// Renders a template string against an action's context map.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> Result<String, TemplateError>;
}

/// No-op engine: returns the template unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTemplateEngine;

impl TemplateEngine for NoopTemplateEngine {
    fn render(&self, template: &str, _context: &Value) -> Result<String, TemplateError> {
        Ok(template.to_string())
    }
}
