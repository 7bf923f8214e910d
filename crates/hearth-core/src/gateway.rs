//! Service gateway seam.
//!
//! The outbound REST client is an external collaborator: the engine only
//! needs one request primitive. Implementations are expected to carry their
//! own transport-level retry; the executor's attempt-level retry wraps it
//! (intentional layering, not duplication).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayError;

/// The response surface the executor inspects: HTTP status plus an optional
/// decoded JSON body.
#[derive(Debug, Clone, Default)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl GatewayResponse {
    /// Create a response with no body.
    pub fn new(status: u16) -> Self {
        Self { status, body: None }
    }

    /// Attach a decoded body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// True for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Request primitive against the smart-home control API.
#[async_trait]
pub trait ServiceGateway: Send + Sync {
    /// Issue one request. `body` is serialized as JSON when present.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<GatewayResponse, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_any_2xx() {
        assert!(GatewayResponse::new(200).is_success());
        assert!(GatewayResponse::new(299).is_success());
        assert!(!GatewayResponse::new(199).is_success());
        assert!(!GatewayResponse::new(300).is_success());
        assert!(!GatewayResponse::new(500).is_success());
    }
}
