//! # Hearth Client
//!
//! Default `ServiceGateway` implementation over reqwest.
//!
//! The gateway owns transport-level retry (connect failures, timeouts);
//! attempt-level retry for failed service calls lives in the executor and
//! deliberately wraps this layer.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use hearth_config::GatewaySettings;
use hearth_core::error::GatewayError;
use hearth_core::gateway::{GatewayResponse, ServiceGateway};

const TRANSPORT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// REST gateway for the smart-home control API.
pub struct RestGateway {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout_ms: u64,
    transport_retries: u32,
}

impl RestGateway {
    /// Create a gateway with default timeout and retry settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        let settings = GatewaySettings {
            base_url: base_url.into(),
            ..GatewaySettings::default()
        };
        Self::from_settings(&settings)
    }

    /// Build a gateway from configuration.
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            client: build_client(settings.timeout_ms),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            timeout_ms: settings.timeout_ms,
            transport_retries: settings.transport_retries,
        }
    }

    /// Set the bearer token for the control API.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Override the request timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self.client = build_client(timeout_ms);
        self
    }

    /// Override the transport-level retry budget.
    pub fn with_transport_retries(mut self, retries: u32) -> Self {
        self.transport_retries = retries;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn map_error(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout(self.timeout_ms)
        } else {
            GatewayError::Transport(error.to_string())
        }
    }
}

fn build_client(timeout_ms: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[async_trait]
impl ServiceGateway for RestGateway {
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<GatewayResponse, GatewayError> {
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| GatewayError::InvalidRequest(format!("invalid HTTP method: {}", method)))?;
        let url = self.endpoint(path);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut request = self.client.request(method.clone(), &url);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    // Non-JSON bodies surface as None; the executor only
                    // needs the status to judge success.
                    let body = response.json::<Value>().await.ok();
                    debug!(url = %url, status, "gateway request completed");
                    return Ok(GatewayResponse { status, body });
                }
                Err(error) if attempt <= self.transport_retries => {
                    warn!(url = %url, %error, attempt, "transport error; retrying request");
                    sleep(TRANSPORT_RETRY_DELAY).await;
                }
                Err(error) => return Err(self.map_error(error)),
            }
        }
    }
}
