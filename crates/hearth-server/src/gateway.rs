//! HTTP Tool Execution Gateway
//!
//! Tools run in a separate executor service with the actual infrastructure
//! credentials; this client forwards gated calls to it and maps transport
//! failures into tool errors the loop converts to results.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hearth_core::{AgentError, CallSource, GatewayResult, Result, ToolGateway};

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8700".into(),
            request_timeout: Duration::from_secs(90),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("HEARTH_GATEWAY_URL") {
            config.base_url = v;
        }
        config
    }
}

pub struct HttpToolGateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl HttpToolGateway {
    pub fn new(config: GatewayConfig) -> Self {
        // Longer than the loop's per-tool timeout so the loop's own limit
        // is the one that fires
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    pub fn from_env() -> Self {
        Self::new(GatewayConfig::from_env())
    }
}

#[async_trait]
impl ToolGateway for HttpToolGateway {
    async fn execute(
        &self,
        name: &str,
        args: &HashMap<String, serde_json::Value>,
        source: CallSource,
        confirmed: bool,
        override_active: bool,
    ) -> Result<GatewayResult> {
        let body = serde_json::json!({
            "tool": name,
            "arguments": args,
            "source": source,
            "confirmed": confirmed,
            "override_active": override_active,
        });

        let response = self
            .http
            .post(format!("{}/execute", self.config.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::ToolExecution(format!("gateway unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::ToolExecution(format!(
                "gateway HTTP {}: {}",
                status, body
            )));
        }

        response
            .json::<GatewayResult>()
            .await
            .map_err(|e| AgentError::ToolExecution(format!("malformed gateway response: {}", e)))
    }
}
