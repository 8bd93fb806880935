//! Tool Execution Gateway contract
//!
//! The gateway actually runs tools against external systems (cluster API,
//! home automation, NVR, scheduler). This core consumes the trait and never
//! constructs success results itself, only its own timeout/error wrappers.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tier::Tier;

/// Who asked for this execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSource {
    /// A reasoning engine inside the agentic loop
    ReasoningEngine,
    /// The monitoring subsystem
    Monitor,
    /// A human acting directly
    Human,
    /// External API caller
    Api,
}

/// One content fragment of a gateway result
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Result of a gateway execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayResult {
    /// Output fragments
    #[serde(default)]
    pub content: Vec<GatewayContent>,

    /// Whether the execution failed
    #[serde(default)]
    pub is_error: bool,

    /// Whether the gateway itself refused the call
    #[serde(default)]
    pub blocked: bool,

    /// Refusal/failure explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Tier the gateway applied, if it re-checked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
}

impl GatewayResult {
    /// Flatten content fragments into one text blob for the engine
    pub fn text(&self) -> String {
        if self.content.is_empty() {
            return self
                .reason
                .clone()
                .unwrap_or_else(|| "(no output)".to_string());
        }
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Gateway trait, consumed by the agentic loop and provider adapters.
///
/// `confirmed` is set on resumed Confirm-tier calls so the gateway can skip
/// its own re-confirmation.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        args: &HashMap<String, serde_json::Value>,
        source: CallSource,
        confirmed: bool,
        override_active: bool,
    ) -> Result<GatewayResult>;
}
