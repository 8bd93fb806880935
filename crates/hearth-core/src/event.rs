//! Streaming callback surface
//!
//! The transport layer observes the loop through this trait: incremental
//! text, tool lifecycle, suspensions, and terminal events. `on_tool_use` is
//! awaited before the tool runs so a caller can emit an acknowledgement
//! first.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::provider::TokenUsage;
use crate::tier::Tier;

#[async_trait]
pub trait AgentCallbacks: Send + Sync {
    /// A text fragment arrived from the engine
    async fn on_text_delta(&self, text: &str);

    /// A tool is about to execute; the loop waits for this to return
    async fn on_tool_use(
        &self,
        name: &str,
        input: &HashMap<String, serde_json::Value>,
        call_id: &str,
        tier: Tier,
    );

    /// A tool finished (or failed, or timed out)
    async fn on_tool_result(&self, call_id: &str, text: &str, is_error: bool);

    /// A Confirm-tier call suspended the loop
    async fn on_confirmation_needed(
        &self,
        name: &str,
        input: &HashMap<String, serde_json::Value>,
        call_id: &str,
        tier: Tier,
    );

    /// A Forbidden-tier call was refused
    async fn on_blocked(&self, name: &str, reason: &str, tier: Tier);

    /// The loop finished normally
    async fn on_done(&self, usage: &TokenUsage);

    /// The loop terminated with an error
    async fn on_error(&self, error: &AgentError);
}

/// No-op callbacks, for tests and fire-and-forget invocations
pub struct NullCallbacks;

#[async_trait]
impl AgentCallbacks for NullCallbacks {
    async fn on_text_delta(&self, _text: &str) {}
    async fn on_tool_use(
        &self,
        _name: &str,
        _input: &HashMap<String, serde_json::Value>,
        _call_id: &str,
        _tier: Tier,
    ) {
    }
    async fn on_tool_result(&self, _call_id: &str, _text: &str, _is_error: bool) {}
    async fn on_confirmation_needed(
        &self,
        _name: &str,
        _input: &HashMap<String, serde_json::Value>,
        _call_id: &str,
        _tier: Tier,
    ) {
    }
    async fn on_blocked(&self, _name: &str, _reason: &str, _tier: Tier) {}
    async fn on_done(&self, _usage: &TokenUsage) {}
    async fn on_error(&self, _error: &AgentError) {}
}
