//! Structured provider
//!
//! Native tool-calling over an Anthropic-style messages API with SSE
//! streaming. The agentic loop lives in hearth-core; this file is the
//! [`ChatClient`] wire implementation plus the thin [`ProviderAdapter`]
//! around the loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use hearth_core::{
    Agent, AgentCallbacks, AgentError, ChatClient, EngineTurn, Message, PendingConfirmation,
    ProviderAdapter, ProviderKind, Result, Role, TokenUsage, ToolCall, ToolCatalog, ToolGateway,
    ToolSchema,
};
use hearth_core::config::LoopConfig;

use crate::config::StructuredConfig;
use crate::sse::{data_payload, SseLineBuffer};

/// Messages-API client with SSE streaming and native tool use
pub struct AnthropicClient {
    http: reqwest::Client,
    config: StructuredConfig,
}

impl AnthropicClient {
    pub fn new(config: StructuredConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Convert loop messages to API wire format. History system messages
    /// (the summary block) are folded into the system prompt.
    fn build_body(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSchema],
    ) -> serde_json::Value {
        let mut system = system_prompt.to_string();
        let mut wire = Vec::new();

        for message in messages {
            match message.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push_str("\n\n");
                    }
                    system.push_str(&message.content);
                }
                Role::User => {
                    wire.push(serde_json::json!({
                        "role": "user",
                        "content": message.content,
                    }));
                }
                Role::Assistant => {
                    let mut content = Vec::new();
                    if !message.content.is_empty() {
                        content.push(serde_json::json!({
                            "type": "text",
                            "text": message.content,
                        }));
                    }
                    for call in &message.tool_calls {
                        content.push(serde_json::json!({
                            "type": "tool_use",
                            "id": call.call_id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    wire.push(serde_json::json!({
                        "role": "assistant",
                        "content": content,
                    }));
                }
                Role::Tool => {
                    let content: Vec<_> = message
                        .tool_results
                        .iter()
                        .map(|r| {
                            serde_json::json!({
                                "type": "tool_result",
                                "tool_use_id": r.call_id,
                                "content": r.text,
                                "is_error": r.is_error,
                            })
                        })
                        .collect();
                    wire.push(serde_json::json!({
                        "role": "user",
                        "content": content,
                    }));
                }
            }
        }

        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": system,
            "messages": wire,
            "stream": true,
        });

        // An empty catalogue omits the field entirely, forcing text-only
        if !tools.is_empty() {
            let defs: Vec<_> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema(),
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(defs);
        }

        body
    }

    fn map_status(status: reqwest::StatusCode, body: String) -> AgentError {
        match status.as_u16() {
            401 | 403 => AgentError::Auth(body),
            429 => AgentError::RateLimited(body),
            503 | 529 => AgentError::ProviderUnavailable(body),
            _ => AgentError::Provider(format!("HTTP {}: {}", status, body)),
        }
    }
}

/// Tool-use block being assembled from streamed input_json_delta fragments
struct PartialToolUse {
    id: String,
    name: String,
    json: String,
}

#[async_trait]
impl ChatClient for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn context_window(&self) -> u32 {
        self.config.context_window
    }

    async fn stream_turn(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSchema],
        callbacks: &dyn AgentCallbacks,
        cancel: &CancellationToken,
    ) -> Result<EngineTurn> {
        let body = self.build_body(messages, system_prompt, tools);

        let response = self
            .http
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, body));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();
        let mut turn = EngineTurn::default();
        let mut partials: BTreeMap<u64, PartialToolUse> = BTreeMap::new();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| AgentError::Provider(e.to_string()))?;

            for line in buffer.push(&chunk) {
                let Some(payload) = data_payload(&line) else {
                    continue;
                };
                let Ok(event) = serde_json::from_str::<serde_json::Value>(payload) else {
                    continue;
                };

                match event["type"].as_str().unwrap_or_default() {
                    "message_start" => {
                        turn.usage.input_tokens = event["message"]["usage"]["input_tokens"]
                            .as_u64()
                            .unwrap_or(0) as u32;
                    }
                    "content_block_start" => {
                        let block = &event["content_block"];
                        if block["type"].as_str() == Some("tool_use") {
                            let index = event["index"].as_u64().unwrap_or(0);
                            partials.insert(
                                index,
                                PartialToolUse {
                                    id: block["id"].as_str().unwrap_or_default().to_string(),
                                    name: block["name"].as_str().unwrap_or_default().to_string(),
                                    json: String::new(),
                                },
                            );
                        }
                    }
                    "content_block_delta" => {
                        let delta = &event["delta"];
                        match delta["type"].as_str().unwrap_or_default() {
                            "text_delta" => {
                                if let Some(text) = delta["text"].as_str() {
                                    turn.text.push_str(text);
                                    callbacks.on_text_delta(text).await;
                                }
                            }
                            "input_json_delta" => {
                                let index = event["index"].as_u64().unwrap_or(0);
                                if let (Some(partial), Some(fragment)) =
                                    (partials.get_mut(&index), delta["partial_json"].as_str())
                                {
                                    partial.json.push_str(fragment);
                                }
                            }
                            _ => {}
                        }
                    }
                    "content_block_stop" => {
                        let index = event["index"].as_u64().unwrap_or(0);
                        if let Some(partial) = partials.remove(&index) {
                            let arguments: HashMap<String, serde_json::Value> =
                                if partial.json.trim().is_empty() {
                                    HashMap::new()
                                } else {
                                    serde_json::from_str(&partial.json).map_err(|e| {
                                        AgentError::Parse(format!(
                                            "tool_use input for '{}': {}",
                                            partial.name, e
                                        ))
                                    })?
                                };
                            turn.tool_calls.push(ToolCall {
                                name: partial.name,
                                arguments,
                                call_id: partial.id,
                            });
                        }
                    }
                    "message_delta" => {
                        if let Some(output) = event["usage"]["output_tokens"].as_u64() {
                            turn.usage.output_tokens = output as u32;
                        }
                    }
                    "error" => {
                        let message = event["error"]["message"]
                            .as_str()
                            .unwrap_or("stream error")
                            .to_string();
                        return Err(AgentError::Provider(message));
                    }
                    _ => {}
                }
            }
        }

        Ok(turn)
    }
}

/// The structured shape: native tool calls, core loop pass-through
pub struct StructuredProvider {
    agent: Agent,
    reachable: bool,
}

impl StructuredProvider {
    pub fn new(
        config: StructuredConfig,
        gateway: Arc<dyn ToolGateway>,
        catalog: Arc<ToolCatalog>,
        loop_config: LoopConfig,
    ) -> Self {
        let reachable = !config.api_key.is_empty();
        let client = Arc::new(AnthropicClient::new(config));
        Self {
            agent: Agent::new(client, gateway, catalog, loop_config),
            reachable,
        }
    }
}

#[async_trait]
impl ProviderAdapter for StructuredProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Structured
    }

    fn reachable(&self) -> bool {
        self.reachable
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        system_prompt: &str,
        callbacks: &dyn AgentCallbacks,
        cancel: &CancellationToken,
        override_active: bool,
    ) -> Result<Option<PendingConfirmation>> {
        self.agent
            .run(messages, system_prompt, callbacks, cancel, override_active)
            .await
    }

    async fn resume(
        &self,
        pending: PendingConfirmation,
        confirmed: bool,
        system_prompt: &str,
        callbacks: &dyn AgentCallbacks,
        cancel: &CancellationToken,
    ) -> Result<Option<PendingConfirmation>> {
        self.agent
            .resume(pending, confirmed, system_prompt, callbacks, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_omits_tools_when_empty() {
        let client = AnthropicClient::new(StructuredConfig::default());
        let body = client.build_body(&[Message::user("hi")], "system", &[]);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_history_system_messages_fold_into_system() {
        let client = AnthropicClient::new(StructuredConfig::default());
        let body = client.build_body(
            &[Message::system("Earlier conversation summary: x"), Message::user("hi")],
            "base",
            &[],
        );
        let system = body["system"].as_str().unwrap();
        assert!(system.starts_with("base"));
        assert!(system.contains("summary"));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_tool_results_become_user_turn() {
        let client = AnthropicClient::new(StructuredConfig::default());
        let results = Message::tool_results(vec![hearth_core::ToolResult::ok("c1", "done")]);
        let body = client.build_body(&[results], "", &[]);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"][0]["type"], "tool_result");
        assert_eq!(messages[0]["content"][0]["tool_use_id"], "c1");
    }
}
