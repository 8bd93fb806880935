//! Tagged provider
//!
//! For capable models behind OpenAI-compatible endpoints without native
//! tool calling: the catalogue is injected into the system prompt, the model
//! emits `<tool_call>{...}</tool_call>` blocks in plain text, and this
//! adapter extracts them, gates them through the tier table, and feeds
//! results back as a synthetic user turn wrapped in `<tool_results>`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use hearth_core::config::LoopConfig;
use hearth_core::{
    tier, AgentCallbacks, AgentError, CallSource, Message, PendingConfirmation, ProviderAdapter,
    ProviderKind, Result, Role, Tier, TokenUsage, ToolCall, ToolCatalog, ToolGateway, ToolResult,
};

use crate::config::TaggedConfig;
use crate::sse::{data_payload, SseLineBuffer};

static TOOL_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").expect("static pattern"));

#[derive(Deserialize)]
struct TaggedCallPayload {
    name: String,
    #[serde(default)]
    arguments: HashMap<String, serde_json::Value>,
}

/// Extract tagged tool calls from a completed response.
///
/// Returns the calls plus the remaining narration with every tag stripped.
/// Malformed JSON inside a tag is logged and skipped; the other tags still
/// parse.
pub fn parse_tagged_calls(text: &str) -> (Vec<ToolCall>, String) {
    let mut calls = Vec::new();
    for capture in TOOL_CALL_RE.captures_iter(text) {
        let payload = capture[1].trim();
        match serde_json::from_str::<TaggedCallPayload>(payload) {
            Ok(parsed) => calls.push(ToolCall::new(parsed.name, parsed.arguments)),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed tagged tool call");
            }
        }
    }
    let narration = TOOL_CALL_RE.replace_all(text, "").trim().to_string();
    (calls, narration)
}

#[derive(serde::Serialize)]
struct WireResult<'a> {
    call_id: &'a str,
    output: &'a str,
    is_error: bool,
}

/// Join a result into the turn's trailing results message, or start one
fn fold_result(messages: &mut Vec<Message>, result: ToolResult) {
    match messages.last_mut() {
        Some(last) if last.role == Role::Tool => last.tool_results.push(result),
        _ => messages.push(Message::tool_results(vec![result])),
    }
}

/// Wrap executed results for the synthetic user turn the model reads next
fn format_tool_results(results: &[ToolResult]) -> String {
    let wire: Vec<_> = results
        .iter()
        .map(|r| WireResult {
            call_id: &r.call_id,
            output: &r.text,
            is_error: r.is_error,
        })
        .collect();
    format!(
        "<tool_results>\n{}\n</tool_results>",
        serde_json::to_string_pretty(&wire).unwrap_or_default()
    )
}

/// Streams one buffered completion from a text-only endpoint
#[async_trait]
trait TextStreamer: Send + Sync {
    async fn stream_text(
        &self,
        messages: &[Message],
        system: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, TokenUsage)>;
}

/// OpenAI-compatible chat-completions client
pub struct TaggedClient {
    http: reqwest::Client,
    config: TaggedConfig,
}

impl TaggedClient {
    pub fn new(config: TaggedConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn build_body(&self, messages: &[Message], system: &str) -> serde_json::Value {
        let mut wire = vec![serde_json::json!({"role": "system", "content": system})];
        for message in messages {
            // Tool results become a synthetic user turn at the wire; the
            // endpoint only understands user/assistant/system roles
            let (role, content) = match message.role {
                Role::System => ("system", message.content.clone()),
                Role::Assistant => ("assistant", message.content.clone()),
                Role::User => ("user", message.content.clone()),
                Role::Tool => ("user", format_tool_results(&message.tool_results)),
            };
            wire.push(serde_json::json!({"role": role, "content": content}));
        }
        serde_json::json!({
            "model": self.config.model,
            "messages": wire,
            "stream": true,
            "stream_options": {"include_usage": true},
        })
    }
}

#[async_trait]
impl TextStreamer for TaggedClient {
    async fn stream_text(
        &self,
        messages: &[Message],
        system: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, TokenUsage)> {
        let mut request = self
            .http
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .json(&self.build_body(messages, system));
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => AgentError::Auth(body),
                429 => AgentError::RateLimited(body),
                503 => AgentError::ProviderUnavailable(body),
                _ => AgentError::Provider(format!("HTTP {}: {}", status, body)),
            });
        }

        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();
        let mut text = String::new();
        let mut usage = TokenUsage::default();

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
                if payload == "[DONE]" {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<serde_json::Value>(payload) else {
                    continue;
                };
                if let Some(delta) = event["choices"][0]["delta"]["content"].as_str() {
                    text.push_str(delta);
                }
                if let Some(prompt) = event["usage"]["prompt_tokens"].as_u64() {
                    usage.input_tokens = prompt as u32;
                }
                if let Some(completion) = event["usage"]["completion_tokens"].as_u64() {
                    usage.output_tokens = completion as u32;
                }
            }
        }

        Ok((text, usage))
    }
}

/// The tagged shape: text-protocol tool calls, own loop, same tier gate
pub struct TaggedProvider {
    streamer: Arc<dyn TextStreamer>,
    gateway: Arc<dyn ToolGateway>,
    catalog: Arc<ToolCatalog>,
    config: LoopConfig,
    reachable: bool,
}

impl TaggedProvider {
    pub fn new(
        config: TaggedConfig,
        gateway: Arc<dyn ToolGateway>,
        catalog: Arc<ToolCatalog>,
        loop_config: LoopConfig,
    ) -> Self {
        let reachable = !config.base_url.is_empty();
        Self {
            streamer: Arc::new(TaggedClient::new(config)),
            gateway,
            catalog,
            config: loop_config,
            reachable,
        }
    }

    #[cfg(test)]
    fn with_streamer(
        streamer: Arc<dyn TextStreamer>,
        gateway: Arc<dyn ToolGateway>,
        catalog: Arc<ToolCatalog>,
        config: LoopConfig,
    ) -> Self {
        Self {
            streamer,
            gateway,
            catalog,
            config,
            reachable: true,
        }
    }

    async fn run_loop(
        &self,
        mut messages: Vec<Message>,
        system_prompt: &str,
        callbacks: &dyn AgentCallbacks,
        cancel: &CancellationToken,
        override_active: bool,
    ) -> Result<Option<PendingConfirmation>> {
        let tooled_system = format!("{}\n\n{}", system_prompt, self.catalog.prompt_section());
        let mut total_usage = TokenUsage::default();
        let mut iterations = 0;

        loop {
            iterations += 1;

            if cancel.is_cancelled() {
                callbacks.on_error(&AgentError::Cancelled).await;
                return Ok(None);
            }

            // On the final iteration the catalogue is withheld and tags are
            // not parsed, so whatever comes back is the answer.
            let final_iteration = iterations >= self.config.max_iterations;
            let system = if final_iteration {
                system_prompt
            } else {
                &tooled_system
            };

            let (text, usage) = match self.streamer.stream_text(&messages, system, cancel).await {
                Ok(turn) => turn,
                Err(e) => {
                    callbacks.on_error(&e).await;
                    return Err(e);
                }
            };
            total_usage.add(&usage);

            let (calls, narration) = {
                let (parsed, narration) = parse_tagged_calls(&text);
                if final_iteration && !parsed.is_empty() {
                    tracing::warn!(
                        count = parsed.len(),
                        "engine emitted tool tags on the final iteration; ignored"
                    );
                }
                if final_iteration {
                    (Vec::new(), narration)
                } else {
                    (parsed, narration)
                }
            };

            if calls.is_empty() {
                // Buffered, not streamed: tags must never leak to the user
                callbacks.on_text_delta(&narration).await;
                callbacks.on_done(&total_usage).await;
                return Ok(None);
            }

            if !narration.is_empty() {
                tracing::debug!(
                    chars = narration.len(),
                    "dropping narration around tagged tool calls"
                );
            }

            // Raw text (tags included) stays in history so the model sees
            // its own protocol turns
            let assistant_msg = Message::assistant(text.clone());
            let mut results: Vec<ToolResult> = Vec::new();

            for call in &calls {
                if cancel.is_cancelled() {
                    callbacks.on_error(&AgentError::Cancelled).await;
                    return Ok(None);
                }

                let call_tier = tier(&call.name);
                match call_tier {
                    Tier::Forbidden if !override_active => {
                        let reason = format!(
                            "Tool '{}' is forbidden by policy and was not executed.",
                            call.name
                        );
                        tracing::warn!(tool = %call.name, "blocked forbidden tagged tool call");
                        callbacks.on_blocked(&call.name, &reason, call_tier).await;
                        results.push(ToolResult::err(&call.call_id, reason));
                    }
                    Tier::Confirm if !override_active => {
                        callbacks
                            .on_confirmation_needed(
                                &call.name,
                                &call.arguments,
                                &call.call_id,
                                call_tier,
                            )
                            .await;

                        let mut prior_messages = messages;
                        prior_messages.push(assistant_msg);
                        if !results.is_empty() {
                            prior_messages.push(Message::tool_results(results));
                        }
                        return Ok(Some(PendingConfirmation {
                            tool_name: call.name.clone(),
                            tool_input: call.arguments.clone(),
                            call_id: call.call_id.clone(),
                            assistant_content_so_far: narration,
                            prior_messages,
                        }));
                    }
                    _ => {
                        if call_tier == Tier::AutoLogged || override_active {
                            tracing::info!(
                                tool = %call.name,
                                tier = %call_tier,
                                override_active,
                                "executing tagged tool"
                            );
                        }
                        callbacks
                            .on_tool_use(&call.name, &call.arguments, &call.call_id, call_tier)
                            .await;
                        let result = self.execute_call(call, false, override_active).await;
                        callbacks
                            .on_tool_result(&result.call_id, &result.text, result.is_error)
                            .await;
                        results.push(result);
                    }
                }
            }

            messages.push(assistant_msg);
            messages.push(Message::tool_results(results));
        }
    }

    async fn execute_call(
        &self,
        call: &ToolCall,
        confirmed: bool,
        override_active: bool,
    ) -> ToolResult {
        let execution = self.gateway.execute(
            &call.name,
            &call.arguments,
            CallSource::ReasoningEngine,
            confirmed,
            override_active,
        );

        match tokio::time::timeout(self.config.tool_timeout, execution).await {
            Ok(Ok(result)) => {
                if result.blocked {
                    let reason = result
                        .reason
                        .unwrap_or_else(|| "blocked by the execution gateway".to_string());
                    ToolResult::err(&call.call_id, format!("Tool '{}': {}", call.name, reason))
                } else {
                    ToolResult {
                        call_id: call.call_id.clone(),
                        text: result.text(),
                        is_error: result.is_error,
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(tool = %call.name, error = %e, "tagged tool execution failed");
                ToolResult::err(
                    &call.call_id,
                    format!("Tool '{}' failed: {}", call.name, e.user_message()),
                )
            }
            Err(_) => {
                let secs = self.config.tool_timeout.as_secs();
                tracing::warn!(tool = %call.name, secs, "tagged tool execution timed out");
                ToolResult::err(
                    &call.call_id,
                    format!(
                        "Tool '{}' timed out after {}s. The operation may still \
                         complete in the background.",
                        call.name, secs
                    ),
                )
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for TaggedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tagged
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
        self.run_loop(messages, system_prompt, callbacks, cancel, override_active)
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
        let call = ToolCall {
            name: pending.tool_name,
            arguments: pending.tool_input,
            call_id: pending.call_id,
        };
        let mut messages = pending.prior_messages;

        let result = if confirmed {
            callbacks
                .on_tool_use(&call.name, &call.arguments, &call.call_id, tier(&call.name))
                .await;
            let result = self.execute_call(&call, true, false).await;
            callbacks
                .on_tool_result(&result.call_id, &result.text, result.is_error)
                .await;
            result
        } else {
            let result = ToolResult::ok(
                &call.call_id,
                format!("The user declined to run '{}'.", call.name),
            );
            callbacks
                .on_tool_result(&result.call_id, &result.text, result.is_error)
                .await;
            result
        };

        // Join the turn's earlier results if the suspension captured any
        fold_result(&mut messages, result);
        self.run_loop(messages, system_prompt, callbacks, cancel, false)
            .await
    }
}
