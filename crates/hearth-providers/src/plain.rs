//! Plain provider
//!
//! Local Ollama inference for conversational traffic. No catalogue, no
//! tags, no gate: this shape streams text and never suspends.

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use hearth_core::{
    AgentCallbacks, AgentError, Message, PendingConfirmation, ProviderAdapter, ProviderKind,
    Result, Role, TokenUsage,
};
use ollama_rs::{
    generation::chat::{request::ChatMessageRequest, ChatMessage, MessageRole},
    Ollama,
};

use crate::config::PlainConfig;

pub struct PlainProvider {
    client: Ollama,
    config: PlainConfig,
}

impl PlainProvider {
    pub fn new(config: PlainConfig) -> Self {
        Self {
            client: Ollama::new(&config.host, config.port),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(PlainConfig::from_env())
    }

    fn convert_messages(messages: &[Message], system_prompt: &str) -> Vec<ChatMessage> {
        let mut converted = vec![ChatMessage::new(
            MessageRole::System,
            system_prompt.to_string(),
        )];
        converted.extend(messages.iter().map(|m| {
            let role = match m.role {
                Role::System => MessageRole::System,
                Role::User => MessageRole::User,
                Role::Assistant => MessageRole::Assistant,
                // This shape never produces tool turns; treat any that
                // arrive through shared history as user context
                Role::Tool => MessageRole::User,
            };
            ChatMessage::new(role, m.content.clone())
        }));
        converted
    }
}

#[async_trait]
impl ProviderAdapter for PlainProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Plain
    }

    fn reachable(&self) -> bool {
        !self.config.host.is_empty()
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        system_prompt: &str,
        callbacks: &dyn AgentCallbacks,
        cancel: &CancellationToken,
        _override_active: bool,
    ) -> Result<Option<PendingConfirmation>> {
        let request = ChatMessageRequest::new(
            self.config.model.clone(),
            Self::convert_messages(&messages, system_prompt),
        );

        let mut stream = match self.client.send_chat_messages_stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                let err = AgentError::ProviderUnavailable(e.to_string());
                callbacks.on_error(&err).await;
                return Err(err);
            }
        };

        let mut usage = TokenUsage::default();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    callbacks.on_error(&AgentError::Cancelled).await;
                    return Ok(None);
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(_) => {
                    let err = AgentError::Provider("ollama stream error".into());
                    callbacks.on_error(&err).await;
                    return Err(err);
                }
            };

            if !chunk.message.content.is_empty() {
                callbacks.on_text_delta(&chunk.message.content).await;
            }
            if let Some(data) = chunk.final_data.as_ref() {
                usage.input_tokens = data.prompt_eval_count as u32;
                usage.output_tokens = data.eval_count as u32;
            }
        }

        callbacks.on_done(&usage).await;
        Ok(None)
    }

    async fn resume(
        &self,
        pending: PendingConfirmation,
        _confirmed: bool,
        _system_prompt: &str,
        _callbacks: &dyn AgentCallbacks,
        _cancel: &CancellationToken,
    ) -> Result<Option<PendingConfirmation>> {
        // This shape never creates suspensions, so none can be resumed here
        Err(AgentError::Session(format!(
            "no suspended call '{}' belongs to the plain provider",
            pending.tool_name
        )))
    }
}
