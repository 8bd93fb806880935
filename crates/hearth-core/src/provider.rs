//! Provider contracts
//!
//! Two seams: [`ChatClient`] is the low-level streaming turn against one
//! reasoning engine with native tool calling (driven by the agentic loop),
//! and [`ProviderAdapter`] is the common `chat`/`resume` contract all three
//! provider shapes expose to the transport layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::event::AgentCallbacks;
use crate::message::Message;
use crate::tool::{PendingConfirmation, ToolCall, ToolSchema};

/// Token usage statistics accumulated over one loop invocation
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One completed engine turn: accumulated text, any tool calls, usage
#[derive(Clone, Debug, Default)]
pub struct EngineTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

/// A reasoning engine with native structured tool calling.
///
/// Implementations stream text deltas to the callbacks as they arrive and
/// return the assembled turn. When `tools` is empty the engine request must
/// omit tool definitions entirely.
#[async_trait]
pub trait ChatClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Context window size in tokens
    fn context_window(&self) -> u32;

    async fn stream_turn(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSchema],
        callbacks: &dyn AgentCallbacks,
        cancel: &CancellationToken,
    ) -> Result<EngineTurn>;
}

/// Which provider shape handled (or should handle) a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Native structured tool calls
    Structured,
    /// Free-text tagged tool calls
    Tagged,
    /// No tool access
    Plain,
}

impl ProviderKind {
    /// Whether this shape can invoke tools at all
    pub fn is_capable(self) -> bool {
        !matches!(self, ProviderKind::Plain)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Structured => write!(f, "structured"),
            ProviderKind::Tagged => write!(f, "tagged"),
            ProviderKind::Plain => write!(f, "plain"),
        }
    }
}

/// Which providers are reachable, with capable kinds in preference order
#[derive(Clone, Debug)]
pub struct ProviderAvailability {
    /// Capable providers, most preferred first
    pub capable: Vec<ProviderKind>,
    /// Whether the plain-text fallback is reachable
    pub plain: bool,
}

impl ProviderAvailability {
    pub fn best_capable(&self) -> Option<ProviderKind> {
        self.capable.first().copied()
    }

    pub fn has_capable(&self) -> bool {
        !self.capable.is_empty()
    }
}

impl Default for ProviderAvailability {
    fn default() -> Self {
        Self {
            capable: vec![ProviderKind::Structured, ProviderKind::Tagged],
            plain: true,
        }
    }
}

/// Common contract for all three provider shapes.
///
/// `chat` runs one full agentic interaction; a non-`None` return is a
/// suspended Confirm-tier call awaiting `resume`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Cheap reachability check (credentials present, endpoint configured)
    fn reachable(&self) -> bool;

    async fn chat(
        &self,
        messages: Vec<Message>,
        system_prompt: &str,
        callbacks: &dyn AgentCallbacks,
        cancel: &CancellationToken,
        override_active: bool,
    ) -> Result<Option<PendingConfirmation>>;

    async fn resume(
        &self,
        pending: PendingConfirmation,
        confirmed: bool,
        system_prompt: &str,
        callbacks: &dyn AgentCallbacks,
        cancel: &CancellationToken,
    ) -> Result<Option<PendingConfirmation>>;
}
