//! # hearth-providers
//!
//! The three provider shapes behind hearth's [`ProviderAdapter`] contract:
//!
//! - **structured**: Anthropic-style messages API with native tool calling,
//!   driven by the core agentic loop
//! - **tagged**: OpenAI-compatible endpoints without native tool calling;
//!   tool calls travel as `<tool_call>` blocks in plain text
//! - **plain**: local Ollama, conversational only, never touches tools
//!
//! [`ProviderAdapter`]: hearth_core::ProviderAdapter

pub mod config;
pub mod sse;
pub mod structured;
pub mod tagged;

#[cfg(feature = "ollama")]
pub mod plain;

pub use config::{PlainConfig, StructuredConfig, TaggedConfig};
pub use structured::{AnthropicClient, StructuredProvider};
pub use tagged::{parse_tagged_calls, TaggedClient, TaggedProvider};

#[cfg(feature = "ollama")]
pub use plain::PlainProvider;
