//! # hearth-core
//!
//! Orchestration core of the Hearth infrastructure assistant: the agentic
//! reasoning loop, the tiered tool-safety gate, the message router, and the
//! session context manager.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Agent (reasoning loop)                   │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │   Router   │  │  Tier Gate   │  │  ChatClient          │  │
//! │  │ (per msg)  │──│ (per call)   │──│  (Strategy)          │  │
//! │  └────────────┘  └──────────────┘  └──────────────────────┘  │
//! │         ┌──────────────────────────────┐                     │
//! │         │   SessionContextManager      │                     │
//! │         │   (budget + summarization)   │                     │
//! │         └──────────────────────────────┘                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `ChatClient` trait abstracts the reasoning engine; `ProviderAdapter`
//! is the common contract the three provider shapes (structured, tagged,
//! plain) expose to the transport layer. Tool execution lives behind the
//! `ToolGateway` trait; this crate classifies and gates, it never touches
//! infrastructure itself.

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod gateway;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod router;
pub mod tier;
pub mod tool;

pub use config::{ContextConfig, CoreConfig, LoopConfig};
pub use context::{EngineSummarizer, SessionContext, SessionContextManager, Summarizer};
pub use error::{AgentError, Result};
pub use event::{AgentCallbacks, NullCallbacks};
pub use gateway::{CallSource, GatewayResult, ToolGateway};
pub use message::{Message, Role};
pub use provider::{
    ChatClient, EngineTurn, ProviderAdapter, ProviderAvailability, ProviderKind, TokenUsage,
};
pub use reasoning::Agent;
pub use router::{route, RoutingDecision};
pub use tier::{tier, Tier};
pub use tool::{PendingConfirmation, ToolCall, ToolCatalog, ToolResult, ToolSchema};
