//! Error Types

use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Orchestration error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Reasoning engine call failed (network, auth, rate limit)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not configured
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Tool execution failed inside the gateway
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Tool execution exceeded its timeout
    #[error("Tool '{name}' timed out after {secs}s")]
    ToolTimeout { name: String, secs: u64 },

    /// Parse error (e.g. tagged tool call, summarizer response)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Session context error
    #[error("Session error: {0}")]
    Session(String),

    /// Summarization failed; session state was left untouched
    #[error("Summarization error: {0}")]
    Summarization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limited by the reasoning engine
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The caller cancelled the request
    #[error("Cancelled")]
    Cancelled,

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::ProviderUnavailable(_) | AgentError::RateLimited(_) | AgentError::Io(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Provider(msg) => format!("The assistant encountered an error: {}", msg),
            AgentError::ProviderUnavailable(_) => {
                "The assistant is currently unavailable. Please try again.".into()
            }
            AgentError::ToolExecution(msg) => format!("Action failed: {}", msg),
            AgentError::ToolTimeout { name, .. } => {
                format!("The '{}' action took too long and was abandoned.", name)
            }
            AgentError::RateLimited(_) => {
                "Too many requests right now. Please wait a moment.".into()
            }
            AgentError::Auth(_) => "Authentication failed. Please check your credentials.".into(),
            AgentError::Cancelled => "The request was cancelled.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}
