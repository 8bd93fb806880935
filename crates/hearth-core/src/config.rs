//! Core configuration
//!
//! Reference values live here; everything can be overridden from the
//! environment.

use std::time::Duration;

/// Configuration for the agentic loop
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Hard cap on reasoning iterations
    pub max_iterations: usize,

    /// Timeout for each individual tool execution
    pub tool_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tool_timeout: Duration::from_secs(60),
        }
    }
}

/// Configuration for the session context manager
#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// Engine context window in tokens
    pub context_window: u32,

    /// Tokens reserved for the engine's response
    pub response_reserve: u32,

    /// Share of the remaining budget given to the summary block (the rest
    /// goes to recent messages)
    pub summary_ratio: f32,

    /// Summarize once a session holds more messages than this
    pub summarize_threshold: usize,

    /// Messages kept verbatim when summarizing
    pub keep_recent: usize,

    /// Word cap for the narrative summary
    pub summary_word_cap: usize,

    /// Timeout for the summarizer's engine call
    pub summarizer_timeout: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_window: 128_000,
            response_reserve: 4_096,
            summary_ratio: 0.3,
            summarize_threshold: 40,
            keep_recent: 10,
            summary_word_cap: 300,
            summarizer_timeout: Duration::from_secs(30),
        }
    }
}

/// Top-level core configuration
#[derive(Clone, Debug, Default)]
pub struct CoreConfig {
    pub agent: LoopConfig,
    pub context: ContextConfig,
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("HEARTH_MAX_ITERATIONS") {
            config.agent.max_iterations = v;
        }
        if let Some(v) = env_parse::<u64>("HEARTH_TOOL_TIMEOUT_SECS") {
            config.agent.tool_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u32>("HEARTH_CONTEXT_WINDOW") {
            config.context.context_window = v;
        }
        if let Some(v) = env_parse::<u32>("HEARTH_RESPONSE_RESERVE") {
            config.context.response_reserve = v;
        }
        if let Some(v) = env_parse::<f32>("HEARTH_SUMMARY_RATIO") {
            config.context.summary_ratio = v.clamp(0.0, 1.0);
        }
        if let Some(v) = env_parse::<usize>("HEARTH_SUMMARIZE_THRESHOLD") {
            config.context.summarize_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("HEARTH_KEEP_RECENT") {
            config.context.keep_recent = v;
        }
        if let Some(v) = env_parse::<u64>("HEARTH_SUMMARIZER_TIMEOUT_SECS") {
            config.context.summarizer_timeout = Duration::from_secs(v);
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
