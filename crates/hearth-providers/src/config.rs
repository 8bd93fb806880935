//! Provider configuration
//!
//! One config struct per provider shape, each constructible from the
//! environment. A missing credential makes the shape unreachable, not an
//! error.

/// Structured provider (native tool-calling messages API)
#[derive(Clone, Debug)]
pub struct StructuredConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub context_window: u32,
}

impl Default for StructuredConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".into(),
            api_key: String::new(),
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 4_096,
            context_window: 200_000,
        }
    }
}

impl StructuredConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("HEARTH_STRUCTURED_BASE_URL") {
            config.base_url = v;
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            config.api_key = v;
        }
        if let Ok(v) = std::env::var("HEARTH_STRUCTURED_MODEL") {
            config.model = v;
        }
        config
    }
}

/// Tagged provider (OpenAI-compatible endpoint, tool calls in text)
#[derive(Clone, Debug)]
pub struct TaggedConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub context_window: u32,
}

impl Default for TaggedConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: "qwen2.5-32b-instruct".into(),
            context_window: 32_768,
        }
    }
}

impl TaggedConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("HEARTH_TAGGED_BASE_URL") {
            config.base_url = v;
        }
        if let Ok(v) = std::env::var("HEARTH_TAGGED_API_KEY") {
            config.api_key = v;
        }
        if let Ok(v) = std::env::var("HEARTH_TAGGED_MODEL") {
            config.model = v;
        }
        config
    }
}

/// Plain provider (local Ollama, no tool access)
#[derive(Clone, Debug)]
pub struct PlainConfig {
    pub host: String,
    pub port: u16,
    pub model: String,
}

impl Default for PlainConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            model: "llama3.2".into(),
        }
    }
}

impl PlainConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("OLLAMA_HOST") {
            config.host = v;
        }
        if let Some(v) = std::env::var("OLLAMA_PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = v;
        }
        if let Ok(v) = std::env::var("HEARTH_PLAIN_MODEL") {
            config.model = v;
        }
        config
    }
}
