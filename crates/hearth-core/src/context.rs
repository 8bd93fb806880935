//! Session Context Manager
//!
//! Per-session rolling window of recent turns plus a compressed narrative
//! summary and a preserved-entity table. Keeps every assembled engine call
//! inside the context window minus the response reserve; summarization runs
//! in the background and never mutates state on failure.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ContextConfig;
use crate::error::{AgentError, Result};
use crate::event::NullCallbacks;
use crate::message::{estimate_tokens, Message, Role};
use crate::provider::{ChatClient, ProviderKind};

/// Marker separating the narrative from the entity table in a summarizer
/// response.
const ENTITY_MARKER: &str = "ENTITIES:";

/// Per-session conversational state.
///
/// Owned exclusively by the manager; callers never mutate the fields
/// directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionContext {
    /// Recent turns, oldest first
    pub recent_messages: Vec<Message>,

    /// Compressed narrative of everything older than the recent window
    pub summary: Option<String>,

    /// Preserved entities, upserted key-by-key
    pub entities: BTreeMap<String, String>,

    /// Messages ever added to this session
    pub total_message_count: usize,

    /// Which provider handled the previous message (router continuity)
    pub last_provider: Option<ProviderKind>,

    /// Guard against overlapping summarization runs
    #[serde(skip)]
    summarizing: bool,
}

impl SessionContext {
    fn new() -> Self {
        Self {
            recent_messages: Vec::new(),
            summary: None,
            entities: BTreeMap::new(),
            total_message_count: 0,
            last_provider: None,
            summarizing: false,
        }
    }
}

/// Produces the raw summarization response for a transcript prompt.
///
/// Separate trait so tests can simulate unreachable or malformed engines.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str) -> Result<String>;
}

/// Summarizer backed by a [`ChatClient`]
pub struct EngineSummarizer {
    client: Arc<dyn ChatClient>,
}

impl EngineSummarizer {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Summarizer for EngineSummarizer {
    async fn summarize(&self, prompt: &str) -> Result<String> {
        let turn = self
            .client
            .stream_turn(
                &[Message::user(prompt)],
                "You compress conversation history for an infrastructure assistant.",
                &[],
                &NullCallbacks,
                &CancellationToken::new(),
            )
            .await?;
        Ok(turn.text)
    }
}

pub struct SessionContextManager {
    sessions: RwLock<HashMap<String, SessionContext>>,
    config: ContextConfig,
    summarizer: Arc<dyn Summarizer>,
}

impl SessionContextManager {
    pub fn new(config: ContextConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            summarizer,
        }
    }

    /// Append one turn to a session, creating it lazily.
    pub fn add_message(&self, session_id: &str, role: Role, content: &str) {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionContext::new);
        session.recent_messages.push(Message::new(role, content));
        session.total_message_count += 1;
    }

    pub fn set_last_provider(&self, session_id: &str, provider: ProviderKind) {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionContext::new);
        session.last_provider = Some(provider);
    }

    pub fn last_provider(&self, session_id: &str) -> Option<ProviderKind> {
        let sessions = self.sessions.read().unwrap();
        sessions.get(session_id).and_then(|s| s.last_provider)
    }

    /// Clone the session state, for inspection and tests.
    pub fn snapshot(&self, session_id: &str) -> Option<SessionContext> {
        let sessions = self.sessions.read().unwrap();
        sessions.get(session_id).cloned()
    }

    /// Whether a background summarization should be kicked off now.
    pub fn should_summarize(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().unwrap();
        sessions.get(session_id).is_some_and(|s| {
            s.total_message_count > self.config.summarize_threshold
                && !s.summarizing
                && s.recent_messages.len() > self.config.keep_recent
        })
    }

    /// Assemble the messages for one engine call, within budget.
    ///
    /// `available = context_window − system_prompt − other_reserved −
    /// response_reserve`, split 30/70 between the summary block and recent
    /// messages. Selection walks backwards from the newest message; the
    /// newest is always included even if it alone exceeds its budget.
    pub fn build_context_messages(
        &self,
        session_id: &str,
        system_prompt_tokens: u32,
        other_reserved_tokens: u32,
    ) -> Vec<Message> {
        let sessions = self.sessions.read().unwrap();
        let Some(session) = sessions.get(session_id) else {
            return Vec::new();
        };

        let available = self
            .config
            .context_window
            .saturating_sub(system_prompt_tokens)
            .saturating_sub(other_reserved_tokens)
            .saturating_sub(self.config.response_reserve);
        let summary_budget = (available as f32 * self.config.summary_ratio) as u32;
        let recent_budget = available.saturating_sub(summary_budget);

        let mut result = Vec::new();

        if session.summary.is_some() || !session.entities.is_empty() {
            let mut block = String::new();
            if let Some(summary) = &session.summary {
                block.push_str("Earlier conversation summary:\n");
                block.push_str(summary);
            }
            if !session.entities.is_empty() {
                if !block.is_empty() {
                    block.push_str("\n\n");
                }
                block.push_str("Known entities:\n");
                for (key, description) in &session.entities {
                    block.push_str(&format!("- {}: {}\n", key, description));
                }
            }
            // Character-truncate proportionally when over budget; the
            // summary is never silently dropped.
            if estimate_tokens(&block) > summary_budget {
                let max_chars = (summary_budget as usize) * 4;
                block.truncate(block.char_indices().nth(max_chars).map_or(block.len(), |(i, _)| i));
            }
            result.push(Message::system(block));
        }

        let mut selected: Vec<Message> = Vec::new();
        let mut used = 0u32;
        for message in session.recent_messages.iter().rev() {
            let cost = message.estimate_tokens();
            if !selected.is_empty() && used + cost > recent_budget {
                break;
            }
            used += cost;
            selected.push(message.clone());
        }
        selected.reverse();
        result.extend(selected);

        result
    }

    /// Compress everything older than the keep-recent tail into the summary
    /// and entity table.
    ///
    /// Best-effort: any failure (unreachable summarizer, timeout, malformed
    /// or empty response) leaves the session completely unchanged. Returns
    /// `Ok(false)` when skipped (below threshold or a run is already in
    /// flight).
    pub async fn summarize(&self, session_id: &str) -> Result<bool> {
        // Snapshot under the guard; appends may continue while we wait on
        // the summarizer, they simply grow the still-to-be-summarized tail.
        let (older, existing_summary) = {
            let mut sessions = self.sessions.write().unwrap();
            let Some(session) = sessions.get_mut(session_id) else {
                return Ok(false);
            };
            if session.summarizing
                || session.total_message_count <= self.config.summarize_threshold
                || session.recent_messages.len() <= self.config.keep_recent
            {
                return Ok(false);
            }
            session.summarizing = true;
            let split = session.recent_messages.len() - self.config.keep_recent;
            (
                session.recent_messages[..split].to_vec(),
                session.summary.clone(),
            )
        };

        let prompt = build_summary_prompt(
            &older,
            existing_summary.as_deref(),
            self.config.summary_word_cap,
        );

        let response = tokio::time::timeout(
            self.config.summarizer_timeout,
            self.summarizer.summarize(&prompt),
        )
        .await;

        let parsed = match response {
            Ok(Ok(text)) => parse_summary_response(&text),
            Ok(Err(e)) => Err(AgentError::Summarization(e.to_string())),
            Err(_) => Err(AgentError::Summarization("summarizer timed out".into())),
        };

        let mut sessions = self.sessions.write().unwrap();
        let Some(session) = sessions.get_mut(session_id) else {
            return Ok(false);
        };
        session.summarizing = false;

        match parsed {
            Ok((narrative, entities)) => {
                session.summary = Some(narrative);
                for (key, description) in entities {
                    // Upsert: new values overwrite, never merge
                    session.entities.insert(key, description);
                }
                session.recent_messages.drain(..older.len());
                tracing::debug!(
                    session = session_id,
                    compressed = older.len(),
                    "session summarized"
                );
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(session = session_id, error = %e, "summarization failed; session untouched");
                Err(e)
            }
        }
    }
}

fn build_summary_prompt(older: &[Message], existing_summary: Option<&str>, word_cap: usize) -> String {
    let mut prompt = format!(
        "Compress the following conversation into a narrative of at most {} words. \
         Preserve every concrete identifier (ids, addresses, paths, names) verbatim. \
         After the narrative, write a line containing exactly '{}' followed by one \
         'key: description' line per important entity.\n\n",
        word_cap, ENTITY_MARKER
    );
    if let Some(summary) = existing_summary {
        prompt.push_str("Previous summary:\n");
        prompt.push_str(summary);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Conversation:\n");
    for message in older {
        prompt.push_str(&format!("{}: {}\n", message.role, message.content));
    }
    prompt
}

/// Split a summarizer response on the first entity marker.
///
/// Errors on empty narrative so a degenerate response never clobbers state.
fn parse_summary_response(text: &str) -> Result<(String, Vec<(String, String)>)> {
    let (narrative, entity_block) = match text.split_once(ENTITY_MARKER) {
        Some((before, after)) => (before.trim(), after.trim()),
        None => (text.trim(), ""),
    };

    if narrative.is_empty() {
        return Err(AgentError::Summarization(
            "summarizer returned empty narrative".into(),
        ));
    }

    let mut entities = Vec::new();
    for line in entity_block.lines() {
        let line = line.trim().trim_start_matches('-').trim();
        if let Some((key, description)) = line.split_once(':') {
            let key = key.trim();
            let description = description.trim();
            if !key.is_empty() && !description.is_empty() {
                entities.push((key.to_string(), description.to_string()));
            }
        }
    }

    Ok((narrative.to_string(), entities))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedSummarizer(String);

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _prompt: &str) -> Result<String> {
            Err(AgentError::Provider("connection refused".into()))
        }
    }

    struct SlowSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for SlowSummarizer {
        async fn summarize(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("late\nENTITIES:\n".into())
        }
    }

    fn config() -> ContextConfig {
        ContextConfig {
            context_window: 1_000,
            response_reserve: 100,
            summary_ratio: 0.3,
            summarize_threshold: 5,
            keep_recent: 2,
            summary_word_cap: 100,
            summarizer_timeout: Duration::from_secs(5),
        }
    }

    fn manager(summarizer: Arc<dyn Summarizer>) -> SessionContextManager {
        SessionContextManager::new(config(), summarizer)
    }

    fn fill(manager: &SessionContextManager, session: &str, count: usize) {
        for i in 0..count {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            manager.add_message(session, role, &format!("message number {}", i));
        }
    }

    #[test]
    fn test_lazy_creation_and_counts() {
        let manager = manager(Arc::new(FixedSummarizer(String::new())));
        assert!(manager.snapshot("s1").is_none());
        manager.add_message("s1", Role::User, "hello");
        let snap = manager.snapshot("s1").unwrap();
        assert_eq!(snap.total_message_count, 1);
        assert_eq!(snap.recent_messages.len(), 1);
    }

    #[test]
    fn test_newest_message_always_included() {
        let manager = SessionContextManager::new(
            ContextConfig {
                context_window: 120,
                response_reserve: 10,
                ..config()
            },
            Arc::new(FixedSummarizer(String::new())),
        );
        manager.add_message("s1", Role::User, &"old ".repeat(200));
        manager.add_message("s1", Role::User, &"huge ".repeat(500));

        let messages = manager.build_context_messages("s1", 50, 0);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.starts_with("huge"));
    }

    #[test]
    fn test_recent_selection_walks_backwards() {
        let manager = SessionContextManager::new(
            ContextConfig {
                context_window: 100,
                response_reserve: 0,
                summary_ratio: 0.0,
                ..config()
            },
            Arc::new(FixedSummarizer(String::new())),
        );
        for i in 0..20 {
            manager.add_message("s1", Role::User, &format!("filler message {}", i));
        }
        let messages = manager.build_context_messages("s1", 0, 0);
        // Chronological order, ending with the newest
        assert!(messages.len() < 20);
        assert_eq!(messages.last().unwrap().content, "filler message 19");
        let first_idx: usize = 20 - messages.len();
        assert_eq!(
            messages[0].content,
            format!("filler message {}", first_idx)
        );
    }

    #[tokio::test]
    async fn test_summarize_compresses_and_merges_entities() {
        let manager = manager(Arc::new(FixedSummarizer(
            "User manages vm 103 on node pve1.\nENTITIES:\n- vm 103: media server\n- pve1: main node\n"
                .into(),
        )));
        fill(&manager, "s1", 8);

        assert!(manager.should_summarize("s1"));
        assert!(manager.summarize("s1").await.unwrap());

        let snap = manager.snapshot("s1").unwrap();
        assert_eq!(snap.recent_messages.len(), 2); // keep_recent
        assert_eq!(snap.total_message_count, 8); // unchanged
        assert!(snap.summary.unwrap().contains("vm 103"));
        assert_eq!(snap.entities.get("vm 103").unwrap(), "media server");
        assert_eq!(snap.entities.len(), 2);
    }

    #[tokio::test]
    async fn test_entity_upsert_overwrites() {
        let manager = manager(Arc::new(FixedSummarizer(
            "More history about vm 103.\nENTITIES:\nvm 103: now a backup target\n".into(),
        )));
        fill(&manager, "s1", 8);
        {
            let mut sessions = manager.sessions.write().unwrap();
            sessions
                .get_mut("s1")
                .unwrap()
                .entities
                .insert("vm 103".into(), "media server".into());
        }

        manager.summarize("s1").await.unwrap();
        let snap = manager.snapshot("s1").unwrap();
        assert_eq!(snap.entities.get("vm 103").unwrap(), "now a backup target");
    }

    #[tokio::test]
    async fn test_summarize_failure_leaves_state_untouched() {
        let manager = manager(Arc::new(FailingSummarizer));
        fill(&manager, "s1", 8);

        let before = serde_json::to_string(&manager.snapshot("s1").unwrap()).unwrap();
        assert!(manager.summarize("s1").await.is_err());
        let after = serde_json::to_string(&manager.snapshot("s1").unwrap()).unwrap();

        assert_eq!(before, after);
        // Guard was reset, a later attempt may run
        assert!(manager.should_summarize("s1"));
    }

    #[tokio::test]
    async fn test_empty_narrative_is_a_failure() {
        let manager = manager(Arc::new(FixedSummarizer("\nENTITIES:\nx: y\n".into())));
        fill(&manager, "s1", 8);

        assert!(manager.summarize("s1").await.is_err());
        let snap = manager.snapshot("s1").unwrap();
        assert!(snap.summary.is_none());
        assert!(snap.entities.is_empty());
        assert_eq!(snap.recent_messages.len(), 8);
    }

    #[tokio::test]
    async fn test_overlapping_summarization_guard() {
        let summarizer = Arc::new(SlowSummarizer {
            calls: AtomicUsize::new(0),
        });
        let manager = Arc::new(SessionContextManager::new(config(), summarizer.clone()));
        fill(&manager, "s1", 8);

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.summarize("s1").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A run is in flight: guard holds, second attempt is skipped
        assert!(!manager.should_summarize("s1"));
        assert!(!manager.summarize("s1").await.unwrap());

        first.await.unwrap().unwrap();
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_summary_response_without_marker() {
        let (narrative, entities) = parse_summary_response("just a narrative").unwrap();
        assert_eq!(narrative, "just a narrative");
        assert!(entities.is_empty());
    }

    #[test]
    fn test_summary_block_truncated_not_dropped() {
        let manager = SessionContextManager::new(
            ContextConfig {
                context_window: 300,
                response_reserve: 0,
                ..config()
            },
            Arc::new(FixedSummarizer(String::new())),
        );
        manager.add_message("s1", Role::User, "latest");
        {
            let mut sessions = manager.sessions.write().unwrap();
            sessions.get_mut("s1").unwrap().summary = Some("s".repeat(10_000));
        }

        let messages = manager.build_context_messages("s1", 0, 0);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.len() < 10_000);
        assert!(!messages[0].content.is_empty());
    }
}
