//! HTTP Handlers
//!
//! Chat and confirmation both answer with an SSE stream of loop events; the
//! loop itself runs in a spawned task feeding an mpsc channel.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Mutex;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use hearth_core::{
    message::estimate_tokens, route, AgentCallbacks, AgentError, CallSource, Role, Tier,
    TokenUsage, ToolCatalog,
};

use crate::state::{AppState, PendingEntry, SYSTEM_PROMPT};

type SseStream = Sse<ReceiverStream<Result<Event, Infallible>>>;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub capable_providers: Vec<String>,
    pub plain_available: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub override_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub call_id: String,
    pub confirmed: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Forwards loop events to the SSE channel and accumulates assistant text
/// so the session history can be updated afterwards.
struct ChannelCallbacks {
    tx: mpsc::Sender<Result<Event, Infallible>>,
    text: Mutex<String>,
}

impl ChannelCallbacks {
    fn new(tx: mpsc::Sender<Result<Event, Infallible>>) -> Self {
        Self {
            tx,
            text: Mutex::new(String::new()),
        }
    }

    async fn send(&self, value: serde_json::Value) {
        // A failed send means the client went away; the loop keeps running
        let _ = self.tx.send(Ok(Event::default().data(value.to_string()))).await;
    }

    fn take_text(&self) -> String {
        std::mem::take(&mut self.text.lock().unwrap())
    }
}

#[async_trait::async_trait]
impl AgentCallbacks for ChannelCallbacks {
    async fn on_text_delta(&self, text: &str) {
        self.text.lock().unwrap().push_str(text);
        self.send(serde_json::json!({"type": "delta", "text": text}))
            .await;
    }

    async fn on_tool_use(
        &self,
        name: &str,
        input: &HashMap<String, serde_json::Value>,
        call_id: &str,
        tier: Tier,
    ) {
        self.send(serde_json::json!({
            "type": "tool_use",
            "name": name,
            "input": input,
            "call_id": call_id,
            "tier": tier,
        }))
        .await;
    }

    async fn on_tool_result(&self, call_id: &str, text: &str, is_error: bool) {
        self.send(serde_json::json!({
            "type": "tool_result",
            "call_id": call_id,
            "output": text,
            "is_error": is_error,
        }))
        .await;
    }

    async fn on_confirmation_needed(
        &self,
        name: &str,
        input: &HashMap<String, serde_json::Value>,
        call_id: &str,
        tier: Tier,
    ) {
        self.send(serde_json::json!({
            "type": "confirmation_required",
            "name": name,
            "input": input,
            "call_id": call_id,
            "tier": tier,
        }))
        .await;
    }

    async fn on_blocked(&self, name: &str, reason: &str, tier: Tier) {
        self.send(serde_json::json!({
            "type": "blocked",
            "name": name,
            "reason": reason,
            "tier": tier,
        }))
        .await;
    }

    async fn on_done(&self, usage: &TokenUsage) {
        self.send(serde_json::json!({"type": "done", "usage": usage}))
            .await;
    }

    async fn on_error(&self, error: &AgentError) {
        self.send(serde_json::json!({
            "type": "error",
            "message": error.user_message(),
        }))
        .await;
    }
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let availability = state.availability();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        capable_providers: availability.capable.iter().map(ToString::to_string).collect(),
        plain_available: availability.plain,
    })
}

/// Main chat endpoint: routes the message, runs the chosen provider, and
/// streams loop events back as SSE.
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> SseStream {
    let session_id = payload
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run_chat(state, payload, session_id, tx));

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

async fn run_chat(
    state: AppState,
    payload: ChatRequest,
    session_id: String,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    state
        .context
        .add_message(&session_id, Role::User, &payload.message);

    let availability = state.availability();
    let decision = route(
        &payload.message,
        payload.override_active,
        state.context.last_provider(&session_id),
        CallSource::Human,
        &availability,
    );
    tracing::info!(
        session = %session_id,
        provider = %decision.provider,
        reason = %decision.reason,
        "routed message"
    );
    state
        .context
        .set_last_provider(&session_id, decision.provider);

    let callbacks = ChannelCallbacks::new(tx.clone());
    let _ = tx
        .send(Ok(Event::default().data(
            serde_json::json!({
                "type": "routed",
                "session_id": session_id,
                "provider": decision.provider,
                "reason": decision.reason,
            })
            .to_string(),
        )))
        .await;

    let Some(provider) = state.provider(decision.provider) else {
        callbacks
            .on_error(&AgentError::ProviderUnavailable(format!(
                "no {} provider configured",
                decision.provider
            )))
            .await;
        return;
    };

    // Capable shapes inject the catalogue into the system prompt, so its
    // cost is reserved out of the history budget
    let system_tokens = estimate_tokens(SYSTEM_PROMPT);
    let catalog_tokens = if decision.provider.is_capable() {
        estimate_tokens(&ToolCatalog::standard().prompt_section())
    } else {
        0
    };
    let messages = state
        .context
        .build_context_messages(&session_id, system_tokens, catalog_tokens);

    let cancel = CancellationToken::new();
    match provider
        .chat(
            messages,
            SYSTEM_PROMPT,
            &callbacks,
            &cancel,
            payload.override_active,
        )
        .await
    {
        Ok(Some(pending)) => {
            record_suspension_narration(&state, &session_id, &callbacks, &pending);
            let call_id = pending.call_id.clone();
            state.pending.write().unwrap().insert(
                call_id.clone(),
                PendingEntry {
                    kind: decision.provider,
                    session_id: session_id.clone(),
                    pending,
                },
            );
            tracing::info!(session = %session_id, call_id = %call_id, "suspended for confirmation");
        }
        Ok(None) => {
            finish_turn(&state, &session_id, &callbacks);
        }
        Err(e) => {
            tracing::error!(session = %session_id, error = %e, "chat failed");
        }
    }
}

/// Keep the assistant text streamed before a suspension in the transcript.
///
/// The tagged shape buffers instead of streaming, so fall back to the
/// capsule's captured narration when no deltas arrived.
fn record_suspension_narration(
    state: &AppState,
    session_id: &str,
    callbacks: &ChannelCallbacks,
    pending: &hearth_core::PendingConfirmation,
) {
    let streamed = callbacks.take_text();
    let narration = if streamed.is_empty() {
        pending.assistant_content_so_far.clone()
    } else {
        streamed
    };
    if !narration.is_empty() {
        state
            .context
            .add_message(session_id, Role::Assistant, &narration);
    }
}

/// Record the assistant's answer and kick off background summarization when
/// the session has grown past the threshold.
fn finish_turn(state: &AppState, session_id: &str, callbacks: &ChannelCallbacks) {
    let text = callbacks.take_text();
    if !text.is_empty() {
        state.context.add_message(session_id, Role::Assistant, &text);
    }
    if state.context.should_summarize(session_id) {
        let context = state.context.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            // Failure is non-fatal; the session is untouched and a later
            // turn retries
            let _ = context.summarize(&session_id).await;
        });
    }
}

/// Resolve a suspended Confirm-tier call.
pub async fn confirm_handler(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmRequest>,
) -> Result<SseStream, (StatusCode, Json<ErrorResponse>)> {
    let entry = state
        .pending
        .write()
        .unwrap()
        .remove(&payload.call_id)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("no pending confirmation '{}'", payload.call_id),
                    code: "UNKNOWN_CONFIRMATION".into(),
                }),
            )
        })?;

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run_resume(state, entry, payload.confirmed, tx));

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

async fn run_resume(
    state: AppState,
    entry: PendingEntry,
    confirmed: bool,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    let callbacks = ChannelCallbacks::new(tx);
    let Some(provider) = state.provider(entry.kind) else {
        callbacks
            .on_error(&AgentError::ProviderUnavailable(format!(
                "no {} provider configured",
                entry.kind
            )))
            .await;
        return;
    };

    tracing::info!(
        session = %entry.session_id,
        tool = %entry.pending.tool_name,
        confirmed,
        "resuming suspended call"
    );

    let cancel = CancellationToken::new();
    match provider
        .resume(entry.pending, confirmed, SYSTEM_PROMPT, &callbacks, &cancel)
        .await
    {
        Ok(Some(pending)) => {
            // The resumed turn suspended again on a different call
            record_suspension_narration(&state, &entry.session_id, &callbacks, &pending);
            let call_id = pending.call_id.clone();
            state.pending.write().unwrap().insert(
                call_id,
                PendingEntry {
                    kind: entry.kind,
                    session_id: entry.session_id,
                    pending,
                },
            );
        }
        Ok(None) => {
            finish_turn(&state, &entry.session_id, &callbacks);
        }
        Err(e) => {
            tracing::error!(session = %entry.session_id, error = %e, "resume failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, RwLock};

    use hearth_core::{
        ContextConfig, Message, PendingConfirmation, ProviderAdapter, ProviderKind,
        SessionContextManager, Summarizer,
    };

    /// Streams one delta, then suspends on a Confirm-tier call.
    struct SuspendingAdapter;

    #[async_trait::async_trait]
    impl ProviderAdapter for SuspendingAdapter {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Structured
        }

        fn reachable(&self) -> bool {
            true
        }

        async fn chat(
            &self,
            _messages: Vec<Message>,
            _system_prompt: &str,
            callbacks: &dyn AgentCallbacks,
            _cancel: &CancellationToken,
            _override_active: bool,
        ) -> hearth_core::Result<Option<PendingConfirmation>> {
            callbacks
                .on_text_delta("Stopping VM 103 needs your sign-off.")
                .await;
            Ok(Some(PendingConfirmation {
                tool_name: "vm_stop".into(),
                tool_input: HashMap::new(),
                call_id: "call-77".into(),
                assistant_content_so_far: "Stopping VM 103 needs your sign-off.".into(),
                prior_messages: Vec::new(),
            }))
        }

        async fn resume(
            &self,
            _pending: PendingConfirmation,
            _confirmed: bool,
            _system_prompt: &str,
            _callbacks: &dyn AgentCallbacks,
            _cancel: &CancellationToken,
        ) -> hearth_core::Result<Option<PendingConfirmation>> {
            Ok(None)
        }
    }

    struct IdleSummarizer;

    #[async_trait::async_trait]
    impl Summarizer for IdleSummarizer {
        async fn summarize(&self, _prompt: &str) -> hearth_core::Result<String> {
            Ok(String::new())
        }
    }

    fn test_state() -> AppState {
        AppState {
            providers: Arc::new(vec![Arc::new(SuspendingAdapter) as Arc<dyn ProviderAdapter>]),
            context: Arc::new(SessionContextManager::new(
                ContextConfig::default(),
                Arc::new(IdleSummarizer),
            )),
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[tokio::test]
    async fn test_suspension_keeps_streamed_text_in_history() {
        let state = test_state();
        let (tx, _rx) = mpsc::channel(64);
        run_chat(
            state.clone(),
            ChatRequest {
                message: "stop vm 103".into(),
                session_id: Some("s1".into()),
                override_active: false,
            },
            "s1".into(),
            tx,
        )
        .await;

        let snapshot = state.context.snapshot("s1").unwrap();
        let last = snapshot.recent_messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Stopping VM 103 needs your sign-off.");
        assert!(state.pending.read().unwrap().contains_key("call-77"));
    }
}
