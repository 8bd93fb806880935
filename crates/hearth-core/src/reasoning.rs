//! Agentic Loop
//!
//! Drives one reasoning engine through repeated turns, gating every tool
//! call through the tier classifier and the execution gateway. Confirm-tier
//! calls suspend the loop into a [`PendingConfirmation`]; resumption is a
//! full loop invocation over the reconstructed history, so a resumed turn
//! can itself suspend again.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::LoopConfig;
use crate::error::{AgentError, Result};
use crate::event::AgentCallbacks;
use crate::gateway::{CallSource, ToolGateway};
use crate::message::{Message, Role};
use crate::provider::{ChatClient, TokenUsage};
use crate::tier::{tier, Tier};
use crate::tool::{PendingConfirmation, ToolCall, ToolCatalog, ToolResult, ToolSchema};

pub struct Agent {
    client: Arc<dyn ChatClient>,
    gateway: Arc<dyn ToolGateway>,
    catalog: Arc<ToolCatalog>,
    config: LoopConfig,
}

impl Agent {
    pub fn new(
        client: Arc<dyn ChatClient>,
        gateway: Arc<dyn ToolGateway>,
        catalog: Arc<ToolCatalog>,
        config: LoopConfig,
    ) -> Self {
        Self {
            client,
            gateway,
            catalog,
            config,
        }
    }

    /// Run the loop to completion or suspension.
    ///
    /// Returns `Ok(None)` when the engine produced a final text answer (or
    /// the request was cancelled), `Ok(Some(..))` when a Confirm-tier tool
    /// call suspended the loop.
    pub async fn run(
        &self,
        messages: Vec<Message>,
        system_prompt: &str,
        callbacks: &dyn AgentCallbacks,
        cancel: &CancellationToken,
        override_active: bool,
    ) -> Result<Option<PendingConfirmation>> {
        let mut messages = messages;
        let mut total_usage = TokenUsage::default();
        let mut iterations = 0;

        loop {
            iterations += 1;

            if cancel.is_cancelled() {
                callbacks.on_error(&AgentError::Cancelled).await;
                return Ok(None);
            }

            // The final allowed iteration omits tool definitions entirely,
            // forcing a text-only answer so the loop terminates.
            let final_iteration = iterations >= self.config.max_iterations;
            let tools: &[ToolSchema] = if final_iteration {
                &[]
            } else {
                self.catalog.schemas()
            };

            let turn = match self
                .client
                .stream_turn(&messages, system_prompt, tools, callbacks, cancel)
                .await
            {
                Ok(turn) => turn,
                Err(e) => {
                    // Transport errors terminate the loop; retry policy
                    // belongs to the caller.
                    callbacks.on_error(&e).await;
                    return Err(e);
                }
            };
            total_usage.add(&turn.usage);

            if turn.tool_calls.is_empty() || final_iteration {
                if !turn.tool_calls.is_empty() {
                    tracing::warn!(
                        iteration = iterations,
                        count = turn.tool_calls.len(),
                        "engine requested tools on the final iteration; ignored"
                    );
                }
                callbacks.on_done(&total_usage).await;
                return Ok(None);
            }

            let assistant_msg =
                Message::assistant_with_calls(turn.text.clone(), turn.tool_calls.clone());
            let mut results: Vec<ToolResult> = Vec::new();

            // Sequential: a later call's safety decision must not race
            // ahead of an earlier one's side effects.
            for call in &turn.tool_calls {
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
                        tracing::warn!(tool = %call.name, "blocked forbidden tool call");
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

                        // Capture everything needed to resume; calls not yet
                        // processed in this turn are discarded.
                        let mut prior_messages = messages;
                        prior_messages.push(assistant_msg);
                        if !results.is_empty() {
                            prior_messages.push(Message::tool_results(results));
                        }
                        return Ok(Some(PendingConfirmation {
                            tool_name: call.name.clone(),
                            tool_input: call.arguments.clone(),
                            call_id: call.call_id.clone(),
                            assistant_content_so_far: turn.text,
                            prior_messages,
                        }));
                    }
                    _ => {
                        if call_tier == Tier::AutoLogged || override_active {
                            tracing::info!(
                                tool = %call.name,
                                tier = %call_tier,
                                override_active,
                                "executing tool"
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

    /// Resume a suspended loop after the human decided.
    ///
    /// The capsule is consumed: confirmed executes exactly the suspended
    /// tool (with the confirmed flag forwarded so the gateway skips its own
    /// re-confirmation), declined injects a non-error "declined" result.
    pub async fn resume(
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

        // Fold the result into the history exactly as the unsuspended loop
        // would have: join the turn's earlier results if present.
        match messages.last_mut() {
            Some(last) if last.role == Role::Tool => last.tool_results.push(result),
            _ => messages.push(Message::tool_results(vec![result])),
        }

        self.run(messages, system_prompt, callbacks, cancel, false)
            .await
    }

    /// Execute one gateway call under the per-tool timeout, converting every
    /// failure mode into a result the engine can react to.
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
                tracing::warn!(tool = %call.name, error = %e, "tool execution failed");
                ToolResult::err(
                    &call.call_id,
                    format!("Tool '{}' failed: {}", call.name, e.user_message()),
                )
            }
            Err(_) => {
                let secs = self.config.tool_timeout.as_secs();
                tracing::warn!(tool = %call.name, secs, "tool execution timed out");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayContent, GatewayResult};
    use std::collections::HashMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    fn call(name: &str, id: &str) -> ToolCall {
        ToolCall {
            name: name.into(),
            arguments: HashMap::new(),
            call_id: id.into(),
        }
    }

    fn turn_text(text: &str) -> crate::provider::EngineTurn {
        crate::provider::EngineTurn {
            text: text.into(),
            tool_calls: vec![],
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        }
    }

    fn turn_calls(calls: Vec<ToolCall>) -> crate::provider::EngineTurn {
        crate::provider::EngineTurn {
            text: String::new(),
            tool_calls: calls,
            usage: TokenUsage::default(),
        }
    }

    struct ScriptedClient {
        turns: Mutex<VecDeque<crate::provider::EngineTurn>>,
        tool_counts: Mutex<Vec<usize>>,
    }

    impl ScriptedClient {
        fn new(turns: Vec<crate::provider::EngineTurn>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                tool_counts: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatClient for ScriptedClient {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn context_window(&self) -> u32 {
            128_000
        }

        async fn stream_turn(
            &self,
            _messages: &[Message],
            _system_prompt: &str,
            tools: &[ToolSchema],
            _callbacks: &dyn AgentCallbacks,
            _cancel: &CancellationToken,
        ) -> Result<crate::provider::EngineTurn> {
            self.tool_counts.lock().unwrap().push(tools.len());
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AgentError::Provider("script exhausted".into()))
        }
    }

    #[derive(Default)]
    struct MockGateway {
        calls: Mutex<Vec<(String, bool)>>,
        delay: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl ToolGateway for MockGateway {
        async fn execute(
            &self,
            name: &str,
            _args: &HashMap<String, serde_json::Value>,
            _source: CallSource,
            confirmed: bool,
            _override_active: bool,
        ) -> Result<GatewayResult> {
            self.calls.lock().unwrap().push((name.into(), confirmed));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(GatewayResult {
                content: vec![GatewayContent {
                    kind: "text".into(),
                    text: format!("{} done", name),
                }],
                is_error: false,
                blocked: false,
                reason: None,
                tier: None,
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.events()
                .iter()
                .filter(|e| e.starts_with(prefix))
                .count()
        }
    }

    #[async_trait::async_trait]
    impl AgentCallbacks for Recorder {
        async fn on_text_delta(&self, text: &str) {
            self.events.lock().unwrap().push(format!("delta:{}", text));
        }
        async fn on_tool_use(
            &self,
            name: &str,
            _input: &HashMap<String, serde_json::Value>,
            _call_id: &str,
            _tier: Tier,
        ) {
            self.events.lock().unwrap().push(format!("use:{}", name));
        }
        async fn on_tool_result(&self, call_id: &str, _text: &str, is_error: bool) {
            self.events
                .lock()
                .unwrap()
                .push(format!("result:{}:{}", call_id, is_error));
        }
        async fn on_confirmation_needed(
            &self,
            name: &str,
            _input: &HashMap<String, serde_json::Value>,
            call_id: &str,
            _tier: Tier,
        ) {
            self.events
                .lock()
                .unwrap()
                .push(format!("confirm:{}:{}", name, call_id));
        }
        async fn on_blocked(&self, name: &str, _reason: &str, _tier: Tier) {
            self.events.lock().unwrap().push(format!("blocked:{}", name));
        }
        async fn on_done(&self, _usage: &TokenUsage) {
            self.events.lock().unwrap().push("done".into());
        }
        async fn on_error(&self, error: &AgentError) {
            self.events.lock().unwrap().push(format!("error:{}", error));
        }
    }

    fn agent(client: ScriptedClient, gateway: MockGateway, config: LoopConfig) -> (Agent, Arc<MockGateway>) {
        let gateway = Arc::new(gateway);
        let agent = Agent::new(
            Arc::new(client),
            gateway.clone(),
            Arc::new(ToolCatalog::standard()),
            config,
        );
        (agent, gateway)
    }

    #[tokio::test]
    async fn test_text_only_turn_finishes() {
        let (agent, gateway) = agent(
            ScriptedClient::new(vec![turn_text("All nodes healthy.")]),
            MockGateway::default(),
            LoopConfig::default(),
        );
        let recorder = Recorder::default();
        let result = agent
            .run(
                vec![Message::user("status?")],
                "You are hearth.",
                &recorder,
                &CancellationToken::new(),
                false,
            )
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(recorder.count("done"), 1);
        assert!(gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_tier_suspends_without_executing() {
        let (agent, gateway) = agent(
            ScriptedClient::new(vec![turn_calls(vec![call("vm_stop", "c1")])]),
            MockGateway::default(),
            LoopConfig::default(),
        );
        let recorder = Recorder::default();
        let pending = agent
            .run(
                vec![Message::user("stop vm 103")],
                "",
                &recorder,
                &CancellationToken::new(),
                false,
            )
            .await
            .unwrap()
            .expect("should suspend");

        assert_eq!(pending.call_id, "c1");
        assert_eq!(pending.tool_name, "vm_stop");
        assert!(gateway.calls.lock().unwrap().is_empty());
        assert_eq!(recorder.count("confirm:vm_stop"), 1);
    }

    #[tokio::test]
    async fn test_resume_declined_never_hits_gateway() {
        let (agent, gateway) = agent(
            ScriptedClient::new(vec![turn_text("Okay, leaving it running.")]),
            MockGateway::default(),
            LoopConfig::default(),
        );
        let pending = PendingConfirmation {
            tool_name: "vm_stop".into(),
            tool_input: HashMap::new(),
            call_id: "c1".into(),
            assistant_content_so_far: String::new(),
            prior_messages: vec![
                Message::user("stop vm 103"),
                Message::assistant_with_calls("", vec![call("vm_stop", "c1")]),
            ],
        };
        let recorder = Recorder::default();
        let result = agent
            .resume(pending, false, "", &recorder, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(gateway.calls.lock().unwrap().is_empty());
        // Declined result is not an error
        assert_eq!(recorder.count("result:c1:false"), 1);
    }

    #[tokio::test]
    async fn test_resume_confirmed_executes_once() {
        let (agent, gateway) = agent(
            ScriptedClient::new(vec![turn_text("Stopped.")]),
            MockGateway::default(),
            LoopConfig::default(),
        );
        let pending = PendingConfirmation {
            tool_name: "vm_stop".into(),
            tool_input: HashMap::new(),
            call_id: "c1".into(),
            assistant_content_so_far: String::new(),
            prior_messages: vec![
                Message::user("stop vm 103"),
                Message::assistant_with_calls("", vec![call("vm_stop", "c1")]),
            ],
        };
        let result = agent
            .resume(
                pending,
                true,
                "",
                &NullRecorder,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.is_none());
        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("vm_stop".to_string(), true));
    }

    // Thin alias so the intent in tests reads clearly
    use crate::event::NullCallbacks as NullRecorder;

    #[tokio::test]
    async fn test_forbidden_call_continues_turn() {
        let (agent, gateway) = agent(
            ScriptedClient::new(vec![
                turn_calls(vec![call("node_shutdown", "c1"), call("cluster_status", "c2")]),
                turn_text("Shutdown refused; cluster is healthy."),
            ]),
            MockGateway::default(),
            LoopConfig::default(),
        );
        let recorder = Recorder::default();
        let result = agent
            .run(
                vec![Message::user("shut it all down")],
                "",
                &recorder,
                &CancellationToken::new(),
                false,
            )
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(recorder.count("blocked:node_shutdown"), 1);
        // The second (allowed) call in the same turn still ran
        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "cluster_status");
    }

    #[tokio::test]
    async fn test_final_iteration_omits_tools_and_ignores_calls() {
        let client = ScriptedClient::new(vec![
            turn_calls(vec![call("cluster_status", "c1")]),
            // Engine misbehaves and keeps requesting tools on the last turn
            turn_calls(vec![call("cluster_status", "c2")]),
        ]);
        let gateway = MockGateway::default();
        let config = LoopConfig {
            max_iterations: 2,
            ..LoopConfig::default()
        };
        let gateway = Arc::new(gateway);
        let client = Arc::new(client);
        let agent = Agent::new(
            client.clone(),
            gateway.clone(),
            Arc::new(ToolCatalog::standard()),
            config,
        );
        let recorder = Recorder::default();
        let result = agent
            .run(
                vec![Message::user("status")],
                "",
                &recorder,
                &CancellationToken::new(),
                false,
            )
            .await
            .unwrap();

        assert!(result.is_none());
        let counts = client.tool_counts.lock().unwrap();
        assert!(counts[0] > 0);
        assert_eq!(counts[1], 0); // tools omitted on final iteration
        // First turn's call executed, second turn's was ignored
        assert_eq!(gateway.calls.lock().unwrap().len(), 1);
        assert_eq!(recorder.count("done"), 1);
    }

    #[tokio::test]
    async fn test_tool_timeout_becomes_error_result() {
        let (agent, _gateway) = agent(
            ScriptedClient::new(vec![
                turn_calls(vec![call("cluster_status", "c1")]),
                turn_text("Could not check."),
            ]),
            MockGateway {
                delay: Some(Duration::from_millis(100)),
                ..MockGateway::default()
            },
            LoopConfig {
                tool_timeout: Duration::from_millis(5),
                ..LoopConfig::default()
            },
        );
        let recorder = Recorder::default();
        let result = agent
            .run(
                vec![Message::user("status")],
                "",
                &recorder,
                &CancellationToken::new(),
                false,
            )
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(recorder.count("result:c1:true"), 1);
    }

    #[tokio::test]
    async fn test_cancellation_short_circuits() {
        let (agent, gateway) = agent(
            ScriptedClient::new(vec![turn_text("unused")]),
            MockGateway::default(),
            LoopConfig::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let recorder = Recorder::default();
        let result = agent
            .run(vec![Message::user("hi")], "", &recorder, &cancel, false)
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(recorder.count("error:"), 1);
        assert!(gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_terminates() {
        let (agent, _gateway) = agent(
            ScriptedClient::new(vec![]),
            MockGateway::default(),
            LoopConfig::default(),
        );
        let recorder = Recorder::default();
        let result = agent
            .run(
                vec![Message::user("hi")],
                "",
                &recorder,
                &CancellationToken::new(),
                false,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(recorder.count("error:"), 1);
        assert_eq!(recorder.count("done"), 0);
    }
}
