use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Value, json};
use storage::{ControlSignal, Event, EventKind, ToolErrorKind, ToolOutcome, USER_AUTHOR};

use super::{Agent, Capabilities, EventStream, history};
use crate::callbacks::CallbackContext;
use crate::config::{MaxTurnsPolicy, StreamingMode};
use crate::context::InvocationContext;
use crate::model::{
    GenerationConfig, LlmRequest, LlmResponse, ModelBackend, ModelError, ToolCall, ToolSpec,
    sleep_or_cancel,
};
use crate::tools::{self, TRANSFER_TOOL};
use crate::{Error, Result};

/// A model-driven agent.
///
/// Each turn sends the session history to the model, appends what it says,
/// and runs the tools it asks for, until the model completes a turn without
/// requesting tools.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use runtime::agent::LlmAgent;
/// use runtime::testing::ScriptedModel;
///
/// let model = Arc::new(ScriptedModel::new("test-model"));
/// let agent = LlmAgent::new("calculator", model)
///     .with_instruction("Answer arithmetic questions using the add tool.")
///     .with_tools(["add"])
///     .with_output_key("answer");
/// ```
pub struct LlmAgent {
    name: String,
    description: String,
    model: Arc<dyn ModelBackend>,
    model_name: Option<String>,
    instruction: Option<String>,
    tools: Vec<String>,
    sub_agents: Vec<Arc<dyn Agent>>,
    output_key: Option<String>,
    history_window: Option<usize>,
    generation: GenerationConfig,
}

impl LlmAgent {
    pub fn new(name: impl Into<String>, model: Arc<dyn ModelBackend>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            model,
            model_name: None,
            instruction: None,
            tools: Vec::new(),
            sub_agents: Vec::new(),
            output_key: None,
            history_window: None,
            generation: GenerationConfig::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Model identifier sent with each request. Defaults to the backend's
    /// name.
    pub fn with_model_name(mut self, model: impl Into<String>) -> Self {
        self.model_name = Some(model.into());
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Names of registered tools this agent may call.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools.extend(tools.into_iter().map(Into::into));
        self
    }

    /// Children this agent may hand the conversation to.
    pub fn with_sub_agents(mut self, sub_agents: Vec<Arc<dyn Agent>>) -> Self {
        self.sub_agents = sub_agents;
        self
    }

    /// Store the final response text in session state under `key`.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Send only the `events` most recent history events.
    pub fn with_history_window(mut self, events: usize) -> Self {
        self.history_window = Some(events);
        self
    }

    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation = config;
        self
    }

    fn model_name(&self) -> String {
        self.model_name
            .clone()
            .unwrap_or_else(|| self.model.name().to_string())
    }

    fn transfer_spec(&self) -> ToolSpec {
        let names: Vec<&str> = self.sub_agents.iter().map(|a| a.name()).collect();
        let roster = self
            .sub_agents
            .iter()
            .map(|a| match a.description() {
                "" => format!("- {}", a.name()),
                description => format!("- {}: {description}", a.name()),
            })
            .collect::<Vec<_>>()
            .join("\n");
        ToolSpec {
            name: TRANSFER_TOOL.to_string(),
            description: format!("Hand the conversation to another agent.\n{roster}"),
            schema: json!({
                "type": "object",
                "properties": {"agent_name": {"type": "string", "enum": names}},
                "required": ["agent_name"]
            }),
        }
    }

    fn resolve_transfer(&self, call: &ToolCall) -> (ToolOutcome, Option<Arc<dyn Agent>>) {
        let target = call.input.get("agent_name").and_then(Value::as_str);
        match target.and_then(|name| self.sub_agents.iter().find(|a| a.name() == name)) {
            Some(agent) => (
                ToolOutcome::success(json!({"transferred_to": agent.name()})),
                Some(Arc::clone(agent)),
            ),
            None => (
                ToolOutcome::error(
                    ToolErrorKind::NotFound,
                    format!(
                        "agent '{}' is not a sub-agent of '{}'",
                        target.unwrap_or_default(),
                        self.name
                    ),
                ),
                None,
            ),
        }
    }

    async fn build_request(&self, ctx: &InvocationContext) -> Result<LlmRequest> {
        let events = ctx.events().await?;
        let mut tools = ctx.tools().specs(&self.tools);
        if !self.sub_agents.is_empty() {
            tools.push(self.transfer_spec());
        }
        Ok(LlmRequest {
            model: self.model_name(),
            instruction: self.instruction.clone(),
            messages: history::build_messages(&events, &self.name, self.history_window),
            tools,
            config: GenerationConfig {
                modality: ctx.run_config().response_modality,
                ..self.generation.clone()
            },
        })
    }

    /// One model turn with model hooks around it. Returns the partial
    /// fragments appended while streaming and the final response.
    async fn model_turn(
        &self,
        ctx: &InvocationContext,
        mut request: LlmRequest,
    ) -> Result<(Vec<Event>, LlmResponse)> {
        let hooks = CallbackContext::new(ctx.clone(), &self.name);
        let (partials, mut response) = match ctx.callbacks().before_model(&hooks, &mut request).await? {
            Some(response) => (Vec::new(), response),
            None => self.generate_with_retry(ctx, &request).await?,
        };
        ctx.callbacks().after_model(&hooks, &mut response).await?;
        Ok((partials, response))
    }

    async fn generate_with_retry(
        &self,
        ctx: &InvocationContext,
        request: &LlmRequest,
    ) -> Result<(Vec<Event>, LlmResponse)> {
        let retry = ctx.retry();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut partials = Vec::new();
            let result = if ctx.run_config().streaming.is_streaming() {
                self.generate_streaming(ctx, request.clone(), &mut partials)
                    .await
            } else {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => Err(Error::Cancelled),
                    response = self.model.generate(request.clone()) => response.map_err(Error::from),
                }
            };

            match result {
                Err(Error::Model(e)) if e.is_retryable() => {
                    let reason = e.to_string();
                    // Fragments already reached the caller; a retry would repeat them.
                    if !partials.is_empty() || attempt >= retry.max_attempts.max(1) {
                        return Err(Error::ModelBackendUnavailable {
                            attempts: attempt,
                            reason,
                        });
                    }
                    let delay = retry.delay(attempt);
                    tracing::warn!(
                        agent = %self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "model backend unavailable, retrying"
                    );
                    sleep_or_cancel(delay, ctx.cancellation_token()).await?;
                }
                other => return other.map(|response| (partials, response)),
            }
        }
    }

    async fn generate_streaming(
        &self,
        ctx: &InvocationContext,
        request: LlmRequest,
        partials: &mut Vec<Event>,
    ) -> Result<LlmResponse> {
        let mut fragments = self.model.generate_stream(request);
        let mut text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(Error::Cancelled),
                next = fragments.next() => next,
            };
            match next {
                None => {
                    return Err(ModelError::InvalidResponse(
                        "stream ended without a final response".into(),
                    )
                    .into());
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(fragment)) if fragment.partial => {
                    if fragment.text.is_empty() {
                        continue;
                    }
                    text.push_str(&fragment.text);
                    let event = ctx
                        .append(
                            &self.name,
                            EventKind::ModelResponse {
                                text: fragment.text,
                                partial: true,
                            },
                        )
                        .await?;
                    partials.push(event);
                }
                Some(Ok(mut response)) => {
                    if response.text.is_empty() {
                        response.text = text;
                    }
                    return Ok(response);
                }
            }
        }
    }
}

impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn sub_agents(&self) -> &[Arc<dyn Agent>] {
        &self.sub_agents
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            as_tool: true,
            has_tools: !self.tools.is_empty(),
            delegates: !self.sub_agents.is_empty(),
        }
    }

    fn tool_names(&self) -> &[String] {
        &self.tools
    }

    fn run_impl(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        Box::pin(async_stream::stream! {
            let max_turns = ctx.run_config().max_turns;
            let live = ctx.run_config().streaming == StreamingMode::Bidi && ctx.is_live();
            let mut turns = 0u32;

            loop {
                let mut failure = None;
                for text in ctx.drain_live_input().await {
                    match ctx.append(USER_AUTHOR, EventKind::user_message(text)).await {
                        Ok(event) => {
                            turns = 0;
                            yield Ok(event);
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                if let Some(e) = failure {
                    yield Err(e);
                    break;
                }

                if turns >= max_turns {
                    match ctx.run_config().on_max_turns {
                        MaxTurnsPolicy::Fail => {
                            yield Err(Error::MaxTurnsExceeded {
                                agent: self.name.clone(),
                                max_turns,
                            });
                        }
                        MaxTurnsPolicy::Suspend => {
                            tracing::info!(agent = %self.name, max_turns, "turn limit reached, suspending");
                            ctx.suspend(format!("agent '{}' reached its limit of {max_turns} model turns", self.name));
                        }
                    }
                    break;
                }
                turns += 1;
                tracing::debug!(agent = %self.name, invocation_id = %ctx.invocation_id(), turn = turns, "model turn");

                let turn = match self.build_request(&ctx).await {
                    Ok(request) => self.model_turn(&ctx, request).await,
                    Err(e) => Err(e),
                };
                let (partials, response) = match turn {
                    Ok(turn) => turn,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                for event in partials {
                    yield Ok(event);
                }

                if !response.text.is_empty() {
                    match ctx.append(&self.name, EventKind::model_text(response.text.clone())).await {
                        Ok(event) => yield Ok(event),
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    }
                }

                if response.tool_calls.is_empty() {
                    if !response.turn_complete {
                        continue;
                    }
                    if let Some(key) = &self.output_key
                        && !response.text.is_empty()
                    {
                        match ctx.set_state(&self.name, key, Value::String(response.text.clone())).await {
                            Ok(event) => yield Ok(event),
                            Err(e) => {
                                yield Err(e);
                                break;
                            }
                        }
                    }
                    if !live {
                        break;
                    }
                    let Some(text) = ctx.next_live_input().await else {
                        break;
                    };
                    match ctx.append(USER_AUTHOR, EventKind::user_message(text)).await {
                        Ok(event) => {
                            turns = 0;
                            yield Ok(event);
                            continue;
                        }
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    }
                }

                let mut transfer: Option<Arc<dyn Agent>> = None;
                let mut escalate = false;
                let mut failure = None;
                for call in &response.tool_calls {
                    match ctx
                        .append(
                            &self.name,
                            EventKind::ToolCall {
                                call_id: call.id.clone(),
                                name: call.name.clone(),
                                arguments: call.input.clone(),
                            },
                        )
                        .await
                    {
                        Ok(event) => yield Ok(event),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }

                    let outcome = if call.name == TRANSFER_TOOL && !self.sub_agents.is_empty() {
                        let (outcome, target) = self.resolve_transfer(call);
                        if transfer.is_none() {
                            transfer = target;
                        }
                        outcome
                    } else {
                        match tools::dispatch(&ctx, &self.name, &self.tools, call).await {
                            Ok(dispatched) => {
                                for event in dispatched.emitted {
                                    yield Ok(event);
                                }
                                escalate |= dispatched.escalate;
                                dispatched.outcome
                            }
                            Err(e) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    };

                    if let ToolOutcome::Pending { ticket } = &outcome {
                        tracing::info!(agent = %self.name, tool = %call.name, call_id = %call.id, %ticket, "tool pending");
                        ctx.suspend(format!("waiting on tool '{}' (call {}, ticket {ticket})", call.name, call.id));
                    }

                    match ctx
                        .append(
                            &self.name,
                            EventKind::ToolResult {
                                call_id: call.id.clone(),
                                name: call.name.clone(),
                                outcome,
                            },
                        )
                        .await
                    {
                        Ok(event) => yield Ok(event),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                if let Some(e) = failure {
                    yield Err(e);
                    break;
                }

                if escalate {
                    match ctx.append(&self.name, EventKind::control(ControlSignal::Escalate)).await {
                        Ok(event) => yield Ok(event),
                        Err(e) => yield Err(e),
                    }
                    break;
                }
                if let Some(target) = transfer {
                    tracing::info!(agent = %self.name, target = target.name(), "transferring control");
                    let mut events = super::run(target, ctx.clone());
                    while let Some(item) = events.next().await {
                        let failed = item.is_err();
                        yield item;
                        if failed {
                            break;
                        }
                    }
                    break;
                }
                if ctx.is_suspended() {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::agent::run;
    use crate::config::RunConfig;
    use crate::context::tests::TestSetup;
    use crate::testing::ScriptedModel;
    use crate::tools::{ExitLoopTool, FunctionTool, ToolRegistry};

    fn add_tool() -> FunctionTool {
        FunctionTool::new(
            "add",
            "Add two integers",
            json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            }),
            |args| async move {
                Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)))
            },
        )
    }

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(add_tool())).unwrap();
        tools.register(Arc::new(ExitLoopTool)).unwrap();
        tools
    }

    async fn run_agent(agent: LlmAgent, setup: TestSetup) -> (Vec<Result<Event>>, InvocationContext) {
        let agent: Arc<dyn Agent> = Arc::new(agent);
        let (ctx, _rx) = setup.build(Arc::clone(&agent)).await;
        ctx.append(USER_AUTHOR, EventKind::user_message("what is 2+2?")).await.unwrap();
        let items = run(agent, ctx.clone()).collect().await;
        (items, ctx)
    }

    #[tokio::test]
    async fn tool_round_trip_then_answer() {
        let model = Arc::new(
            ScriptedModel::new("scripted")
                .respond(LlmResponse::tool_calls(vec![ToolCall::new("c1", "add", json!({"a": 2, "b": 2}))]))
                .respond(LlmResponse::text("4")),
        );
        let agent = LlmAgent::new("calc", model.clone())
            .with_tools(["add"])
            .with_output_key("answer");
        let setup = TestSetup { tools: registry(), ..TestSetup::default() };

        let (items, ctx) = run_agent(agent, setup).await;
        let kinds: Vec<_> = items.iter().map(|i| i.as_ref().unwrap().kind.name()).collect();
        assert_eq!(kinds, vec!["tool_call", "tool_result", "model_response", "state_delta"]);
        assert_eq!(ctx.state().await.unwrap().get("answer"), Some(&json!("4")));

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 1);
        assert!(matches!(
            requests[1].messages.last().unwrap().parts[0],
            crate::model::Part::ToolResult { .. }
        ));
    }

    #[tokio::test]
    async fn max_turns_fails_by_default() {
        let call = || LlmResponse::tool_calls(vec![ToolCall::new("c", "add", json!({"a": 1, "b": 1}))]);
        let model = Arc::new(ScriptedModel::new("scripted").respond(call()).respond(call()).respond(call()));
        let agent = LlmAgent::new("calc", model).with_tools(["add"]);
        let setup = TestSetup {
            tools: registry(),
            run_config: RunConfig::default().with_max_turns(2),
            ..TestSetup::default()
        };

        let (items, _ctx) = run_agent(agent, setup).await;
        assert!(matches!(
            items.last(),
            Some(Err(Error::MaxTurnsExceeded { max_turns: 2, .. }))
        ));
    }

    #[tokio::test]
    async fn max_turns_can_suspend() {
        let call = || LlmResponse::tool_calls(vec![ToolCall::new("c", "add", json!({"a": 1, "b": 1}))]);
        let model = Arc::new(ScriptedModel::new("scripted").respond(call()));
        let agent = LlmAgent::new("calc", model).with_tools(["add"]);
        let setup = TestSetup {
            tools: registry(),
            run_config: RunConfig::default()
                .with_max_turns(1)
                .with_on_max_turns(MaxTurnsPolicy::Suspend),
            ..TestSetup::default()
        };

        let (items, ctx) = run_agent(agent, setup).await;
        assert!(items.iter().all(Result::is_ok));
        assert!(ctx.is_suspended());
    }

    #[tokio::test]
    async fn unavailable_backend_is_retried() {
        let model = Arc::new(
            ScriptedModel::new("scripted")
                .fail(ModelError::Unavailable("overloaded".into()))
                .respond(LlmResponse::text("recovered")),
        );
        let agent = LlmAgent::new("bot", model.clone());
        let (items, _ctx) = run_agent(agent, TestSetup::default()).await;

        let texts: Vec<_> = items
            .iter()
            .filter_map(|i| i.as_ref().ok().and_then(Event::final_text).map(str::to_owned))
            .collect();
        assert_eq!(texts, vec!["recovered"]);
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_with_attempt_count() {
        let model = Arc::new(
            ScriptedModel::new("scripted")
                .fail(ModelError::Unavailable("down".into()))
                .fail(ModelError::Unavailable("down".into()))
                .fail(ModelError::Unavailable("down".into())),
        );
        let agent = LlmAgent::new("bot", model);
        let (items, _ctx) = run_agent(agent, TestSetup::default()).await;

        assert!(matches!(
            items.last(),
            Some(Err(Error::ModelBackendUnavailable { attempts: 3, .. }))
        ));
    }

    #[tokio::test]
    async fn streaming_appends_partials_before_final() {
        let model = Arc::new(ScriptedModel::new("scripted").stream(vec![
            LlmResponse::partial("2 plus 2 "),
            LlmResponse::partial("is 4"),
            LlmResponse { turn_complete: true, ..LlmResponse::default() },
        ]));
        let agent = LlmAgent::new("bot", model);
        let setup = TestSetup {
            run_config: RunConfig::default().with_streaming(StreamingMode::Partial),
            ..TestSetup::default()
        };

        let (items, _ctx) = run_agent(agent, setup).await;
        let events: Vec<Event> = items.into_iter().collect::<Result<_>>().unwrap();
        assert_eq!(events.len(), 3);
        assert!(events[0].is_partial() && events[1].is_partial());
        assert_eq!(events[2].final_text(), Some("2 plus 2 is 4"));
    }

    #[tokio::test]
    async fn exit_loop_escalates_after_the_result() {
        let model = Arc::new(
            ScriptedModel::new("scripted")
                .respond(LlmResponse::tool_calls(vec![ToolCall::new("c1", "exit_loop", json!({}))])),
        );
        let agent = LlmAgent::new("critic", model).with_tools(["exit_loop"]);
        let setup = TestSetup { tools: registry(), ..TestSetup::default() };

        let (items, _ctx) = run_agent(agent, setup).await;
        let kinds: Vec<_> = items.iter().map(|i| i.as_ref().unwrap().kind.name()).collect();
        assert_eq!(kinds, vec!["tool_call", "tool_result", "control"]);
        assert!(items[2].as_ref().unwrap().is_escalation());
    }

    #[tokio::test]
    async fn transfer_runs_the_named_child() {
        let child_model = Arc::new(ScriptedModel::new("child").respond(LlmResponse::text("billing here")));
        let billing: Arc<dyn Agent> = Arc::new(
            LlmAgent::new("billing", child_model).with_description("Handles invoices"),
        );
        let model = Arc::new(ScriptedModel::new("router").respond(LlmResponse::tool_calls(vec![
            ToolCall::new("t1", TRANSFER_TOOL, json!({"agent_name": "billing"})),
        ])));
        let agent = LlmAgent::new("router", model.clone()).with_sub_agents(vec![billing]);

        let (items, _ctx) = run_agent(agent, TestSetup::default()).await;
        let events: Vec<Event> = items.into_iter().collect::<Result<_>>().unwrap();
        assert_eq!(events.last().unwrap().author, "billing");
        assert_eq!(events.last().unwrap().final_text(), Some("billing here"));
        assert_eq!(model.requests()[0].tools[0].name, TRANSFER_TOOL);
    }

    #[tokio::test]
    async fn pending_tool_suspends_after_batch() {
        let mut tools = ToolRegistry::new();
        tools
            .register(Arc::new(FunctionTool::long_running(
                "approve",
                "Ask a human",
                json!({"type": "object"}),
                |_| async move { Ok("ticket-7".to_string()) },
            )))
            .unwrap();
        let model = Arc::new(ScriptedModel::new("scripted").respond(LlmResponse::tool_calls(vec![
            ToolCall::new("c1", "approve", json!({})),
        ])));
        let agent = LlmAgent::new("clerk", model.clone()).with_tools(["approve"]);
        let setup = TestSetup { tools, ..TestSetup::default() };

        let (items, ctx) = run_agent(agent, setup).await;
        assert!(items.iter().all(Result::is_ok));
        assert!(ctx.is_suspended());
        assert_eq!(model.requests().len(), 1);
        let last = items.last().unwrap().as_ref().unwrap();
        assert!(matches!(
            &last.kind,
            EventKind::ToolResult { outcome: ToolOutcome::Pending { ticket }, .. } if ticket == "ticket-7"
        ));
    }

    #[tokio::test]
    async fn live_input_continues_the_conversation() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let model = Arc::new(
            ScriptedModel::new("scripted")
                .respond(LlmResponse::text("hello"))
                .respond(LlmResponse::text("bye")),
        );
        let agent = LlmAgent::new("bot", model.clone());
        let setup = TestSetup {
            run_config: RunConfig::default().with_streaming(StreamingMode::Bidi),
            live: Some(rx),
            ..TestSetup::default()
        };
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            tx.send("one more thing".to_string()).unwrap();
        });

        let (items, _ctx) = run_agent(agent, setup).await;
        let events: Vec<Event> = items.into_iter().collect::<Result<_>>().unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.kind.name()).collect();
        assert_eq!(kinds, vec!["model_response", "user_message", "model_response"]);
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn model_failure_is_not_retried() {
        let model = Arc::new(ScriptedModel::new("scripted").fail(ModelError::Api("bad request".into())));
        let agent = LlmAgent::new("bot", model.clone());
        let (items, _ctx) = run_agent(agent, TestSetup::default()).await;

        assert!(matches!(items.last(), Some(Err(Error::Model(ModelError::Api(_))))));
        assert_eq!(model.requests().len(), 1);
    }

    #[test]
    fn capabilities_follow_configuration() {
        let model = Arc::new(ScriptedModel::new("scripted"));
        let plain = LlmAgent::new("plain", model.clone());
        assert!(!plain.capabilities().has_tools);
        let tooled = LlmAgent::new("tooled", model).with_tools(["add"]);
        assert!(tooled.capabilities().has_tools);
        assert_eq!(tooled.tool_names(), ["add".to_string()]);
    }

    #[test]
    fn unknown_transfer_target_is_not_found() {
        let model = Arc::new(ScriptedModel::new("scripted"));
        let agent = LlmAgent::new("router", model);
        let (outcome, target) =
            agent.resolve_transfer(&ToolCall::new("t", TRANSFER_TOOL, json!({"agent_name": "ghost"})));
        assert!(target.is_none());
        assert!(matches!(outcome, ToolOutcome::Error { kind: ToolErrorKind::NotFound, .. }));
    }

    #[tokio::test]
    async fn before_model_short_circuit_skips_backend() {
        use crate::callbacks::{Callback, CallbackChain, Flow};

        struct Canned;

        #[async_trait::async_trait]
        impl Callback for Canned {
            fn name(&self) -> &str {
                "canned"
            }

            async fn before_model(
                &self,
                _ctx: &CallbackContext,
                _request: &mut LlmRequest,
            ) -> Result<Flow<LlmResponse>> {
                Ok(Flow::ShortCircuit(LlmResponse::text("cached answer")))
            }
        }

        let model = Arc::new(ScriptedModel::new("scripted"));
        let agent = LlmAgent::new("bot", model.clone());
        let setup = TestSetup {
            callbacks: CallbackChain::new(vec![Arc::new(Canned)]),
            ..TestSetup::default()
        };

        let (items, _ctx) = run_agent(agent, setup).await;
        let events: Vec<Event> = items.into_iter().collect::<Result<_>>().unwrap();
        assert_eq!(events[0].final_text(), Some("cached answer"));
        assert!(model.requests().is_empty());
    }
}
