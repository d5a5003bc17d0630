//! Deterministic stand-ins for tests.
//!
//! [`ScriptedModel`] replays a fixed queue of responses and records every
//! request it receives. [`RecordingCallback`] logs every hook it sees.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use storage::ToolOutcome;

use crate::Result;
use crate::callbacks::{Callback, CallbackContext, Flow};
use crate::model::{LlmRequest, LlmResponse, ModelBackend, ModelError, ResponseStream};

enum Step {
    Respond(LlmResponse),
    Stream(Vec<LlmResponse>),
    Fail(ModelError),
}

/// A model backend that plays back a script.
///
/// Each call to `generate` or `generate_stream` consumes one step. Running
/// past the end of the script is an `InvalidResponse` error.
pub struct ScriptedModel {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<LlmRequest>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn respond(self, response: LlmResponse) -> Self {
        self.push(Step::Respond(response))
    }

    /// Fragments followed by a final response. Non-streaming calls get the
    /// last item.
    pub fn stream(self, fragments: Vec<LlmResponse>) -> Self {
        self.push(Step::Stream(fragments))
    }

    pub fn fail(self, error: ModelError) -> Self {
        self.push(Step::Fail(error))
    }

    /// Wait this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Steps not yet played.
    pub fn remaining(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or_default()
    }

    fn push(self, step: Step) -> Self {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(step);
        }
        self
    }

    fn next_step(&self, request: LlmRequest) -> Step {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        self.steps
            .lock()
            .ok()
            .and_then(|mut steps| steps.pop_front())
            .unwrap_or_else(|| {
                Step::Fail(ModelError::InvalidResponse("script exhausted".into()))
            })
    }
}

#[async_trait]
impl ModelBackend for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: LlmRequest) -> std::result::Result<LlmResponse, ModelError> {
        let step = self.next_step(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match step {
            Step::Respond(response) => Ok(response),
            Step::Stream(mut fragments) => fragments
                .pop()
                .ok_or_else(|| ModelError::InvalidResponse("empty stream step".into())),
            Step::Fail(error) => Err(error),
        }
    }

    fn generate_stream<'a>(&'a self, request: LlmRequest) -> ResponseStream<'a> {
        let step = self.next_step(request);
        let delay = self.delay;
        async_stream::stream! {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match step {
                Step::Respond(response) => yield Ok(response),
                Step::Stream(fragments) => {
                    for fragment in fragments {
                        yield Ok(fragment);
                    }
                }
                Step::Fail(error) => yield Err(error),
            }
        }
        .boxed()
    }
}

/// A callback that records `"<point>:<agent>"` for every hook and never
/// interferes.
#[derive(Clone, Default)]
pub struct RecordingCallback {
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record(&self, point: &str, ctx: &CallbackContext) {
        if let Ok(mut log) = self.log.lock() {
            log.push(format!("{point}:{}", ctx.agent_name()));
        }
    }
}

#[async_trait]
impl Callback for RecordingCallback {
    fn name(&self) -> &str {
        "recording"
    }

    async fn before_agent(&self, ctx: &CallbackContext) -> Result<Flow<String>> {
        self.record("before_agent", ctx);
        Ok(Flow::Continue)
    }

    async fn after_agent(&self, ctx: &CallbackContext) -> Result<Flow<String>> {
        self.record("after_agent", ctx);
        Ok(Flow::Continue)
    }

    async fn before_model(
        &self,
        ctx: &CallbackContext,
        _request: &mut LlmRequest,
    ) -> Result<Flow<LlmResponse>> {
        self.record("before_model", ctx);
        Ok(Flow::Continue)
    }

    async fn after_model(
        &self,
        ctx: &CallbackContext,
        _response: &mut LlmResponse,
    ) -> Result<Flow<LlmResponse>> {
        self.record("after_model", ctx);
        Ok(Flow::Continue)
    }

    async fn before_tool(
        &self,
        ctx: &CallbackContext,
        _tool: &str,
        _args: &mut Value,
    ) -> Result<Flow<ToolOutcome>> {
        self.record("before_tool", ctx);
        Ok(Flow::Continue)
    }

    async fn after_tool(
        &self,
        ctx: &CallbackContext,
        _tool: &str,
        _args: &Value,
        _outcome: &mut ToolOutcome,
    ) -> Result<Flow<ToolOutcome>> {
        self.record("after_tool", ctx);
        Ok(Flow::Continue)
    }
}
