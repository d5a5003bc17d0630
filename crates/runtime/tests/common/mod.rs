#![allow(dead_code)]

use std::sync::Arc;

use runtime::model::{LlmResponse, ToolCall};
use runtime::testing::ScriptedModel;
use runtime::tools::FunctionTool;
use runtime::{Agent, CustomAgent, Error, Tool};
use serde_json::json;
use storage::{Event, EventKind};

/// Sends runtime logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn add_tool() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
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
    ))
}

/// A model that asks for add(2, 2) and then answers "4".
pub fn adding_model() -> Arc<ScriptedModel> {
    Arc::new(
        ScriptedModel::new("scripted")
            .respond(LlmResponse::tool_calls(vec![ToolCall::new(
                "c1",
                "add",
                json!({"a": 2, "b": 2}),
            )]))
            .respond(LlmResponse::text("4")),
    )
}

/// An agent that appends one model response with its own name.
pub fn speaker(name: &'static str) -> Arc<dyn Agent> {
    Arc::new(CustomAgent::new(name, move |ctx| {
        Box::pin(async_stream::stream! {
            yield ctx.append(name, EventKind::model_text(format!("{name} spoke"))).await;
        })
    }))
}

/// An agent that fails immediately.
pub fn failing(name: &'static str) -> Arc<dyn Agent> {
    Arc::new(CustomAgent::new(name, |_ctx| {
        Box::pin(futures::stream::once(async {
            Err::<Event, _>(Error::Internal("deliberate failure".into()))
        }))
    }))
}

pub fn authors(events: &[Event]) -> Vec<&str> {
    events.iter().map(|e| e.author.as_str()).collect()
}

pub fn assert_gap_free(events: &[Event]) {
    for pair in events.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence + 1, "gap between {pair:?}");
    }
}
