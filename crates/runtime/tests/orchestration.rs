mod common;

use std::sync::Arc;

use common::{add_tool, adding_model, assert_gap_free, authors, failing, init_tracing, speaker};
use runtime::callbacks::{LoggingCallback, ModelSelectionCallback, SessionMemoryCallback};
use runtime::model::{LlmResponse, StaticCatalog, ToolCall};
use runtime::testing::{RecordingCallback, ScriptedModel};
use runtime::tools::{AgentTool, ExitLoopTool, LoadMemoryTool};
use runtime::{
    Agent, Error, InMemoryMemoryService, LlmAgent, LoopAgent, LoopMode, ParallelAgent, RunConfig,
    Runner, RuntimeConfig, SequentialAgent,
};
use serde_json::json;
use storage::{
    ControlSignal, EventKind, FailureKind, NewEvent, SessionStore, SqliteSessionStore, State,
    ToolErrorKind, ToolOutcome, USER_AUTHOR,
};

#[tokio::test]
async fn add_scenario_produces_five_ordered_events() {
    init_tracing();
    let agent: Arc<dyn Agent> = Arc::new(LlmAgent::new("calc", adding_model()).with_tools(["add"]));
    let runner = Runner::builder(agent).tool(add_tool()).build().unwrap();
    let session = runner.create_session("alice").await.unwrap();

    let events = runner
        .run(session.id, "what is 2+2?", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    assert!(matches!(&events[0].kind, EventKind::UserMessage { text } if text == "what is 2+2?"));
    assert!(matches!(&events[1].kind, EventKind::ToolCall { name, .. } if name == "add"));
    assert!(matches!(
        &events[2].kind,
        EventKind::ToolResult { outcome: ToolOutcome::Success { output }, .. } if *output == json!(4)
    ));
    assert_eq!(events[3].final_text(), Some("4"));
    assert_eq!(events[4].signal(), Some(&ControlSignal::TurnComplete));
}

#[tokio::test]
async fn replaying_the_log_reproduces_state() {
    let agent: Arc<dyn Agent> = Arc::new(
        LlmAgent::new("calc", adding_model())
            .with_tools(["add"])
            .with_output_key("answer"),
    );
    let runner = Runner::builder(agent).tool(add_tool()).build().unwrap();
    let session = runner.create_session("alice").await.unwrap();
    runner
        .run(session.id, "what is 2+2?", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    let stored = runner.get_session(session.id).await.unwrap().unwrap();
    assert_eq!(stored.state.get("answer"), Some(&json!("4")));
    assert_eq!(State::replay(&stored.events), stored.state);
    assert_eq!(State::replay(&stored.events), State::replay(&stored.events));
    assert_gap_free(&stored.events);
}

#[tokio::test]
async fn sqlite_store_keeps_the_log() {
    let store: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::in_memory().unwrap());
    let agent: Arc<dyn Agent> = Arc::new(LlmAgent::new("calc", adding_model()).with_tools(["add"]));
    let runner = Runner::builder(agent)
        .store(Arc::clone(&store))
        .tool(add_tool())
        .build()
        .unwrap();
    let session = runner.create_session("alice").await.unwrap();

    let events = runner
        .run(session.id, "what is 2+2?", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    let stored = store.get_session(session.id).await.unwrap().unwrap();
    assert_eq!(stored.events, events);
}

#[tokio::test]
async fn sequential_failure_skips_later_children() {
    let root: Arc<dyn Agent> = Arc::new(SequentialAgent::new(
        "pipeline",
        vec![failing("a"), speaker("b")],
    ));
    let runner = Runner::builder(root).build().unwrap();
    let session = runner.create_session("alice").await.unwrap();

    let events = runner
        .run(session.id, "go", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    assert!(!authors(&events).contains(&"b"));
    assert!(matches!(
        events.last().unwrap().signal(),
        Some(ControlSignal::Failed { kind: FailureKind::Internal, .. })
    ));
}

#[tokio::test]
async fn parallel_failure_keeps_sibling_events() {
    let root: Arc<dyn Agent> = Arc::new(ParallelAgent::new(
        "fan_out",
        vec![speaker("a"), failing("b")],
    ));
    let runner = Runner::builder(root).build().unwrap();
    let session = runner.create_session("alice").await.unwrap();

    let events = runner
        .run(session.id, "go", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    assert!(authors(&events).contains(&"a"));
    assert!(matches!(events.last().unwrap().signal(), Some(ControlSignal::Failed { .. })));
    assert_gap_free(&events);
}

#[tokio::test]
async fn concurrent_invocations_on_one_session_stay_gap_free() {
    init_tracing();
    let children: Vec<Arc<dyn Agent>> = vec![speaker("a"), speaker("b"), speaker("c")];
    let root: Arc<dyn Agent> = Arc::new(ParallelAgent::new("fan_out", children));
    let runner = Arc::new(Runner::builder(root).build().unwrap());
    let session = runner.create_session("alice").await.unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let runner = Arc::clone(&runner);
        handles.push(tokio::spawn(async move {
            runner
                .run(session.id, format!("go {i}"), RunConfig::default())
                .collect_events()
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().len(), 5);
    }

    let stored = runner.get_session(session.id).await.unwrap().unwrap();
    assert_eq!(stored.events.len(), 20);
    assert_eq!(stored.events.first().unwrap().sequence, 1);
    assert_gap_free(&stored.events);
}

#[tokio::test]
async fn loop_without_escalation_runs_max_iterations_then_fails() {
    let root: Arc<dyn Agent> = Arc::new(LoopAgent::new(
        "refine",
        LoopMode::UntilEscalate { max_iterations: 3 },
        vec![speaker("drafter")],
    ));
    let runner = Runner::builder(root).build().unwrap();
    let session = runner.create_session("alice").await.unwrap();

    let events = runner
        .run(session.id, "go", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    assert_eq!(authors(&events).iter().filter(|a| **a == "drafter").count(), 3);
    assert!(matches!(
        events.last().unwrap().signal(),
        Some(ControlSignal::Failed { kind: FailureKind::MaxIterationsExceeded, .. })
    ));
}

#[tokio::test]
async fn exit_loop_tool_ends_the_loop() {
    let critic_model = Arc::new(
        ScriptedModel::new("critic")
            .respond(LlmResponse::text("needs work"))
            .respond(LlmResponse::tool_calls(vec![ToolCall::new("x1", "exit_loop", json!({}))])),
    );
    let critic: Arc<dyn Agent> = Arc::new(LlmAgent::new("critic", critic_model).with_tools(["exit_loop"]));
    let root: Arc<dyn Agent> = Arc::new(LoopAgent::new(
        "refine",
        LoopMode::UntilEscalate { max_iterations: 5 },
        vec![speaker("drafter"), critic],
    ));
    let runner = Runner::builder(root)
        .tool(Arc::new(ExitLoopTool))
        .build()
        .unwrap();
    let session = runner.create_session("alice").await.unwrap();

    let events = runner
        .run(session.id, "write a poem", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    assert_eq!(authors(&events).iter().filter(|a| **a == "drafter").count(), 2);
    assert!(events.iter().any(|e| e.is_escalation()));
    assert_eq!(events.last().unwrap().signal(), Some(&ControlSignal::TurnComplete));
}

#[tokio::test]
async fn exit_loop_from_a_nested_agent_runs_every_after_agent_hook() {
    let critic_model = Arc::new(
        ScriptedModel::new("critic")
            .respond(LlmResponse::tool_calls(vec![ToolCall::new("x1", "exit_loop", json!({}))])),
    );
    let critic: Arc<dyn Agent> = Arc::new(LlmAgent::new("critic", critic_model).with_tools(["exit_loop"]));
    let inner: Arc<dyn Agent> = Arc::new(SequentialAgent::new("inner", vec![critic]));
    let root: Arc<dyn Agent> = Arc::new(LoopAgent::new(
        "loop",
        LoopMode::UntilEscalate { max_iterations: 3 },
        vec![inner],
    ));
    let recorder = RecordingCallback::new();
    let runner = Runner::builder(root)
        .tool(Arc::new(ExitLoopTool))
        .callback(Arc::new(recorder.clone()))
        .build()
        .unwrap();
    let session = runner.create_session("alice").await.unwrap();

    let events = runner
        .run(session.id, "review the draft", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    assert_eq!(events.last().unwrap().signal(), Some(&ControlSignal::TurnComplete));
    assert_eq!(
        recorder.entries(),
        vec![
            "before_agent:loop",
            "before_agent:inner",
            "before_agent:critic",
            "before_model:critic",
            "after_model:critic",
            "before_tool:critic",
            "after_tool:critic",
            "after_agent:critic",
            "after_agent:inner",
            "after_agent:loop",
        ]
    );
}

#[tokio::test]
async fn schema_violation_never_invokes_the_tool() {
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let strict = runtime::tools::FunctionTool::new(
        "add",
        "Add two integers",
        json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
            "required": ["a", "b"]
        }),
        move |_| {
            counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Ok(json!(0)) }
        },
    );
    let model = Arc::new(
        ScriptedModel::new("scripted")
            .respond(LlmResponse::tool_calls(vec![ToolCall::new("c1", "add", json!({"a": "two"}))]))
            .respond(LlmResponse::text("sorry")),
    );
    let agent: Arc<dyn Agent> = Arc::new(LlmAgent::new("calc", model).with_tools(["add"]));
    let runner = Runner::builder(agent).tool(Arc::new(strict)).build().unwrap();
    let session = runner.create_session("alice").await.unwrap();

    let events = runner
        .run(session.id, "add two and two", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    let invalid: Vec<_> = events
        .iter()
        .filter(|e| {
            matches!(
                &e.kind,
                EventKind::ToolResult {
                    outcome: ToolOutcome::Error { kind: ToolErrorKind::InvalidArguments, .. },
                    ..
                }
            )
        })
        .collect();
    assert_eq!(invalid.len(), 1);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn configured_run_settings_apply_to_default_invocations() {
    let config = RuntimeConfig::parse(
        r#"
[run]
max_turns = 1
on_max_turns = "suspend"
"#,
    )
    .unwrap();
    let agent: Arc<dyn Agent> = Arc::new(LlmAgent::new("calc", adding_model()).with_tools(["add"]));
    let runner = Runner::builder(agent)
        .config(config)
        .tool(add_tool())
        .build()
        .unwrap();
    let session = runner.create_session("alice").await.unwrap();

    let events = runner
        .run_with_defaults(session.id, "what is 2+2?")
        .collect_events()
        .await
        .unwrap();

    let kinds: Vec<&str> = events.iter().map(|e| e.kind.name()).collect();
    assert_eq!(kinds, vec!["user_message", "tool_call", "tool_result", "control"]);
    assert!(matches!(
        events.last().unwrap().signal(),
        Some(ControlSignal::Suspended { .. })
    ));
}

#[tokio::test]
async fn configured_policy_denies_tools() {
    let config = RuntimeConfig::parse(
        r#"
[deny]
tools = ["add"]
"#,
    )
    .unwrap();
    let agent: Arc<dyn Agent> = Arc::new(LlmAgent::new("calc", adding_model()).with_tools(["add"]));
    let runner = Runner::builder(agent)
        .config(config)
        .tool(add_tool())
        .build()
        .unwrap();
    let session = runner.create_session("alice").await.unwrap();

    let events = runner
        .run(session.id, "what is 2+2?", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    assert!(matches!(
        &events[2].kind,
        EventKind::ToolResult { outcome: ToolOutcome::Error { kind: ToolErrorKind::Denied, .. }, .. }
    ));
}

#[tokio::test]
async fn callbacks_see_every_point_in_order() {
    init_tracing();
    let recorder = RecordingCallback::new();
    let agent: Arc<dyn Agent> = Arc::new(LlmAgent::new("calc", adding_model()).with_tools(["add"]));
    let runner = Runner::builder(agent)
        .tool(add_tool())
        .callback(Arc::new(LoggingCallback::new()))
        .callback(Arc::new(recorder.clone()))
        .build()
        .unwrap();
    let session = runner.create_session("alice").await.unwrap();

    runner
        .run(session.id, "what is 2+2?", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    assert_eq!(
        recorder.entries(),
        vec![
            "before_agent:calc",
            "before_model:calc",
            "after_model:calc",
            "before_tool:calc",
            "after_tool:calc",
            "before_model:calc",
            "after_model:calc",
            "after_agent:calc",
        ]
    );
}

#[tokio::test]
async fn selected_model_is_routed_through_the_catalog() {
    let model = Arc::new(ScriptedModel::new("default-model").respond(LlmResponse::text("hi")));
    let agent: Arc<dyn Agent> = Arc::new(LlmAgent::new("chat", model.clone()));
    let catalog = Arc::new(StaticCatalog::from_ids(["anthropic/claude-3.5-sonnet"]));
    let runner = Runner::builder(agent)
        .callback(Arc::new(ModelSelectionCallback::new(catalog)))
        .build()
        .unwrap();
    let session = runner.create_session("alice").await.unwrap();
    runner
        .store()
        .append(
            session.id,
            NewEvent::new(
                USER_AUTHOR,
                EventKind::state("selectedModel", json!(" anthropic/claude-3.5-sonnet ")),
            ),
        )
        .await
        .unwrap();

    runner
        .run(session.id, "hello", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    assert_eq!(model.requests()[0].model, "openrouter/anthropic/claude-3.5-sonnet");
}

#[tokio::test]
async fn memory_carries_across_sessions() {
    let memory = Arc::new(InMemoryMemoryService::new());
    let model = Arc::new(
        ScriptedModel::new("scripted")
            .respond(LlmResponse::text("noted"))
            .respond(LlmResponse::tool_calls(vec![ToolCall::new(
                "m1",
                "load_memory",
                json!({"query": "favourite colour"}),
            )]))
            .respond(LlmResponse::text("teal")),
    );
    let agent: Arc<dyn Agent> = Arc::new(LlmAgent::new("assistant", model.clone()).with_tools(["load_memory"]));
    let runner = Runner::builder(agent)
        .tool(Arc::new(LoadMemoryTool))
        .callback(Arc::new(SessionMemoryCallback::new()))
        .memory(memory)
        .build()
        .unwrap();

    let first = runner.create_session("alice").await.unwrap();
    runner
        .run(first.id, "my favourite colour is teal", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    let second = runner.create_session("alice").await.unwrap();
    let events = runner
        .run(second.id, "what is my favourite colour?", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    let recalled = events.iter().find_map(|e| match &e.kind {
        EventKind::ToolResult { outcome: ToolOutcome::Success { output }, .. } => Some(output.clone()),
        _ => None,
    });
    let recalled = recalled.unwrap().to_string();
    assert!(recalled.contains("my favourite colour is teal"));
}

#[tokio::test]
async fn agent_tool_runs_a_sub_agent_inline() {
    let researcher_model = Arc::new(ScriptedModel::new("researcher").respond(LlmResponse::text("Lisbon is sunny")));
    let researcher: Arc<dyn Agent> = Arc::new(LlmAgent::new("researcher", researcher_model));
    let planner_model = Arc::new(
        ScriptedModel::new("planner")
            .respond(LlmResponse::tool_calls(vec![ToolCall::new(
                "r1",
                "researcher",
                json!({"request": "weather in Lisbon"}),
            )]))
            .respond(LlmResponse::text("Pack sunglasses")),
    );
    let planner: Arc<dyn Agent> = Arc::new(LlmAgent::new("planner", planner_model).with_tools(["researcher"]));
    let runner = Runner::builder(planner)
        .tool(Arc::new(AgentTool::new(researcher).unwrap()))
        .build()
        .unwrap();
    let session = runner.create_session("alice").await.unwrap();

    let events = runner
        .run(session.id, "plan my trip", RunConfig::default())
        .collect_events()
        .await
        .unwrap();

    assert!(events.iter().any(|e| {
        matches!(
            &e.kind,
            EventKind::ToolResult { outcome: ToolOutcome::Success { output }, .. }
                if *output == json!("Lisbon is sunny")
        )
    }));
    assert_eq!(events[events.len() - 2].final_text(), Some("Pack sunglasses"));
    assert_gap_free(&events);
}

#[test]
fn duplicate_agent_names_fail_build() {
    let root: Arc<dyn Agent> = Arc::new(SequentialAgent::new(
        "root",
        vec![speaker("same"), speaker("same")],
    ));
    assert!(matches!(
        Runner::builder(root).build(),
        Err(Error::DuplicateAgent(name)) if name == "same"
    ));
}
