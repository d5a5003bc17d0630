//! Agent orchestration runtime.
//!
//! This crate runs trees of agents against a session. Everything an agent
//! does is recorded as an event in the session's append-only log (see the
//! `storage` crate), and the caller receives those events as a stream while
//! they are appended.
//!
//! # Overview
//!
//! - **Agent**: a unit of work. [`LlmAgent`] is driven by a model;
//!   [`SequentialAgent`], [`ParallelAgent`] and [`LoopAgent`] orchestrate
//!   children; [`CustomAgent`] wraps a closure.
//! - **Tool**: a named capability with a JSON-schema input, dispatched on
//!   behalf of an LLM agent.
//! - **Callback**: hooks before and after agents, model calls and tools,
//!   any of which may rewrite or short-circuit the step.
//! - **Runner**: starts invocations and owns their cancellation and live
//!   input.
//! - **Memory**: long-term recall across a user's sessions.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use runtime::model::{LlmResponse, ToolCall};
//! use runtime::testing::ScriptedModel;
//! use runtime::tools::FunctionTool;
//! use runtime::{LlmAgent, RunConfig, Runner};
//! use serde_json::json;
//!
//! # async fn example() -> runtime::Result<()> {
//! let model = Arc::new(
//!     ScriptedModel::new("demo")
//!         .respond(LlmResponse::tool_calls(vec![ToolCall::new("c1", "add", json!({"a": 2, "b": 2}))]))
//!         .respond(LlmResponse::text("4")),
//! );
//! let add = FunctionTool::new(
//!     "add",
//!     "Add two integers",
//!     json!({"type": "object", "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}}}),
//!     |args| async move { Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0))) },
//! );
//!
//! let agent = Arc::new(LlmAgent::new("calculator", model).with_tools(["add"]));
//! let runner = Runner::builder(agent).tool(Arc::new(add)).build()?;
//! let session = runner.create_session("alice").await?;
//!
//! let mut events = runner.run(session.id, "what is 2+2?", RunConfig::default());
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?.kind);
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod callbacks;
pub mod config;
mod context;
mod error;
pub mod memory;
pub mod model;
mod runner;
pub mod testing;
pub mod tools;

pub use agent::{
    Agent, AgentStatus, Capabilities, CustomAgent, EventStream, LlmAgent, LoopAgent, LoopMode,
    ParallelAgent, SequentialAgent,
};
pub use callbacks::{Callback, CallbackChain, CallbackContext, Flow};
pub use config::{ConfigError, MaxTurnsPolicy, RunConfig, RuntimeConfig, StreamingMode};
pub use context::InvocationContext;
pub use error::{Error, Result};
pub use memory::{InMemoryMemoryService, MemoryFragment, MemoryScope, MemoryService};
pub use runner::{CancelHandle, Invocation, LiveSender, RunInput, Runner, RunnerBuilder};
pub use tools::{Tool, ToolContext, ToolRegistry};
