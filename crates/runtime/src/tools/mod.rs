//! Tools, their registry, and dispatch of model tool calls.

mod agent_tool;
mod builtin;
mod dispatch;
pub mod errors;
mod function;
mod registry;
mod tool;

pub use agent_tool::AgentTool;
pub use builtin::{ExitLoopTool, LoadMemoryTool};
pub use dispatch::{Dispatched, dispatch};
pub use errors::ToolError;
pub use function::FunctionTool;
pub use registry::{RegisteredTool, TRANSFER_TOOL, ToolRegistry};
pub use tool::{Tool, ToolContext, ToolOutput};
