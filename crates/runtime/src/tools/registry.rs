use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use super::Tool;
use crate::model::ToolSpec;
use crate::{Error, Result};

/// Name of the built-in delegation tool offered to agents with children.
pub const TRANSFER_TOOL: &str = "transfer_to_agent";

/// A tool together with its compiled argument schema.
pub struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: JSONSchema,
}

impl RegisteredTool {
    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    pub fn spec(&self) -> ToolSpec {
        self.tool.spec()
    }

    /// Check arguments against the tool's schema.
    pub fn validate(&self, args: &Value) -> std::result::Result<(), String> {
        if let Err(errors) = self.validator.validate(args) {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect();
            return Err(messages.join("; "));
        }
        Ok(())
    }
}

/// Tools available to the agents of one runner.
///
/// Schemas are compiled on registration, so a tool with an invalid schema
/// never becomes callable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if name.trim().is_empty() {
            return Err(Error::InvalidToolSchema {
                tool: name,
                reason: "tool name must not be empty".into(),
            });
        }
        if name == TRANSFER_TOOL || self.tools.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }

        let schema = tool.schema();
        let validator = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema)
            .map_err(|e| Error::InvalidToolSchema {
                tool: name.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(tool = %name, long_running = tool.is_long_running(), "tool registered");
        self.tools.insert(name, RegisteredTool { tool, validator });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Specs for the named tools, in the given order. Unknown names are
    /// skipped.
    pub fn specs<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> Vec<ToolSpec> {
        names
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(RegisteredTool::spec)
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
