/// A request to run a tool on behalf of an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub agent: String,
    pub tool: String,
}

impl ToolRequest {
    pub fn new(agent: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            tool: tool.into(),
        }
    }

    /// The `agent:tool` form matched by agent-qualified rules.
    pub fn qualified(&self) -> String {
        format!("{}:{}", self.agent, self.tool)
    }
}
