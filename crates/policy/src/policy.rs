//! Policy configuration and enforcement.

use crate::{Error, Result, ToolRequest};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Policy configuration loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPolicy {
    /// Tools that are explicitly allowed.
    #[serde(default)]
    pub allow: AllowRules,

    /// Tools that are explicitly denied (overrides allow).
    #[serde(default)]
    pub deny: DenyRules,
}

/// Rules for allowed tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowRules {
    /// Allowed tool patterns. Defaults to everything.
    #[serde(default = "allow_everything")]
    pub tools: Vec<String>,
}

impl Default for AllowRules {
    fn default() -> Self {
        Self {
            tools: allow_everything(),
        }
    }
}

fn allow_everything() -> Vec<String> {
    vec!["*".to_string()]
}

/// Rules for denied tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DenyRules {
    /// Denied tool patterns.
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Result of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Convert a denial into an error.
    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny { reason } => Err(Error::Denied(reason)),
        }
    }
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

impl ToolPolicy {
    /// Load policy from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse policy from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        let policy: Self = toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Allow every tool.
    pub fn permissive() -> Self {
        Self {
            allow: AllowRules::default(),
            deny: DenyRules::default(),
        }
    }

    /// Deny every tool unless explicitly allowed.
    pub fn restrictive() -> Self {
        Self {
            allow: AllowRules { tools: Vec::new() },
            deny: DenyRules::default(),
        }
    }

    /// Reject empty patterns, which would otherwise never match.
    pub fn validate(&self) -> Result<()> {
        let all = self.allow.tools.iter().chain(&self.deny.tools);
        for pattern in all {
            if pattern.trim().is_empty() {
                return Err(Error::Invalid("empty tool pattern".into()));
            }
        }
        Ok(())
    }

    /// Check if a tool request is allowed.
    pub fn check(&self, request: &ToolRequest) -> Decision {
        // Check explicit denials first
        if let Some(pattern) = self.deny.tools.iter().find(|p| matches(p, request)) {
            return Decision::Deny {
                reason: format!("tool '{}' denied by rule '{pattern}'", request.tool),
            };
        }

        if self.allow.tools.iter().any(|p| matches(p, request)) {
            Decision::Allow
        } else {
            Decision::Deny {
                reason: format!(
                    "tool '{}' not in allowlist for agent '{}'",
                    request.tool, request.agent
                ),
            }
        }
    }
}

fn matches(pattern: &str, request: &ToolRequest) -> bool {
    if pattern.contains(':') {
        matches_name(pattern, &request.qualified())
    } else {
        matches_name(pattern, &request.tool)
    }
}

fn matches_name(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissive_allows_everything() {
        let policy = ToolPolicy::permissive();
        assert!(policy.check(&ToolRequest::new("root", "anything")).is_allowed());
    }

    #[test]
    fn test_restrictive_denies_everything() {
        let policy = ToolPolicy::restrictive();
        assert!(!policy.check(&ToolRequest::new("root", "add")).is_allowed());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[allow]
tools = ["fs_read*", "add"]

[deny]
tools = ["fs_read_secret", "intern:add"]
"#;
        let policy = ToolPolicy::parse(toml).unwrap();

        // Allowed
        assert!(policy.check(&ToolRequest::new("root", "fs_read_file")).is_allowed());
        assert!(policy.check(&ToolRequest::new("root", "add")).is_allowed());

        // Denied
        assert!(!policy.check(&ToolRequest::new("root", "fs_read_secret")).is_allowed());
        assert!(!policy.check(&ToolRequest::new("intern", "add")).is_allowed());
        assert!(!policy.check(&ToolRequest::new("root", "shell")).is_allowed());
    }

    #[test]
    fn test_missing_allow_section_allows_all() {
        let policy = ToolPolicy::parse("[deny]\ntools = [\"shell\"]\n").unwrap();
        assert!(policy.check(&ToolRequest::new("root", "add")).is_allowed());
        assert!(!policy.check(&ToolRequest::new("root", "shell")).is_allowed());
    }

    #[test]
    fn test_empty_pattern_is_invalid() {
        let err = ToolPolicy::parse("[deny]\ntools = [\"  \"]\n").unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn test_denial_converts_to_error() {
        let decision = ToolPolicy::restrictive().check(&ToolRequest::new("root", "add"));
        assert!(matches!(decision.into_result(), Err(Error::Denied(_))));
    }
}
