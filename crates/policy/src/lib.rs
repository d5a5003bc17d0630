//! Tool policy.
//!
//! Core principle: **an agent may only call the tools the policy allows.**
//!
//! Rules are plain patterns: `*` matches everything, a trailing `*` matches
//! a prefix, anything else matches exactly. A pattern containing `:` is
//! matched against `agent:tool` instead of the bare tool name. Deny rules
//! always win over allow rules.
//!
//! ```
//! use policy::{ToolPolicy, ToolRequest};
//!
//! let policy = ToolPolicy::parse(r#"
//! [allow]
//! tools = ["search_*", "add"]
//!
//! [deny]
//! tools = ["writer:search_web"]
//! "#).unwrap();
//!
//! assert!(policy.check(&ToolRequest::new("planner", "search_web")).is_allowed());
//! assert!(!policy.check(&ToolRequest::new("writer", "search_web")).is_allowed());
//! assert!(!policy.check(&ToolRequest::new("planner", "shell")).is_allowed());
//! ```

mod error;
mod policy;
mod request;

pub use error::{Error, Result};
pub use policy::{AllowRules, Decision, DenyRules, ToolPolicy};
pub use request::ToolRequest;
