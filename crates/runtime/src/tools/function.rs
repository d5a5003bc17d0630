use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use super::{Tool, ToolContext, ToolError, ToolOutput};

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<ToolOutput, ToolError>> + Send + Sync>;

/// A tool backed by an async closure.
///
/// ```
/// use runtime::tools::FunctionTool;
/// use serde_json::json;
///
/// let add = FunctionTool::new(
///     "add",
///     "Add two integers",
///     json!({
///         "type": "object",
///         "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
///         "required": ["a", "b"]
///     }),
///     |args| async move {
///         let a = args["a"].as_i64().unwrap_or_default();
///         let b = args["b"].as_i64().unwrap_or_default();
///         Ok(json!(a + b))
///     },
/// );
/// ```
pub struct FunctionTool {
    name: String,
    description: String,
    schema: Value,
    long_running: bool,
    handler: Handler,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| {
            let fut = handler(args);
            Box::pin(async move { fut.await.map(ToolOutput::Ready) })
        });
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            long_running: false,
            handler,
        }
    }

    /// A tool that starts work elsewhere and returns a ticket for it.
    ///
    /// Calls record a `Pending` outcome and suspend the invocation until
    /// the final result is supplied.
    pub fn long_running<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| {
            let fut = handler(args);
            Box::pin(async move { fut.await.map(|ticket| ToolOutput::Pending { ticket }) })
        });
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            long_running: true,
            handler,
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> Value {
        self.schema.clone()
    }

    fn is_long_running(&self) -> bool {
        self.long_running
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        (self.handler)(args).await
    }
}
