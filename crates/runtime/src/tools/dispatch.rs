use storage::{Event, ToolErrorKind, ToolOutcome};

use super::{ToolContext, ToolOutput};
use crate::callbacks::CallbackContext;
use crate::context::InvocationContext;
use crate::model::ToolCall;
use crate::{Error, Result};

/// What dispatching one call produced.
#[derive(Debug)]
pub struct Dispatched {
    pub outcome: ToolOutcome,
    /// Events the tool appended while running, in append order.
    pub emitted: Vec<Event>,
    /// The tool asked the enclosing loop to stop.
    pub escalate: bool,
}

impl Dispatched {
    fn outcome(outcome: ToolOutcome) -> Self {
        Self {
            outcome,
            emitted: Vec::new(),
            escalate: false,
        }
    }
}

/// Run one tool call on behalf of `agent`.
///
/// Order: lookup, before-tool hooks, schema validation of the (possibly
/// rewritten) arguments, invocation raced against cancellation, after-tool
/// hooks. Lookup and validation failures become error outcomes; only hook
/// failures and cancellation are returned as `Err`.
pub async fn dispatch(
    ctx: &InvocationContext,
    agent: &str,
    allowed: &[String],
    call: &ToolCall,
) -> Result<Dispatched> {
    let registered = match ctx.tools().get(&call.name) {
        Some(registered) if allowed.iter().any(|name| name == &call.name) => registered,
        _ => {
            tracing::warn!(agent, tool = %call.name, call_id = %call.id, "unknown tool requested");
            return Ok(Dispatched::outcome(ToolOutcome::error(
                ToolErrorKind::NotFound,
                format!("tool '{}' is not available to agent '{agent}'", call.name),
            )));
        }
    };

    let callbacks = CallbackContext::new(ctx.clone(), agent);
    let tool_ctx = ToolContext::new(ctx.clone(), agent, &call.id);
    let mut args = call.input.clone();

    let mut outcome = match ctx
        .callbacks()
        .before_tool(&callbacks, &call.name, &mut args)
        .await?
    {
        Some(outcome) => outcome,
        None => match registered.validate(&args) {
            Err(reason) => {
                tracing::warn!(agent, tool = %call.name, call_id = %call.id, %reason, "invalid tool arguments");
                ToolOutcome::error(ToolErrorKind::InvalidArguments, reason)
            }
            Ok(()) => {
                tracing::debug!(agent, tool = %call.name, call_id = %call.id, "invoking tool");
                let result = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return Err(Error::Cancelled),
                    result = registered.tool().invoke(args.clone(), &tool_ctx) => result,
                };
                match result {
                    Ok(ToolOutput::Ready(output)) => ToolOutcome::success(output),
                    Ok(ToolOutput::Pending { ticket }) => ToolOutcome::Pending { ticket },
                    Err(e) => {
                        tracing::warn!(agent, tool = %call.name, call_id = %call.id, error = %e, "tool failed");
                        ToolOutcome::error(e.kind(), e.to_string())
                    }
                }
            }
        },
    };

    ctx.callbacks()
        .after_tool(&callbacks, &call.name, &args, &mut outcome)
        .await?;

    Ok(Dispatched {
        outcome,
        emitted: tool_ctx.take_emitted(),
        escalate: tool_ctx.escalation_requested(),
    })
}
