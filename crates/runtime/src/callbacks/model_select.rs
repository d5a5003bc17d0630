use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Callback, CallbackContext, Flow};
use crate::Result;
use crate::model::{LlmRequest, LlmResponse, ModelCatalog};

/// Session state key holding the model the caller picked.
pub const SELECTED_MODEL_STATE_KEY: &str = "selectedModel";

const ROUTER_PREFIX: &str = "openrouter/";

/// Routes each model call to the model selected in session state.
///
/// The selection is trimmed and checked against the catalog. When the
/// catalog is empty (for example because it could not be fetched), any
/// provider-qualified id such as `vendor/model` is accepted. Accepted ids
/// are sent with the `openrouter/` routing prefix. A missing or rejected
/// selection leaves the request's model untouched.
pub struct ModelSelectionCallback {
    catalog: Arc<dyn ModelCatalog>,
    state_key: String,
}

impl ModelSelectionCallback {
    pub fn new(catalog: Arc<dyn ModelCatalog>) -> Self {
        Self {
            catalog,
            state_key: SELECTED_MODEL_STATE_KEY.to_string(),
        }
    }

    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = key.into();
        self
    }

    async fn selected_model(&self, ctx: &CallbackContext) -> Result<Option<String>> {
        let state = ctx.state().await?;
        Ok(match state.get(&self.state_key) {
            Some(Value::String(model)) => {
                let model = model.trim();
                (!model.is_empty()).then(|| model.to_string())
            }
            _ => None,
        })
    }
}

fn with_router_prefix(model: &str) -> String {
    let has_prefix = model
        .get(..ROUTER_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(ROUTER_PREFIX));
    if has_prefix {
        model.to_string()
    } else {
        format!("{ROUTER_PREFIX}{model}")
    }
}

#[async_trait]
impl Callback for ModelSelectionCallback {
    fn name(&self) -> &str {
        "model_selection"
    }

    async fn before_model(
        &self,
        ctx: &CallbackContext,
        request: &mut LlmRequest,
    ) -> Result<Flow<LlmResponse>> {
        let Some(selected) = self.selected_model(ctx).await? else {
            tracing::info!(agent = ctx.agent_name(), model = %request.model, "no selected model in state");
            return Ok(Flow::Continue);
        };

        let allowed = self.catalog.model_ids().await;
        let is_allowed = if allowed.is_empty() {
            let qualified = selected.contains('/');
            if qualified {
                tracing::info!(model = %selected, "model list unavailable; allowing provider-prefixed model");
            }
            qualified
        } else {
            allowed.contains(&selected)
        };

        if !is_allowed {
            tracing::warn!(
                agent = ctx.agent_name(),
                model = %selected,
                fallback = %request.model,
                "selected model not in allowed list"
            );
            return Ok(Flow::Continue);
        }

        request.model = with_router_prefix(&selected);
        tracing::info!(agent = ctx.agent_name(), model = %request.model, "applied selected model");
        Ok(Flow::Continue)
    }
}
