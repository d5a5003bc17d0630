//! Catalogs of model identifiers a session may select.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const OPENROUTER_MODELS_URL: &str = "https://openrouter.ai/api/v1/models";
const OPENROUTER_API_KEY_VAR: &str = "OPENROUTER_API_KEY";
const DEFAULT_TTL: Duration = Duration::from_secs(60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// A model entry as shown to callers picking a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u64>,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            context_length: None,
        }
    }
}

/// Source of selectable models.
///
/// Lookups never fail: a catalog that cannot reach its source reports an
/// empty list and logs why.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn models(&self) -> Vec<ModelInfo>;

    async fn model_ids(&self) -> HashSet<String> {
        self.models().await.into_iter().map(|m| m.id).collect()
    }
}

/// A fixed list of models.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    models: Vec<ModelInfo>,
}

impl StaticCatalog {
    pub fn new(models: Vec<ModelInfo>) -> Self {
        Self { models }
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ids.into_iter().map(ModelInfo::new).collect())
    }
}

#[async_trait]
impl ModelCatalog for StaticCatalog {
    async fn models(&self) -> Vec<ModelInfo> {
        self.models.clone()
    }
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<RawModel>,
}

#[derive(Debug, Deserialize)]
struct RawModel {
    id: Option<String>,
    name: Option<String>,
    context_length: Option<u64>,
}

struct Cached {
    fetched_at: Instant,
    models: Vec<ModelInfo>,
}

/// OpenRouter's public model list, cached for a short TTL.
///
/// Concurrent lookups share one refresh. Failed fetches are cached as an
/// empty list for the same TTL so a dead endpoint is not hammered.
pub struct OpenRouterCatalog {
    client: reqwest::Client,
    api_key: Option<String>,
    url: String,
    ttl: Duration,
    cache: Mutex<Option<Cached>>,
}

impl OpenRouterCatalog {
    pub fn new(api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key,
            url: OPENROUTER_MODELS_URL.to_string(),
            ttl: DEFAULT_TTL,
            cache: Mutex::new(None),
        }
    }

    /// Read the API key from `OPENROUTER_API_KEY`.
    pub fn from_env() -> Self {
        Self::new(std::env::var(OPENROUTER_API_KEY_VAR).ok())
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn fetch(&self) -> Vec<ModelInfo> {
        let Some(api_key) = &self.api_key else {
            tracing::warn!("{OPENROUTER_API_KEY_VAR} not set; cannot fetch models");
            return Vec::new();
        };

        let response = self
            .client
            .get(&self.url)
            .bearer_auth(api_key)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        let body = match response {
            Ok(response) => response.json::<ModelsResponse>().await,
            Err(e) => Err(e),
        };

        match body {
            Ok(body) => body
                .data
                .into_iter()
                .filter_map(|raw| {
                    let id = raw.id?;
                    Some(ModelInfo {
                        name: raw.name.unwrap_or_else(|| id.clone()),
                        id,
                        context_length: raw.context_length,
                    })
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, url = %self.url, "failed to fetch model catalog");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ModelCatalog for OpenRouterCatalog {
    async fn models(&self) -> Vec<ModelInfo> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && cached.fetched_at.elapsed() < self.ttl
        {
            return cached.models.clone();
        }

        let models = self.fetch().await;
        tracing::debug!(count = models.len(), "model catalog refreshed");
        *cache = Some(Cached {
            fetched_at: Instant::now(),
            models: models.clone(),
        });
        models
    }
}
