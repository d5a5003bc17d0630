//! Model backend contract and request/response types.

pub mod catalog;
pub mod errors;
pub mod retry;
pub mod types;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

pub use catalog::{ModelCatalog, ModelInfo, OpenRouterCatalog, StaticCatalog};
pub use errors::ModelError;
pub use retry::RetryConfig;
pub(crate) use retry::sleep_or_cancel;
pub use types::{
    GenerationConfig, LlmRequest, LlmResponse, Message, Modality, Part, Role, ToolCall, ToolSpec,
    Usage,
};

/// A stream of response fragments followed by one final response.
pub type ResponseStream<'a> = BoxStream<'a, Result<LlmResponse, ModelError>>;

/// A language model backend.
///
/// Backends that cannot stream only implement [`generate`](Self::generate);
/// the default [`generate_stream`](Self::generate_stream) yields its result as
/// a single final response.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Default model identifier used when an agent does not name one.
    fn name(&self) -> &str;

    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, ModelError>;

    fn generate_stream<'a>(&'a self, request: LlmRequest) -> ResponseStream<'a> {
        stream::once(self.generate(request)).boxed()
    }
}
