//! Provider trait definitions.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use llmux_core::{CompletionRequest, CompletionResponse, ProviderResult};

use crate::stream::ResponseStream;

/// Core provider trait - every vendor adapter implements this.
///
/// Implementations must be safe to share across tasks; the registry hands out
/// `Arc<dyn Provider>` to concurrent callers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry key, e.g. `"openai"`.
    fn name(&self) -> &str;

    /// Whether this provider accepts `model`. Pure, no network access.
    fn supports_model(&self, model: &str) -> bool;

    /// Models this provider advertises.
    fn available_models(&self) -> Vec<String> {
        Vec::new()
    }

    /// Check if provider has the credentials it needs.
    fn is_configured(&self) -> bool {
        true
    }

    /// Generate a completion (non-streaming).
    async fn completion(
        &self,
        cancel: &CancellationToken,
        request: CompletionRequest,
    ) -> ProviderResult<CompletionResponse>;

    /// Open a streaming completion.
    async fn completion_stream(
        &self,
        cancel: &CancellationToken,
        request: CompletionRequest,
    ) -> ProviderResult<ResponseStream>;
}
