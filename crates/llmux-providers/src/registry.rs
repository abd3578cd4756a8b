//! Provider registry and model-identifier resolution.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use llmux_core::{
    CompletionOption, CompletionRequest, CompletionResponse, Config, Message, ProviderError, ProviderResult,
};

use super::anthropic::AnthropicProvider;
use super::google::GoogleProvider;
use super::openai::OpenAIProvider;
use super::stream::ResponseStream;
use super::traits::Provider;

/// Registry of available providers, keyed by [`Provider::name`].
///
/// Shared by reference (usually behind an `Arc`); registration and lookup
/// may happen concurrently.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Register the built-in providers using keys and endpoints from
    /// configuration, falling back to the environment.
    ///
    /// Providers without a credential are still registered; calls to them
    /// fail with [`ProviderError::MissingCredential`].
    pub fn from_config(config: &Config) -> Self {
        let registry = Self::new();
        registry.register(Arc::new(OpenAIProvider::from_config(&config.providers.openai)));
        registry.register(Arc::new(AnthropicProvider::from_config(&config.providers.anthropic)));
        registry.register(Arc::new(GoogleProvider::from_config(&config.providers.google)));
        registry
    }

    /// Register the built-in providers with keys from environment variables.
    pub fn from_env() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(OpenAIProvider::from_env()));
        registry.register(Arc::new(AnthropicProvider::from_env()));
        registry.register(Arc::new(GoogleProvider::from_env()));
        registry
    }

    /// Register a provider, replacing any previous one with the same name.
    pub fn register(&self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        debug!(provider = %name, "registering provider");
        self.providers.write().insert(name, provider);
    }

    /// Get a provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    /// Split `provider/model` on the first `/`.
    pub fn parse_model_id(model_id: &str) -> ProviderResult<(&str, &str)> {
        match model_id.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => Ok((provider, model)),
            _ => Err(ProviderError::InvalidIdentifier {
                identifier: model_id.to_string(),
            }),
        }
    }

    /// Resolve a qualified model id to its provider and bare model name.
    pub fn resolve(&self, model_id: &str) -> ProviderResult<(Arc<dyn Provider>, String)> {
        let (name, model) = Self::parse_model_id(model_id)?;

        // The read lock is released here, before any network I/O
        let provider = self.get(name).ok_or_else(|| ProviderError::ProviderNotFound {
            provider: name.to_string(),
        })?;

        if !provider.supports_model(model) {
            return Err(ProviderError::ModelUnsupported {
                provider: name.to_string(),
                model: model.to_string(),
            });
        }

        Ok((provider, model.to_string()))
    }

    /// Run a completion against a qualified model id.
    pub async fn completion(
        &self,
        cancel: &CancellationToken,
        model_id: &str,
        messages: &[Message],
        options: &[CompletionOption],
    ) -> ProviderResult<CompletionResponse> {
        let (provider, model) = self.resolve(model_id)?;
        let request = CompletionRequest::new(model, messages.to_vec()).with_options(options);
        provider.completion(cancel, request).await
    }

    /// Open a streaming completion against a qualified model id.
    pub async fn completion_stream(
        &self,
        cancel: &CancellationToken,
        model_id: &str,
        messages: &[Message],
        options: &[CompletionOption],
    ) -> ProviderResult<ResponseStream> {
        let (provider, model) = self.resolve(model_id)?;
        let mut request = CompletionRequest::new(model, messages.to_vec()).with_options(options);
        request.stream = true;
        provider.completion_stream(cancel, request).await
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").field("providers", &self.list()).finish()
    }
}
