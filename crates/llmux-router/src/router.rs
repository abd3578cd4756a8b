//! Task-based routing with priority ordering and fallback.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use llmux_core::{
    CompletionOption, CompletionResponse, Message, ProviderResult, RouteConfig, RouterConfig, TaskType,
    DEFAULT_FALLBACK_MODEL,
};
use llmux_providers::{ProviderRegistry, ResponseStream};

/// One candidate model for a task type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    /// Task the route serves
    pub task_type: TaskType,
    /// Qualified model id (`provider/model`)
    pub model_id: String,
    /// Higher is tried first
    pub priority: i32,
    /// Advertised output ceiling. Informational only; caller options are
    /// never clamped against it.
    pub max_tokens: u32,
}

impl ModelRoute {
    /// Create a route.
    pub fn new(task_type: TaskType, model_id: impl Into<String>, priority: i32, max_tokens: u32) -> Self {
        Self {
            task_type,
            model_id: model_id.into(),
            priority,
            max_tokens,
        }
    }
}

impl From<&RouteConfig> for ModelRoute {
    fn from(config: &RouteConfig) -> Self {
        Self::new(config.task, config.model.clone(), config.priority, config.max_tokens)
    }
}

/// Built-in route table used when no routes are configured.
fn default_routes() -> Vec<ModelRoute> {
    use TaskType::*;

    [
        (General, "openai/gpt-4o", 3, 16_384),
        (General, "anthropic/claude-3-5-sonnet-20241022", 2, 8_192),
        (General, "google/gemini-1.5-pro", 1, 8_192),
        (Creative, "anthropic/claude-3-opus-20240229", 3, 4_096),
        (Creative, "openai/gpt-4o", 2, 16_384),
        (CodeGeneration, "openai/gpt-4o", 3, 16_384),
        (CodeGeneration, "anthropic/claude-3-5-sonnet-20241022", 2, 8_192),
        (CodeExplanation, "anthropic/claude-3-5-sonnet-20241022", 3, 8_192),
        (CodeExplanation, "openai/gpt-4o", 2, 16_384),
        (ContentModeration, "openai/gpt-4o-mini", 2, 16_384),
        (ContentModeration, "anthropic/claude-3-haiku-20240307", 1, 4_096),
        (TextClassification, "openai/gpt-4o-mini", 2, 16_384),
        (TextClassification, "google/gemini-1.5-flash", 1, 8_192),
        (Summarization, "anthropic/claude-3-5-haiku-20241022", 2, 8_192),
        (Summarization, "google/gemini-1.5-flash", 1, 8_192),
        (Extraction, "openai/gpt-4o-mini", 2, 16_384),
        (Extraction, "anthropic/claude-3-haiku-20240307", 1, 4_096),
    ]
    .into_iter()
    .map(|(task, model, priority, max_tokens)| ModelRoute::new(task, model, priority, max_tokens))
    .collect()
}

/// Builder for constructing a [`Router`].
#[derive(Debug, Clone)]
pub struct RouterBuilder {
    routes: HashMap<TaskType, Vec<ModelRoute>>,
    fallback_model: String,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder {
    /// Create a builder with no routes and the default fallback model.
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
        }
    }

    /// Add a route. Routes of equal priority are tried in insertion order.
    pub fn route(mut self, route: ModelRoute) -> Self {
        self.routes.entry(route.task_type).or_default().push(route);
        self
    }

    /// Add several routes.
    pub fn routes(self, routes: impl IntoIterator<Item = ModelRoute>) -> Self {
        routes.into_iter().fold(self, Self::route)
    }

    /// Remove every route for a task.
    pub fn clear_task(mut self, task: TaskType) -> Self {
        self.routes.remove(&task);
        self
    }

    /// Set the fallback model.
    pub fn fallback_model(mut self, model_id: impl Into<String>) -> Self {
        self.fallback_model = model_id.into();
        self
    }

    /// Build the router.
    pub fn build(self, registry: Arc<ProviderRegistry>) -> Router {
        Router {
            registry,
            routes: self.routes,
            fallback_model: self.fallback_model,
        }
    }
}

/// Routes completions for a task type across prioritized candidates.
///
/// Immutable once built; use [`Router::to_builder`] to derive a modified
/// copy.
#[derive(Debug)]
pub struct Router {
    registry: Arc<ProviderRegistry>,
    routes: HashMap<TaskType, Vec<ModelRoute>>,
    fallback_model: String,
}

impl Router {
    /// Start building a router.
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Router with the built-in route table.
    pub fn with_defaults(registry: Arc<ProviderRegistry>) -> Self {
        RouterBuilder::new().routes(default_routes()).build(registry)
    }

    /// Router from configuration. An empty route list selects the built-in
    /// table.
    pub fn from_config(registry: Arc<ProviderRegistry>, config: &RouterConfig) -> Self {
        let builder = if config.routes.is_empty() {
            RouterBuilder::new().routes(default_routes())
        } else {
            RouterBuilder::new().routes(config.routes.iter().map(ModelRoute::from))
        };
        builder.fallback_model(config.fallback_model.clone()).build(registry)
    }

    /// Copy this router's table into a builder.
    pub fn to_builder(&self) -> RouterBuilder {
        RouterBuilder {
            routes: self.routes.clone(),
            fallback_model: self.fallback_model.clone(),
        }
    }

    /// The registry candidates are resolved against.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// The fallback model id.
    pub fn fallback(&self) -> &str {
        &self.fallback_model
    }

    /// Routes for a task in insertion order.
    pub fn routes(&self, task: TaskType) -> &[ModelRoute] {
        self.routes.get(&task).map(Vec::as_slice).unwrap_or_default()
    }

    /// Routes for a task in attempt order: descending priority, ties in
    /// insertion order. The fallback is not included.
    pub fn candidates(&self, task: TaskType) -> Vec<&ModelRoute> {
        let mut candidates: Vec<&ModelRoute> = self.routes(task).iter().collect();
        candidates.sort_by_key(|route| Reverse(route.priority));
        candidates
    }

    /// Run a completion on the best available model for `task`.
    pub async fn route(
        &self,
        cancel: &CancellationToken,
        task: TaskType,
        messages: &[Message],
        options: &[CompletionOption],
    ) -> ProviderResult<CompletionResponse> {
        let registry = self.registry.as_ref();
        self.select(task, move |model_id| async move {
            registry.completion(cancel, &model_id, messages, options).await
        })
        .await
    }

    /// Open a stream on the best available model for `task`.
    ///
    /// Success means the stream opened; failures after that surface through
    /// [`ResponseStream::recv`] and are not retried.
    pub async fn route_stream(
        &self,
        cancel: &CancellationToken,
        task: TaskType,
        messages: &[Message],
        options: &[CompletionOption],
    ) -> ProviderResult<ResponseStream> {
        let registry = self.registry.as_ref();
        self.select(task, move |model_id| async move {
            registry.completion_stream(cancel, &model_id, messages, options).await
        })
        .await
    }

    /// Try each candidate in order, then the fallback once.
    async fn select<T, F, Fut>(&self, task: TaskType, attempt: F) -> ProviderResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        for route in self.candidates(task) {
            debug!(task = %task, model = %route.model_id, priority = route.priority, "trying route");
            match attempt(route.model_id.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_candidate_failure() => {
                    warn!(task = %task, model = %route.model_id, error = %e, "route candidate failed");
                }
                Err(e) => return Err(e),
            }
        }

        info!(task = %task, model = %self.fallback_model, "using fallback model");
        attempt(self.fallback_model.clone()).await
    }
}
