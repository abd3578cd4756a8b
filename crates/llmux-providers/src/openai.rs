//! OpenAI (GPT) provider implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use llmux_core::{
    CompletionChoice, CompletionRequest, CompletionResponse, CompletionUsage, Message, ProviderConfig,
    ProviderError, ProviderResult, Role, OBJECT_COMPLETION,
};

use crate::sse::SseEvent;
use crate::stream::{parse_event, ChunkDecoder, ChunkMeta, Decoded, ResponseStream};
use crate::traits::Provider;
use crate::transport;

/// Default OpenAI API base URL.
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Environment variable holding the API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Models accepted by [`OpenAIProvider::supports_model`].
pub const OPENAI_MODELS: &[&str] = &[
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-16k",
    "gpt-4",
    "gpt-4-turbo",
    "gpt-4o",
    "gpt-4o-mini",
    "o1",
    "o1-mini",
    "o1-preview",
    "o3-mini",
    "o4-mini",
];

/// OpenAI provider for GPT models.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    organization: Option<String>,
    timeout: Duration,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider. An empty key fails at call time.
    pub fn new(api_key: impl Into<String>) -> Self {
        let timeout = Duration::from_secs(llmux_core::config::DEFAULT_TIMEOUT_SECS);
        Self {
            client: transport::build_client(timeout),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            organization: None,
            timeout,
        }
    }

    /// Create from the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Self {
        Self::new(std::env::var(OPENAI_API_KEY_ENV).unwrap_or_default())
    }

    /// Create from configuration, falling back to the environment.
    pub fn from_config(config: &ProviderConfig) -> Self {
        let mut provider = Self::new(config.resolve_api_key(OPENAI_API_KEY_ENV).unwrap_or_default())
            .with_timeout(Duration::from_secs(config.timeout_secs));
        if let Some(ref base_url) = config.base_url {
            provider = provider.with_base_url(base_url);
        }
        provider
    }

    /// Set a custom base URL (for OpenRouter, Azure, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the organization ID.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = transport::build_client(timeout);
        self.timeout = timeout;
        self
    }

    /// Translate a canonical request into the chat-completions schema.
    fn build_request<'a>(&self, request: &'a CompletionRequest, stream: bool) -> OpenAIRequest<'a> {
        let (max_tokens, max_completion_tokens) = if uses_max_completion_tokens(&request.model) {
            (None, request.max_tokens)
        } else {
            (request.max_tokens, None)
        };

        OpenAIRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| OpenAIMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            top_p: request.top_p,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
            max_tokens,
            max_completion_tokens,
            stop: &request.stop,
            stream,
            logit_bias: request.logit_bias.as_ref(),
            user: request.user.as_deref(),
        }
    }

    fn post(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");

        if let Some(ref org) = self.organization {
            req = req.header("OpenAI-Organization", org);
        }

        req.json(body)
    }

    fn ensure_configured(&self) -> ProviderResult<()> {
        if self.api_key.is_empty() {
            return Err(ProviderError::missing_credential(self.name(), Some(OPENAI_API_KEY_ENV)));
        }
        Ok(())
    }

    /// Convert the vendor response into our format.
    fn parse_response(&self, response: OpenAIResponse, raw: serde_json::Value) -> CompletionResponse {
        CompletionResponse {
            id: response.id,
            object: response.object.unwrap_or_else(|| OBJECT_COMPLETION.to_string()),
            created: response.created.unwrap_or_else(|| chrono::Utc::now().timestamp()),
            model: response.model,
            provider: self.name().to_string(),
            choices: response
                .choices
                .into_iter()
                .map(|c| CompletionChoice {
                    index: c.index,
                    message: Message::new(parse_role(c.message.role.as_deref()), c.message.content.unwrap_or_default()),
                    finish_reason: c.finish_reason,
                })
                .collect(),
            usage: response.usage.map(OpenAIUsage::into_usage),
            system_fingerprint: response.system_fingerprint,
            raw: Some(raw),
        }
    }
}

/// Reasoning models take `max_completion_tokens` instead of `max_tokens`.
fn uses_max_completion_tokens(model: &str) -> bool {
    ["o1", "o3", "o4"]
        .iter()
        .any(|family| model == *family || model.starts_with(&format!("{}-", family)))
}

fn parse_role(role: Option<&str>) -> Role {
    role.and_then(|r| r.parse().ok()).unwrap_or(Role::Assistant)
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn supports_model(&self, model: &str) -> bool {
        OPENAI_MODELS.contains(&model)
    }

    fn available_models(&self) -> Vec<String> {
        OPENAI_MODELS.iter().map(|m| m.to_string()).collect()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    #[instrument(skip(self, cancel, request), fields(model = %request.model))]
    async fn completion(
        &self,
        cancel: &CancellationToken,
        request: CompletionRequest,
    ) -> ProviderResult<CompletionResponse> {
        self.ensure_configured()?;

        let body = transport::encode_body(self.name(), &self.build_request(&request, false), &request.extra_params)?;

        debug!("Sending request to OpenAI API");

        let response = transport::send(self.name(), cancel, self.post(&body).timeout(self.timeout)).await?;
        let (api_response, raw) = transport::read_json::<OpenAIResponse>(self.name(), cancel, response).await?;
        Ok(self.parse_response(api_response, raw))
    }

    #[instrument(skip(self, cancel, request), fields(model = %request.model))]
    async fn completion_stream(
        &self,
        cancel: &CancellationToken,
        request: CompletionRequest,
    ) -> ProviderResult<ResponseStream> {
        self.ensure_configured()?;

        let body = transport::encode_body(self.name(), &self.build_request(&request, true), &request.extra_params)?;

        debug!("Sending streaming request to OpenAI API");

        let response = transport::send(
            self.name(),
            cancel,
            self.post(&body).header("Accept", "text/event-stream"),
        )
        .await?;

        Ok(ResponseStream::from_response(
            self.name(),
            response,
            OpenAIChunkDecoder::new(self.name()),
            cancel.clone(),
        ))
    }
}

/// Decoder for flat per-choice deltas terminated by `[DONE]`.
pub(crate) struct OpenAIChunkDecoder {
    meta: ChunkMeta,
    seen_first: bool,
    roles: HashMap<u32, Role>,
}

impl OpenAIChunkDecoder {
    pub(crate) fn new(provider: &str) -> Self {
        Self {
            meta: ChunkMeta::new(provider),
            seen_first: false,
            roles: HashMap::new(),
        }
    }
}

impl ChunkDecoder for OpenAIChunkDecoder {
    fn decode(&mut self, event: &SseEvent) -> ProviderResult<Decoded> {
        let chunk: StreamChunkResponse = parse_event(&self.meta.provider, &event.data)?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::StreamError {
                provider: self.meta.provider.clone(),
                message: error.describe(),
            });
        }

        if !self.seen_first {
            self.seen_first = true;
            self.meta.id = chunk.id.unwrap_or_default();
            self.meta.model = chunk.model.unwrap_or_default();
            if let Some(created) = chunk.created {
                self.meta.created = created;
            }
            self.meta.system_fingerprint = chunk.system_fingerprint;
        }

        let mut choices = Vec::new();
        for choice in chunk.choices {
            // Role arrives only on the first delta of each choice
            if let Some(role) = choice.delta.role.as_deref().and_then(|r| r.parse().ok()) {
                self.roles.insert(choice.index, role);
            }
            let content = choice.delta.content.unwrap_or_default();
            let finish_reason = choice.finish_reason.filter(|r| !r.is_empty());
            if content.is_empty() && finish_reason.is_none() {
                continue;
            }
            let role = self.roles.get(&choice.index).copied().unwrap_or(Role::Assistant);
            choices.push(CompletionChoice {
                index: choice.index,
                message: Message::new(role, content),
                finish_reason,
            });
        }

        let usage = chunk.usage.map(OpenAIUsage::into_usage);
        if choices.is_empty() && usage.is_none() {
            return Ok(Decoded::Skip);
        }
        Ok(Decoded::Chunk(self.meta.chunk(choices, usage)))
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    logit_bias: Option<&'a HashMap<String, i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    id: String,
    object: Option<String>,
    created: Option<i64>,
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
    system_fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    #[serde(default)]
    index: u32,
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    role: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    total_tokens: Option<u32>,
}

impl OpenAIUsage {
    fn into_usage(self) -> CompletionUsage {
        CompletionUsage::from_reported(self.prompt_tokens, self.completion_tokens, self.total_tokens)
    }
}

// Streaming types

#[derive(Debug, Deserialize)]
struct StreamChunkResponse {
    id: Option<String>,
    model: Option<String>,
    created: Option<i64>,
    system_fingerprint: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<OpenAIUsage>,
    error: Option<StreamErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    #[serde(rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    message: String,
}

impl StreamErrorBody {
    fn describe(&self) -> String {
        match self.error_type {
            Some(ref kind) => format!("{}: {}", kind, self.message),
            None => self.message.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    role: Option<String>,
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use llmux_core::{with_extra_params, with_max_tokens, with_temperature};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest::new(model, vec![Message::system("be brief"), Message::user("Hello")])
    }

    #[test]
    fn test_provider_metadata() {
        let provider = OpenAIProvider::new("test-key");
        assert_eq!(provider.name(), "openai");
        assert!(provider.is_configured());
        assert!(provider.supports_model("gpt-4o"));
        assert!(!provider.supports_model("not-a-real-model"));
        assert!(!OpenAIProvider::new("").is_configured());
    }

    #[test]
    fn test_custom_base_url() {
        let provider = OpenAIProvider::new("test-key").with_base_url("https://openrouter.ai/api/v1/");
        assert_eq!(provider.base_url, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn test_reasoning_models_use_max_completion_tokens() {
        let provider = OpenAIProvider::new("k");
        let req = request("o1-mini").with_options(&[with_max_tokens(64)]);
        let wire = serde_json::to_value(provider.build_request(&req, false)).unwrap();
        assert_eq!(wire["max_completion_tokens"], json!(64));
        assert!(wire.get("max_tokens").is_none());

        let req = request("gpt-4o").with_options(&[with_max_tokens(64)]);
        let wire = serde_json::to_value(provider.build_request(&req, false)).unwrap();
        assert_eq!(wire["max_tokens"], json!(64));
        assert!(wire.get("max_completion_tokens").is_none());
        assert!(wire.get("stream").is_none());
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let provider = OpenAIProvider::new("");
        let err = provider
            .completion(&CancellationToken::new(), request("gpt-4o"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn test_completion_roundtrip() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "temperature": 0.2,
                "n": 1,
                "messages": [{"role": "system", "content": "be brief"}, {"role": "user", "content": "Hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1700000000,
                "model": "gpt-4o-2024-08-06",
                "system_fingerprint": "fp_1",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Hi!"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 9, "completion_tokens": 3}
            })))
            .mount(&mock_server)
            .await;

        let provider = OpenAIProvider::new("test-key").with_base_url(mock_server.uri());
        let req = request("gpt-4o").with_options(&[with_temperature(0.2), with_extra_params(json!({"n": 1}))]);
        let resp = provider.completion(&CancellationToken::new(), req).await.unwrap();

        assert_eq!(resp.id, "chatcmpl-1");
        assert_eq!(resp.provider, "openai");
        assert_eq!(resp.content(), "Hi!");
        assert_eq!(resp.finish_reason(), Some("stop"));
        assert_eq!(resp.system_fingerprint.as_deref(), Some("fp_1"));
        let usage = resp.usage.unwrap();
        assert_eq!(usage.total_tokens, 12);
        assert_eq!(resp.raw.unwrap()["model"], json!("gpt-4o-2024-08-06"));
    }

    #[tokio::test]
    async fn test_upstream_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&mock_server)
            .await;

        let provider = OpenAIProvider::new("key").with_base_url(mock_server.uri());
        let err = provider
            .completion(&CancellationToken::new(), request("gpt-4o"))
            .await
            .unwrap_err();

        match err {
            ProviderError::Upstream { status, body, .. } => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
            .mount(&mock_server)
            .await;

        let provider = OpenAIProvider::new("key").with_base_url(mock_server.uri());
        let err = provider
            .completion(&CancellationToken::new(), request("gpt-4o"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(30))
                    .set_body_json(json!({})),
            )
            .mount(&mock_server)
            .await;

        let provider = OpenAIProvider::new("key").with_base_url(mock_server.uri());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            provider.completion(&cancel, request("gpt-4o")),
        )
        .await
        .expect("cancelled call should not hang");
        assert!(matches!(result, Err(ProviderError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_stream_over_http() {
        let mock_server = MockServer::start().await;

        let sse = concat!(
            "data: {\"id\":\"c1\",\"model\":\"gpt-4o\",\"created\":1,\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Accept", "text/event-stream"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let provider = OpenAIProvider::new("key").with_base_url(mock_server.uri());
        let mut stream = provider
            .completion_stream(&CancellationToken::new(), request("gpt-4o"))
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(chunk) = stream.recv().await.unwrap() {
            assert_eq!(chunk.id, "c1");
            assert_eq!(chunk.provider, "openai");
            text.push_str(chunk.content());
        }
        assert_eq!(text, "Hello");
        assert!(stream.close().is_ok());
    }

    #[tokio::test]
    async fn test_stream_delta_sequence() {
        let events = concat!(
            "data: {\"id\":\"x\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"id\":\"x\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"id\":\"x\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\" there\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"id\":\"x\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"late\"}}]}\n\n",
        );
        let body = stream::iter(vec![Ok(events.as_bytes().to_vec())]);
        let mut s = ResponseStream::new("openai", body, OpenAIChunkDecoder::new("openai"), CancellationToken::new());

        let first = s.recv().await.unwrap().unwrap();
        assert_eq!(first.content(), "Hi");
        assert_eq!(first.choices[0].message.role, Role::Assistant);
        assert!(first.usage.is_none());

        let second = s.recv().await.unwrap().unwrap();
        assert_eq!(second.content(), " there");
        assert_eq!(second.finish_reason(), Some("stop"));

        assert!(s.recv().await.unwrap().is_none());
        assert!(s.close().is_ok());
        assert!(s.close().is_ok());
    }

    #[tokio::test]
    async fn test_stream_usage_only_chunk() {
        let events = concat!(
            "data: {\"id\":\"x\",\"choices\":[],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2,\"total_tokens\":6}}\n\n",
            "data: [DONE]\n\n",
        );
        let body = stream::iter(vec![Ok(events.as_bytes().to_vec())]);
        let mut s = ResponseStream::new("openai", body, OpenAIChunkDecoder::new("openai"), CancellationToken::new());

        let chunk = s.recv().await.unwrap().unwrap();
        assert!(chunk.choices.is_empty());
        assert_eq!(chunk.usage.unwrap().total_tokens, 6);
        assert!(s.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_error_event() {
        let events = concat!(
            "data: {\"id\":\"x\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"error\":{\"type\":\"server_error\",\"message\":\"The server had an error\"}}\n\n",
        );
        let body = stream::iter(vec![Ok(events.as_bytes().to_vec())]);
        let mut s = ResponseStream::new("openai", body, OpenAIChunkDecoder::new("openai"), CancellationToken::new());

        assert_eq!(s.recv().await.unwrap().unwrap().content(), "Hi");
        match s.recv().await {
            Err(ProviderError::StreamError { provider, message }) => {
                assert_eq!(provider, "openai");
                assert!(message.contains("server_error"));
                assert!(message.contains("The server had an error"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(s.recv().await.unwrap().is_none());
    }
}
