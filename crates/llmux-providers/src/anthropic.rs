//! Anthropic (Claude) provider implementation.

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

/// Anthropic API base URL.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";

/// Current Anthropic API version.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// `max_tokens` is mandatory on this API.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Environment variable holding the API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Models accepted by [`AnthropicProvider::supports_model`].
pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-opus-4-20250514",
    "claude-3-7-sonnet-20250219",
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
    "claude-2.1",
    "claude-2.0",
    "claude-instant-1.2",
];

/// Anthropic provider for Claude models.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    api_version: String,
    timeout: Duration,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let timeout = Duration::from_secs(llmux_core::config::DEFAULT_TIMEOUT_SECS);
        Self {
            client: transport::build_client(timeout),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            api_version: ANTHROPIC_VERSION.to_string(),
            timeout,
        }
    }

    /// Create from the `ANTHROPIC_API_KEY` environment variable.
    pub fn from_env() -> Self {
        Self::new(std::env::var(ANTHROPIC_API_KEY_ENV).unwrap_or_default())
    }

    /// Create from configuration, falling back to the environment.
    pub fn from_config(config: &ProviderConfig) -> Self {
        let mut provider = Self::new(config.resolve_api_key(ANTHROPIC_API_KEY_ENV).unwrap_or_default())
            .with_timeout(Duration::from_secs(config.timeout_secs));
        if let Some(ref base_url) = config.base_url {
            provider = provider.with_base_url(base_url);
        }
        provider
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the `anthropic-version` header.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = transport::build_client(timeout);
        self.timeout = timeout;
        self
    }

    /// Translate a canonical request into the messages schema.
    ///
    /// System messages are lifted into the top-level `system` field.
    fn build_request<'a>(&self, request: &'a CompletionRequest, stream: bool) -> AnthropicRequest<'a> {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        if request.frequency_penalty.is_some() || request.presence_penalty.is_some() || request.logit_bias.is_some() {
            debug!("Anthropic ignores penalty and logit bias options");
        }

        AnthropicRequest {
            model: &request.model,
            messages,
            system: if system.is_empty() { None } else { Some(system.join("\n\n")) },
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: &request.stop,
            stream,
            metadata: request.user.as_deref().map(|user_id| AnthropicMetadata { user_id }),
        }
    }

    fn post(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(body)
    }

    fn ensure_configured(&self) -> ProviderResult<()> {
        if self.api_key.is_empty() {
            return Err(ProviderError::missing_credential(self.name(), Some(ANTHROPIC_API_KEY_ENV)));
        }
        Ok(())
    }

    /// Parse response into our format.
    fn parse_response(&self, response: AnthropicResponse, raw: serde_json::Value) -> CompletionResponse {
        let content: String = response
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text.as_str()),
                ResponseBlock::Other => None,
            })
            .collect();

        CompletionResponse {
            id: response.id,
            object: OBJECT_COMPLETION.to_string(),
            created: chrono::Utc::now().timestamp(),
            model: response.model,
            provider: self.name().to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: response.stop_reason,
            }],
            usage: Some(CompletionUsage::new(
                response.usage.input_tokens,
                response.usage.output_tokens,
            )),
            system_fingerprint: None,
            raw: Some(raw),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn supports_model(&self, model: &str) -> bool {
        ANTHROPIC_MODELS.contains(&model)
    }

    fn available_models(&self) -> Vec<String> {
        ANTHROPIC_MODELS.iter().map(|m| m.to_string()).collect()
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

        debug!("Sending request to Anthropic API");

        let response = transport::send(self.name(), cancel, self.post(&body).timeout(self.timeout)).await?;
        let (api_response, raw) = transport::read_json::<AnthropicResponse>(self.name(), cancel, response).await?;
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

        debug!("Sending streaming request to Anthropic API");

        let response = transport::send(
            self.name(),
            cancel,
            self.post(&body).header("Accept", "text/event-stream"),
        )
        .await?;

        Ok(ResponseStream::from_response(
            self.name(),
            response,
            AnthropicChunkDecoder::new(self.name()),
            cancel.clone(),
        ))
    }
}

/// Decoder for the typed `message_start` / `content_block_delta` /
/// `message_delta` event sequence.
pub(crate) struct AnthropicChunkDecoder {
    meta: ChunkMeta,
    input_tokens: u32,
}

impl AnthropicChunkDecoder {
    pub(crate) fn new(provider: &str) -> Self {
        Self {
            meta: ChunkMeta::new(provider),
            input_tokens: 0,
        }
    }
}

impl ChunkDecoder for AnthropicChunkDecoder {
    fn decode(&mut self, event: &SseEvent) -> ProviderResult<Decoded> {
        let parsed: StreamEvent = parse_event(&self.meta.provider, &event.data)?;

        Ok(match parsed {
            StreamEvent::MessageStart { message } => {
                self.meta.id = message.id;
                self.meta.model = message.model;
                self.input_tokens = message.usage.map(|u| u.input_tokens).unwrap_or(0);
                Decoded::Skip
            }
            StreamEvent::ContentBlockStart { content_block } => match content_block.text {
                Some(text) if !text.is_empty() => Decoded::Chunk(self.meta.text_chunk(text, None, None)),
                _ => Decoded::Skip,
            },
            StreamEvent::ContentBlockDelta { delta } => match delta.text {
                Some(text) if !text.is_empty() => Decoded::Chunk(self.meta.text_chunk(text, None, None)),
                // Tool input deltas and empty text
                _ => Decoded::Skip,
            },
            StreamEvent::MessageDelta { delta, usage } => match delta.stop_reason {
                Some(reason) => {
                    let output_tokens = usage.map(|u| u.output_tokens).unwrap_or(0);
                    let usage = CompletionUsage::new(self.input_tokens, output_tokens);
                    Decoded::Last(self.meta.text_chunk("", Some(reason), Some(usage)))
                }
                None => Decoded::Skip,
            },
            StreamEvent::MessageStop => Decoded::End,
            StreamEvent::Error { error } => {
                return Err(ProviderError::StreamError {
                    provider: self.meta.provider.clone(),
                    message: format!("{}: {}", error.error_type, error.message),
                })
            }
            StreamEvent::Ping | StreamEvent::Unknown => Decoded::Skip,
        })
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop_sequences: &'a [String],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<AnthropicMetadata<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicMetadata<'a> {
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

// Streaming types

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StreamMessage,
    },
    ContentBlockStart {
        content_block: StreamContentBlock,
    },
    ContentBlockDelta {
        delta: StreamContentBlock,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: StreamErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    id: String,
    #[serde(default)]
    model: String,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
}
