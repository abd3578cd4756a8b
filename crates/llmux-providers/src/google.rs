//! Google (Gemini) provider implementation.

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

/// Gemini API base URL.
const GOOGLE_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Environment variable holding the API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Models accepted by [`GoogleProvider::supports_model`].
pub const GOOGLE_MODELS: &[&str] = &[
    "gemini-1.5-pro",
    "gemini-1.5-flash",
    "gemini-2.0-pro",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-2.5-pro",
    "gemini-2.5-flash",
];

/// Google provider for Gemini models.
pub struct GoogleProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GoogleProvider {
    /// Create a new Google provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let timeout = Duration::from_secs(llmux_core::config::DEFAULT_TIMEOUT_SECS);
        Self {
            client: transport::build_client(timeout),
            api_key: api_key.into(),
            base_url: GOOGLE_API_URL.to_string(),
            timeout,
        }
    }

    /// Create from the `GEMINI_API_KEY` environment variable.
    pub fn from_env() -> Self {
        Self::new(std::env::var(GEMINI_API_KEY_ENV).unwrap_or_default())
    }

    /// Create from configuration, falling back to the environment.
    pub fn from_config(config: &ProviderConfig) -> Self {
        let mut provider = Self::new(config.resolve_api_key(GEMINI_API_KEY_ENV).unwrap_or_default())
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

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = transport::build_client(timeout);
        self.timeout = timeout;
        self
    }

    /// Translate a canonical request into the `generateContent` schema.
    ///
    /// `topK` is not a canonical option; it is taken from the extra
    /// parameters (`topK` or `top_k`) and removed from `extra`.
    fn build_request<'a>(
        &self,
        request: &'a CompletionRequest,
        extra: &mut serde_json::Map<String, serde_json::Value>,
    ) -> GeminiRequest<'a> {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in &request.messages {
            let part = GeminiPart { text: &message.content };
            match message.role {
                Role::System => system_parts.push(part),
                Role::User => contents.push(GeminiContent {
                    role: Some("user"),
                    parts: vec![part],
                }),
                Role::Assistant => contents.push(GeminiContent {
                    role: Some("model"),
                    parts: vec![part],
                }),
            }
        }

        let mut top_k = extra.remove("topK");
        if top_k.is_none() {
            top_k = extra.remove("top_k");
        }

        let generation_config = GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
            top_p: request.top_p,
            top_k: top_k.and_then(|v| v.as_u64()).and_then(|v| u32::try_from(v).ok()),
            stop_sequences: &request.stop,
            presence_penalty: request.presence_penalty,
            frequency_penalty: request.frequency_penalty,
        };

        GeminiRequest {
            contents,
            system_instruction: if system_parts.is_empty() {
                None
            } else {
                Some(GeminiContent {
                    role: None,
                    parts: system_parts,
                })
            },
            generation_config: if generation_config.is_empty() {
                None
            } else {
                Some(generation_config)
            },
        }
    }

    fn encode(&self, request: &CompletionRequest) -> ProviderResult<serde_json::Value> {
        let mut extra = request.extra_params.clone();
        let wire = self.build_request(request, &mut extra);
        transport::encode_body(self.name(), &wire, &extra)
    }

    fn post(&self, url: String, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
    }

    fn ensure_configured(&self) -> ProviderResult<()> {
        if self.api_key.is_empty() {
            return Err(ProviderError::missing_credential(self.name(), Some(GEMINI_API_KEY_ENV)));
        }
        Ok(())
    }

    /// Parse response into our format.
    fn parse_response(
        &self,
        model: &str,
        response: GeminiResponse,
        raw: serde_json::Value,
    ) -> ProviderResult<CompletionResponse> {
        if response.candidates.is_empty() {
            return Err(ProviderError::malformed(self.name(), "response contained no candidates"));
        }

        let choices = response
            .candidates
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| CompletionChoice {
                index: candidate.index.unwrap_or(i as u32),
                message: Message::assistant(candidate.text()),
                finish_reason: candidate.finish_reason,
            })
            .collect();

        Ok(CompletionResponse {
            id: response.response_id.unwrap_or_else(fallback_id),
            object: OBJECT_COMPLETION.to_string(),
            created: chrono::Utc::now().timestamp(),
            model: response.model_version.unwrap_or_else(|| model.to_string()),
            provider: self.name().to_string(),
            choices,
            usage: response.usage_metadata.map(GeminiUsage::into_usage),
            system_fingerprint: None,
            raw: Some(raw),
        })
    }
}

/// Gemini does not always return a response id.
fn fallback_id() -> String {
    format!(
        "google-{}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn supports_model(&self, model: &str) -> bool {
        GOOGLE_MODELS.contains(&model)
    }

    fn available_models(&self) -> Vec<String> {
        GOOGLE_MODELS.iter().map(|m| m.to_string()).collect()
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

        let body = self.encode(&request)?;
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);

        debug!("Sending request to Gemini API");

        let response = transport::send(self.name(), cancel, self.post(url, &body).timeout(self.timeout)).await?;
        let (api_response, raw) = transport::read_json::<GeminiResponse>(self.name(), cancel, response).await?;
        self.parse_response(&request.model, api_response, raw)
    }

    #[instrument(skip(self, cancel, request), fields(model = %request.model))]
    async fn completion_stream(
        &self,
        cancel: &CancellationToken,
        request: CompletionRequest,
    ) -> ProviderResult<ResponseStream> {
        self.ensure_configured()?;

        let body = self.encode(&request)?;
        let url = format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, request.model);

        debug!("Sending streaming request to Gemini API");

        let response = transport::send(
            self.name(),
            cancel,
            self.post(url, &body).header("Accept", "text/event-stream"),
        )
        .await?;

        Ok(ResponseStream::from_response(
            self.name(),
            response,
            GoogleChunkDecoder::new(self.name(), &request.model),
            cancel.clone(),
        ))
    }
}

/// Decoder for streamed `GenerateContentResponse` objects.
pub(crate) struct GoogleChunkDecoder {
    meta: ChunkMeta,
    seen_first: bool,
}

impl GoogleChunkDecoder {
    pub(crate) fn new(provider: &str, model: &str) -> Self {
        let mut meta = ChunkMeta::new(provider);
        meta.model = model.to_string();
        Self { meta, seen_first: false }
    }
}

impl ChunkDecoder for GoogleChunkDecoder {
    fn decode(&mut self, event: &SseEvent) -> ProviderResult<Decoded> {
        // Array framing left over when the body is a JSON array
        if matches!(event.data.trim(), "[" | "]" | ",") {
            return Ok(Decoded::Skip);
        }

        let response: GeminiResponse = parse_event(&self.meta.provider, &event.data)?;
        if let Some(error) = response.error {
            return Err(ProviderError::StreamError {
                provider: self.meta.provider.clone(),
                message: error.describe(),
            });
        }

        if !self.seen_first {
            self.seen_first = true;
            self.meta.id = response.response_id.clone().unwrap_or_else(fallback_id);
            if let Some(ref version) = response.model_version {
                self.meta.model = version.clone();
            }
        }

        let usage = response.usage_metadata.map(GeminiUsage::into_usage);
        let Some(candidate) = response.candidates.into_iter().next() else {
            return Ok(Decoded::Skip);
        };

        let text = candidate.text();
        match candidate.finish_reason {
            Some(reason) => Ok(Decoded::Last(self.meta.text_chunk(text, Some(reason), usage))),
            None if text.is_empty() => Ok(Decoded::Skip),
            None => Ok(Decoded::Chunk(self.meta.text_chunk(text, None, None))),
        }
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop_sequences: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
}

impl GenerationConfig<'_> {
    fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.max_output_tokens.is_none()
            && self.top_p.is_none()
            && self.top_k.is_none()
            && self.stop_sequences.is_empty()
            && self.presence_penalty.is_none()
            && self.frequency_penalty.is_none()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
    response_id: Option<String>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    code: Option<u16>,
    #[serde(default)]
    message: String,
    status: Option<String>,
}

impl GeminiError {
    fn describe(&self) -> String {
        match (self.code, self.status.as_deref()) {
            (Some(code), Some(status)) => format!("{} {}: {}", code, status, self.message),
            (Some(code), None) => format!("{}: {}", code, self.message),
            (None, Some(status)) => format!("{}: {}", status, self.message),
            (None, None) => self.message.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiResponseContent,
    finish_reason: Option<String>,
    index: Option<u32>,
}

impl GeminiCandidate {
    fn text(&self) -> String {
        self.content.parts.iter().filter_map(|p| p.text.as_deref()).collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    total_token_count: Option<u32>,
}

impl GeminiUsage {
    fn into_usage(self) -> CompletionUsage {
        CompletionUsage::from_reported(self.prompt_token_count, self.candidates_token_count, self.total_token_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};
    use llmux_core::{with_extra_params, with_max_tokens, with_temperature};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest::new(
            "gemini-1.5-pro",
            vec![Message::system("be brief"), Message::user("Hi"), Message::assistant("Hello")],
        )
    }

    fn decoder_stream(events: &'static str) -> ResponseStream {
        let body = stream::iter(vec![Ok(events.as_bytes().to_vec())]);
        ResponseStream::new(
            "google",
            body,
            GoogleChunkDecoder::new("google", "gemini-1.5-pro"),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_provider_metadata() {
        let provider = GoogleProvider::new("k");
        assert_eq!(provider.name(), "google");
        assert!(provider.supports_model("gemini-1.5-flash"));
        assert!(!provider.supports_model("gemini-ultra-9"));
    }

    #[test]
    fn test_request_translation() {
        let provider = GoogleProvider::new("k");
        let req = request().with_options(&[
            with_temperature(0.5),
            with_max_tokens(50),
            with_extra_params(json!({"topK": 40, "safetySettings": []})),
        ]);
        let wire = provider.encode(&req).unwrap();

        assert_eq!(wire["systemInstruction"], json!({"parts": [{"text": "be brief"}]}));
        assert_eq!(
            wire["contents"],
            json!([
                {"role": "user", "parts": [{"text": "Hi"}]},
                {"role": "model", "parts": [{"text": "Hello"}]}
            ])
        );
        assert_eq!(wire["generationConfig"]["temperature"], json!(0.5));
        assert_eq!(wire["generationConfig"]["maxOutputTokens"], json!(50));
        assert_eq!(wire["generationConfig"]["topK"], json!(40));
        assert!(wire.get("topK").is_none());
        assert_eq!(wire["safetySettings"], json!([]));
    }

    #[test]
    fn test_no_generation_config_when_unset() {
        let provider = GoogleProvider::new("k");
        let req = CompletionRequest::new("gemini-1.5-pro", vec![Message::user("Hi")]);
        let wire = provider.encode(&req).unwrap();
        assert!(wire.get("generationConfig").is_none());
        assert!(wire.get("systemInstruction").is_none());
    }

    #[test]
    fn test_out_of_range_top_k_dropped() {
        let provider = GoogleProvider::new("k");
        let req = request().with_options(&[
            with_temperature(0.5),
            with_extra_params(json!({"top_k": 5_000_000_000u64})),
        ]);
        let wire = provider.encode(&req).unwrap();

        assert!(wire["generationConfig"].get("topK").is_none());
        assert!(wire.get("top_k").is_none());
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let err = GoogleProvider::new("")
            .completion(&CancellationToken::new(), request())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn test_completion_roundtrip() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-pro:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "Hel"}, {"text": "lo"}]},
                    "finishReason": "STOP",
                    "index": 0
                }],
                "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2, "totalTokenCount": 7},
                "modelVersion": "gemini-1.5-pro-002",
                "responseId": "resp-1"
            })))
            .mount(&mock_server)
            .await;

        let provider = GoogleProvider::new("test-key").with_base_url(mock_server.uri());
        let resp = provider.completion(&CancellationToken::new(), request()).await.unwrap();

        assert_eq!(resp.id, "resp-1");
        assert_eq!(resp.provider, "google");
        assert_eq!(resp.model, "gemini-1.5-pro-002");
        assert_eq!(resp.content(), "Hello");
        assert_eq!(resp.finish_reason(), Some("STOP"));
        assert_eq!(resp.usage, Some(CompletionUsage::new(5, 2)));
    }

    #[tokio::test]
    async fn test_no_candidates_is_malformed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&mock_server)
            .await;

        let provider = GoogleProvider::new("k").with_base_url(mock_server.uri());
        let err = provider.completion(&CancellationToken::new(), request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_missing_response_id_is_generated() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "x"}]}}]
            })))
            .mount(&mock_server)
            .await;

        let provider = GoogleProvider::new("k").with_base_url(mock_server.uri());
        let resp = provider.completion(&CancellationToken::new(), request()).await.unwrap();
        assert!(resp.id.starts_with("google-"));
        assert_eq!(resp.model, "gemini-1.5-pro");
        assert!(resp.usage.is_none());
    }

    #[tokio::test]
    async fn test_stream_parts_and_finish() {
        let mut s = decoder_stream(concat!(
            "data: [\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"},{\"text\":\" the\"}]}}],\"responseId\":\"r1\"}\n\n",
            "data: ,\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"re\"}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":3,\"candidatesTokenCount\":2}}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"late\"}]}}]}\n\n",
        ));

        let first = s.recv().await.unwrap().unwrap();
        assert_eq!(first.id, "r1");
        assert_eq!(first.content(), "Hi the");

        let last = s.recv().await.unwrap().unwrap();
        assert_eq!(last.id, "r1");
        assert_eq!(last.content(), "re");
        assert_eq!(last.finish_reason(), Some("STOP"));
        assert_eq!(last.usage.unwrap().total_tokens, 5);

        assert!(s.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_error_event() {
        let mut s = decoder_stream(concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}]}}]}\n\n",
            "data: {\"error\":{\"code\":500,\"message\":\"Internal error\",\"status\":\"INTERNAL\"}}\n\n",
        ));

        assert_eq!(s.recv().await.unwrap().unwrap().content(), "Hi");
        match s.recv().await {
            Err(ProviderError::StreamError { provider, message }) => {
                assert_eq!(provider, "google");
                assert_eq!(message, "500 INTERNAL: Internal error");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(s.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_invalid_json_is_parse_error() {
        let mut s = decoder_stream("data: {\"candidates\": [\n\n");
        assert!(matches!(s.recv().await, Err(ProviderError::StreamParse { .. })));
    }

    #[tokio::test]
    async fn test_stream_over_http() {
        let mock_server = MockServer::start().await;

        let sse = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"A\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"B\"}]},\"finishReason\":\"STOP\"}]}\r\n\r\n",
        );
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-pro:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .and(body_partial_json(json!({"contents": [{"role": "user"}, {"role": "model"}]})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let provider = GoogleProvider::new("k").with_base_url(mock_server.uri());
        let texts: Vec<String> = provider
            .completion_stream(&CancellationToken::new(), request())
            .await
            .unwrap()
            .into_stream()
            .map(|c| c.unwrap().content().to_string())
            .collect()
            .await;
        assert_eq!(texts, vec!["A", "B"]);
    }
}
