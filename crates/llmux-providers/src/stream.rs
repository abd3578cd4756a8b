//! Streaming normalizer.
//!
//! Every vendor streams completions as server-sent events, but each with its
//! own event grammar. [`ResponseStream`] owns the connection, the line
//! buffering and the termination rules; a per-vendor [`ChunkDecoder`] maps
//! each event payload to at most one canonical chunk.

use std::fmt;
use std::pin::Pin;

use futures::{stream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use llmux_core::{
    CompletionChoice, CompletionResponse, CompletionUsage, Message, ProviderError, ProviderResult, Role,
    OBJECT_CHUNK,
};

use crate::sse::{SseEvent, SseParser};

/// Raw body of a streaming HTTP response.
pub type ByteStream = Pin<Box<dyn Stream<Item = ProviderResult<Vec<u8>>> + Send>>;

/// What a decoder made of one event payload.
#[derive(Debug)]
pub enum Decoded {
    /// Nothing to emit (control or bookkeeping event)
    Skip,
    /// An intermediate chunk
    Chunk(CompletionResponse),
    /// The last chunk; the stream is finished after it
    Last(CompletionResponse),
    /// The stream is finished with nothing more to emit
    End,
}

/// Vendor-specific mapping from SSE events to canonical chunks.
///
/// Decoders are stateful: they may remember the response id or role from an
/// early event and stamp it on later chunks.
pub trait ChunkDecoder: Send {
    /// Decode one `data:` payload. The `[DONE]` sentinel never reaches here.
    fn decode(&mut self, event: &SseEvent) -> ProviderResult<Decoded>;
}

/// Parse a JSON event payload, reporting failures as [`ProviderError::StreamParse`].
pub fn parse_event<T: DeserializeOwned>(provider: &str, data: &str) -> ProviderResult<T> {
    serde_json::from_str(data).map_err(|e| ProviderError::StreamParse {
        provider: provider.to_string(),
        line: data.to_string(),
        message: e.to_string(),
    })
}

/// Identity shared by every chunk of one streamed response.
#[derive(Debug, Clone, Default)]
pub struct ChunkMeta {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub created: i64,
    pub system_fingerprint: Option<String>,
}

impl ChunkMeta {
    /// Metadata for `provider`, created now.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            created: chrono::Utc::now().timestamp(),
            ..Default::default()
        }
    }

    /// Build a chunk response carrying these identifiers.
    pub fn chunk(&self, choices: Vec<CompletionChoice>, usage: Option<CompletionUsage>) -> CompletionResponse {
        CompletionResponse {
            id: self.id.clone(),
            object: OBJECT_CHUNK.to_string(),
            created: self.created,
            model: self.model.clone(),
            provider: self.provider.clone(),
            choices,
            usage,
            system_fingerprint: self.system_fingerprint.clone(),
            raw: None,
        }
    }

    /// Build a single-choice assistant chunk.
    pub fn text_chunk(
        &self,
        text: impl Into<String>,
        finish_reason: Option<String>,
        usage: Option<CompletionUsage>,
    ) -> CompletionResponse {
        self.chunk(
            vec![CompletionChoice {
                index: 0,
                message: Message::new(Role::Assistant, text),
                finish_reason,
            }],
            usage,
        )
    }
}

/// Lazy, forward-only sequence of completion chunks read from one
/// connection.
///
/// `recv` takes `&mut self`, so a stream has a single consumer.
pub struct ResponseStream {
    provider: String,
    body: Option<ByteStream>,
    parser: SseParser,
    decoder: Box<dyn ChunkDecoder>,
    cancel: CancellationToken,
    finished: bool,
}

impl ResponseStream {
    /// Wrap a byte stream with a vendor decoder.
    pub fn new<S, D>(provider: impl Into<String>, body: S, decoder: D, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = ProviderResult<Vec<u8>>> + Send + 'static,
        D: ChunkDecoder + 'static,
    {
        Self {
            provider: provider.into(),
            body: Some(Box::pin(body)),
            parser: SseParser::new(),
            decoder: Box::new(decoder),
            cancel,
            finished: false,
        }
    }

    /// Bind a stream to a live HTTP response body.
    pub fn from_response<D>(
        provider: impl Into<String>,
        response: reqwest::Response,
        decoder: D,
        cancel: CancellationToken,
    ) -> Self
    where
        D: ChunkDecoder + 'static,
    {
        let provider = provider.into();
        let name = provider.clone();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map(|b| b.to_vec()).map_err(|e| ProviderError::transport(&name, e)));
        Self::new(provider, body, decoder, cancel)
    }

    /// Name of the provider producing the chunks.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Whether end-of-sequence has been reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Receive the next chunk.
    ///
    /// Returns `Ok(None)` once the stream has ended cleanly; every failure is
    /// an error and finishes the stream.
    pub async fn recv(&mut self) -> ProviderResult<Option<CompletionResponse>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            while let Some(event) = self.parser.next_event() {
                let emitted = match self.handle(&event) {
                    Ok(emitted) => emitted,
                    Err(e) => {
                        self.finish();
                        return Err(e);
                    }
                };
                if self.finished {
                    self.release();
                }
                if emitted.is_some() {
                    return Ok(emitted);
                }
                if self.finished {
                    return Ok(None);
                }
            }

            let Some(body) = self.body.as_mut() else {
                debug!(provider = %self.provider, "stream body exhausted");
                self.finish();
                return Ok(None);
            };

            let next = {
                let cancel = &self.cancel;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    next = body.next() => Some(next),
                }
            };

            match next {
                None => {
                    self.finish();
                    return Err(ProviderError::cancelled(&self.provider));
                }
                Some(Some(Ok(bytes))) => {
                    trace!(provider = %self.provider, len = bytes.len(), "stream read");
                    self.parser.push(&bytes);
                }
                Some(Some(Err(e))) => {
                    self.finish();
                    return Err(e);
                }
                Some(None) => {
                    // Connection closed; flush any unterminated final line
                    self.body = None;
                    self.parser.end();
                }
            }
        }
    }

    /// Release the connection. Idempotent, and safe after the stream ended.
    pub fn close(&mut self) -> ProviderResult<()> {
        self.finish();
        Ok(())
    }

    /// Adapt into a [`futures::Stream`] of chunks.
    pub fn into_stream(self) -> impl Stream<Item = ProviderResult<CompletionResponse>> + Send {
        stream::unfold(self, |mut s| async move {
            match s.recv().await {
                Ok(Some(chunk)) => Some((Ok(chunk), s)),
                Ok(None) => None,
                Err(e) => Some((Err(e), s)),
            }
        })
    }

    fn handle(&mut self, event: &SseEvent) -> ProviderResult<Option<CompletionResponse>> {
        if event.is_done() {
            self.finished = true;
            return Ok(None);
        }
        if event.data.trim().is_empty() {
            return Ok(None);
        }

        Ok(match self.decoder.decode(event)? {
            Decoded::Skip => None,
            Decoded::Chunk(chunk) => Some(chunk),
            Decoded::Last(chunk) => {
                self.finished = true;
                Some(chunk)
            }
            Decoded::End => {
                self.finished = true;
                None
            }
        })
    }

    fn finish(&mut self) {
        self.finished = true;
        self.release();
    }

    fn release(&mut self) {
        self.body = None;
        self.parser.clear();
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("provider", &self.provider)
            .field("open", &self.body.is_some())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emits each payload as a chunk; "last:" ends the stream.
    struct EchoDecoder {
        meta: ChunkMeta,
    }

    impl ChunkDecoder for EchoDecoder {
        fn decode(&mut self, event: &SseEvent) -> ProviderResult<Decoded> {
            if let Some(text) = event.data.strip_prefix("last:") {
                return Ok(Decoded::Last(self.meta.text_chunk(text, Some("stop".into()), None)));
            }
            if event.data.starts_with('{') {
                let _: serde_json::Value = parse_event(&self.meta.provider, &event.data)?;
                return Ok(Decoded::Skip);
            }
            Ok(Decoded::Chunk(self.meta.text_chunk(event.data.clone(), None, None)))
        }
    }

    fn echo_stream(parts: Vec<&'static str>, cancel: CancellationToken) -> ResponseStream {
        let body = stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes().to_vec())));
        ResponseStream::new("echo", body, EchoDecoder { meta: ChunkMeta::new("echo") }, cancel)
    }

    #[tokio::test]
    async fn test_stops_at_done_sentinel() {
        let mut s = echo_stream(
            vec!["data: a\n\n", "data: [DONE]\n\n", "data: after\n\n"],
            CancellationToken::new(),
        );

        assert_eq!(s.recv().await.unwrap().unwrap().content(), "a");
        assert!(s.recv().await.unwrap().is_none());
        assert!(s.recv().await.unwrap().is_none());
        assert!(s.is_finished());
    }

    #[tokio::test]
    async fn test_last_chunk_finishes_stream() {
        let mut s = echo_stream(vec!["data: last:bye\n\ndata: ignored\n\n"], CancellationToken::new());

        let chunk = s.recv().await.unwrap().unwrap();
        assert_eq!(chunk.finish_reason(), Some("stop"));
        assert!(s.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_without_sentinel_is_clean_end() {
        let mut s = echo_stream(vec!["data: x\n", "data: tail"], CancellationToken::new());

        assert_eq!(s.recv().await.unwrap().unwrap().content(), "x");
        assert_eq!(s.recv().await.unwrap().unwrap().content(), "tail");
        assert!(s.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_parse_failure_is_error() {
        let mut s = echo_stream(vec!["data: {not json\n\n"], CancellationToken::new());

        let err = s.recv().await.unwrap_err();
        assert!(matches!(err, ProviderError::StreamParse { ref line, .. } if line == "{not json"));
        assert!(s.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let body = stream::iter(vec![
            Ok(b"data: a\n\n".to_vec()),
            Err(ProviderError::transport("echo", "connection reset")),
        ]);
        let mut s = ResponseStream::new(
            "echo",
            body,
            EchoDecoder { meta: ChunkMeta::new("echo") },
            CancellationToken::new(),
        );

        assert!(s.recv().await.unwrap().is_some());
        assert!(matches!(s.recv().await, Err(ProviderError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_read() {
        let cancel = CancellationToken::new();
        let mut s = ResponseStream::new(
            "echo",
            stream::pending::<ProviderResult<Vec<u8>>>(),
            EchoDecoder { meta: ChunkMeta::new("echo") },
            cancel.clone(),
        );

        cancel.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), s.recv())
            .await
            .expect("recv should not hang");
        assert!(matches!(result, Err(ProviderError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_after_end() {
        let mut s = echo_stream(vec!["data: [DONE]\n"], CancellationToken::new());

        assert!(s.recv().await.unwrap().is_none());
        assert!(s.close().is_ok());
        assert!(s.close().is_ok());
        assert!(s.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_into_stream_collects_chunks() {
        let s = echo_stream(vec!["data: a\n\ndata: b\n\ndata: [DONE]\n\n"], CancellationToken::new());

        let texts: Vec<String> = s
            .into_stream()
            .map(|c| c.unwrap().content().to_string())
            .collect()
            .await;
        assert_eq!(texts, vec!["a", "b"]);
    }
}
