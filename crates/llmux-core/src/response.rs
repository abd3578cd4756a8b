//! Canonical completion response types.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// `object` value for a full, non-streamed response.
pub const OBJECT_COMPLETION: &str = "chat.completion";

/// `object` value for a streamed chunk.
pub const OBJECT_CHUNK: &str = "chat.completion.chunk";

/// One generated alternative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    /// Position of the choice
    pub index: u32,
    /// Generated message (or the incremental delta, for chunks)
    pub message: Message,
    /// Vendor finish reason, verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,
    /// Tokens generated
    pub completion_tokens: u32,
    /// Sum of the two
    pub total_tokens: u32,
}

impl CompletionUsage {
    /// Build usage from the two reported counts.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Build usage from vendor-reported values. A reported total is kept as
    /// is; it is recomputed only when missing or 0.
    pub fn from_reported(prompt_tokens: u32, completion_tokens: u32, total_tokens: Option<u32>) -> Self {
        match total_tokens {
            Some(total) if total > 0 => Self {
                prompt_tokens,
                completion_tokens,
                total_tokens: total,
            },
            _ => Self::new(prompt_tokens, completion_tokens),
        }
    }
}

/// Vendor-neutral completion response, also used for streamed chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Response id assigned by the vendor (or synthesized)
    pub id: String,
    /// `chat.completion` or `chat.completion.chunk`
    pub object: String,
    /// Unix timestamp in seconds
    pub created: i64,
    /// Model that produced the response
    pub model: String,
    /// Name of the provider that produced the response
    pub provider: String,
    /// Generated choices
    pub choices: Vec<CompletionChoice>,
    /// Token usage, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CompletionUsage>,
    /// Backend configuration fingerprint (OpenAI only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
    /// Raw vendor payload, kept for diagnostics
    #[serde(skip)]
    pub raw: Option<serde_json::Value>,
}

impl CompletionResponse {
    /// Text of the first choice, or an empty string.
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default()
    }

    /// Finish reason of the first choice.
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }

    /// Whether this is a streamed chunk.
    pub fn is_chunk(&self) -> bool {
        self.object == OBJECT_CHUNK
    }
}
