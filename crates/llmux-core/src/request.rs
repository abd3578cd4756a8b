//! Canonical completion request and the options that shape it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Vendor-neutral completion request.
///
/// Built fresh for every call. `model` always holds the bare model name
/// (the part after the provider prefix).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Bare model name
    pub model: String,
    /// Messages in the conversation, in order
    pub messages: Vec<Message>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Frequency penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Presence penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Whether the response is streamed
    #[serde(default)]
    pub stream: bool,
    /// Token id to bias
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<HashMap<String, i32>>,
    /// End-user identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Vendor-specific extensions, merged into the wire request by each adapter
    #[serde(skip)]
    pub extra_params: serde_json::Map<String, serde_json::Value>,
}

impl CompletionRequest {
    /// Create a request for a bare model name.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    /// Apply options in order. Later options win on the same field.
    pub fn apply_options(&mut self, options: &[CompletionOption]) {
        for option in options {
            option.apply(self);
        }
    }

    /// Builder-style variant of [`apply_options`](Self::apply_options).
    pub fn with_options(mut self, options: &[CompletionOption]) -> Self {
        self.apply_options(options);
        self
    }
}

/// A single, order-sensitive mutation of a [`CompletionRequest`].
///
/// Each variant owns exactly one request field.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOption {
    Temperature(f64),
    MaxTokens(u32),
    TopP(f64),
    FrequencyPenalty(f64),
    PresencePenalty(f64),
    Stop(Vec<String>),
    LogitBias(HashMap<String, i32>),
    User(String),
    /// Merged key by key into `extra_params`
    ExtraParams(serde_json::Map<String, serde_json::Value>),
}

impl CompletionOption {
    /// Apply this option to a request.
    pub fn apply(&self, request: &mut CompletionRequest) {
        match self {
            CompletionOption::Temperature(t) => request.temperature = Some(*t),
            CompletionOption::MaxTokens(n) => request.max_tokens = Some(*n),
            CompletionOption::TopP(p) => request.top_p = Some(*p),
            CompletionOption::FrequencyPenalty(p) => request.frequency_penalty = Some(*p),
            CompletionOption::PresencePenalty(p) => request.presence_penalty = Some(*p),
            CompletionOption::Stop(stop) => request.stop = stop.clone(),
            CompletionOption::LogitBias(bias) => request.logit_bias = Some(bias.clone()),
            CompletionOption::User(user) => request.user = Some(user.clone()),
            CompletionOption::ExtraParams(params) => {
                for (key, value) in params {
                    request.extra_params.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

pub fn with_temperature(temperature: f64) -> CompletionOption {
    CompletionOption::Temperature(temperature)
}

pub fn with_max_tokens(max_tokens: u32) -> CompletionOption {
    CompletionOption::MaxTokens(max_tokens)
}

pub fn with_top_p(top_p: f64) -> CompletionOption {
    CompletionOption::TopP(top_p)
}

pub fn with_frequency_penalty(penalty: f64) -> CompletionOption {
    CompletionOption::FrequencyPenalty(penalty)
}

pub fn with_presence_penalty(penalty: f64) -> CompletionOption {
    CompletionOption::PresencePenalty(penalty)
}

pub fn with_stop<I, S>(stop: I) -> CompletionOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    CompletionOption::Stop(stop.into_iter().map(Into::into).collect())
}

pub fn with_logit_bias(bias: HashMap<String, i32>) -> CompletionOption {
    CompletionOption::LogitBias(bias)
}

pub fn with_user(user: impl Into<String>) -> CompletionOption {
    CompletionOption::User(user.into())
}

/// Vendor-specific parameters. Non-object values are ignored.
pub fn with_extra_params(params: serde_json::Value) -> CompletionOption {
    match params {
        serde_json::Value::Object(map) => CompletionOption::ExtraParams(map),
        _ => CompletionOption::ExtraParams(serde_json::Map::new()),
    }
}
