//! Error types for llmux.
//!
//! [`ProviderError`] is the typed failure of every completion call: model
//! resolution, adapter transport, response decoding and streaming. [`Error`]
//! wraps it together with configuration and IO failures.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias using [`ProviderError`].
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Main error type for llmux.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider error with structured details
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your config file at ~/.config/llmux/config.toml"),
            Error::Provider(e) => e.recovery_suggestion(),
            _ => None,
        }
    }
}

/// Failure of a completion call.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Qualified model id is not of the form `provider/model`
    #[error("Invalid model identifier '{identifier}', expected 'provider/model'")]
    InvalidIdentifier { identifier: String },

    /// No provider registered under this name
    #[error("Provider '{provider}' not found")]
    ProviderNotFound { provider: String },

    /// Provider does not list the model
    #[error("Model '{model}' not supported by provider '{provider}'")]
    ModelUnsupported { provider: String, model: String },

    /// No credential configured for the provider
    #[error("Provider '{provider}' has no API key configured")]
    MissingCredential {
        provider: String,
        env_var: Option<String>,
    },

    /// Network-level failure
    #[error("Network error talking to {provider}: {message}")]
    Transport { provider: String, message: String },

    /// Non-success HTTP status
    #[error("API request to {provider} failed: {status} - {body}")]
    Upstream {
        provider: String,
        status: u16,
        body: String,
    },

    /// Body does not match the expected schema
    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },

    /// A stream event line could not be decoded
    #[error("Failed to parse stream event from {provider}: {message} (line: {line})")]
    StreamParse {
        provider: String,
        line: String,
        message: String,
    },

    /// The vendor reported an error in the middle of a stream
    #[error("Streaming error from {provider}: {message}")]
    StreamError { provider: String, message: String },

    /// The caller's cancellation token fired
    #[error("Request to {provider} was cancelled")]
    Cancelled { provider: String },
}

impl ProviderError {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            ProviderError::InvalidIdentifier { .. } => {
                Some("Qualify the model with its provider, e.g. 'openai/gpt-4o'")
            }
            ProviderError::ProviderNotFound { .. } => Some("Run 'llmux providers' to see registered providers"),
            ProviderError::MissingCredential {
                env_var: Some(_), ..
            } => Some("Set the API key environment variable"),
            ProviderError::MissingCredential { .. } => {
                Some("Configure the provider in ~/.config/llmux/config.toml")
            }
            ProviderError::Upstream { status: 401 | 403, .. } => {
                Some("Check that your API key is valid and not expired")
            }
            ProviderError::Upstream { status: 429, .. } => {
                Some("You've hit rate limits. Wait a moment and try again")
            }
            ProviderError::Upstream {
                status: 500..=599, ..
            } => Some("The API service is having issues. Try again later"),
            ProviderError::Transport { .. } => Some("Check your internet connection"),
            _ => None,
        }
    }

    /// Name of the provider involved, when one is known.
    pub fn provider(&self) -> Option<&str> {
        match self {
            ProviderError::InvalidIdentifier { .. } => None,
            ProviderError::ProviderNotFound { provider }
            | ProviderError::ModelUnsupported { provider, .. }
            | ProviderError::MissingCredential { provider, .. }
            | ProviderError::Transport { provider, .. }
            | ProviderError::Upstream { provider, .. }
            | ProviderError::MalformedResponse { provider, .. }
            | ProviderError::StreamParse { provider, .. }
            | ProviderError::StreamError { provider, .. }
            | ProviderError::Cancelled { provider } => Some(provider.as_str()),
        }
    }

    /// Whether the caller cancelled the request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled { .. })
    }

    /// Whether a router should move on to its next candidate after this error.
    pub fn is_candidate_failure(&self) -> bool {
        !self.is_cancelled()
    }

    /// Create a missing-credential error.
    pub fn missing_credential(provider: impl Into<String>, env_var: Option<&str>) -> Self {
        ProviderError::MissingCredential {
            provider: provider.into(),
            env_var: env_var.map(str::to_string),
        }
    }

    /// Create an upstream error from status code and body.
    pub fn upstream(provider: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        ProviderError::Upstream {
            provider: provider.into(),
            status,
            body: body.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(provider: impl Into<String>, message: impl ToString) -> Self {
        ProviderError::Transport {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Create a malformed-response error.
    pub fn malformed(provider: impl Into<String>, message: impl ToString) -> Self {
        ProviderError::MalformedResponse {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(provider: impl Into<String>) -> Self {
        ProviderError::Cancelled {
            provider: provider.into(),
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}
