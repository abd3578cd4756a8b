//! # llmux-core
//!
//! Core types and abstractions for llmux.
//!
//! This crate provides:
//! - Message primitives
//! - The vendor-neutral completion request, its options and the response
//! - Task types used for routing
//! - Configuration system
//! - Common error types

pub mod config;
pub mod error;
pub mod message;
pub mod request;
pub mod response;
pub mod task;

pub use config::{Config, ProviderConfig, RouteConfig, RouterConfig, DEFAULT_FALLBACK_MODEL};
pub use error::{format_error_with_suggestion, Error, ProviderError, ProviderResult, Result};
pub use message::{Message, Role};
pub use request::{
    with_extra_params, with_frequency_penalty, with_logit_bias, with_max_tokens, with_presence_penalty,
    with_stop, with_temperature, with_top_p, with_user, CompletionOption, CompletionRequest,
};
pub use response::{CompletionChoice, CompletionResponse, CompletionUsage, OBJECT_CHUNK, OBJECT_COMPLETION};
pub use task::TaskType;
