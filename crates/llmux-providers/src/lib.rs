//! # llmux-providers
//!
//! Provider adapters and the registry that resolves `provider/model`
//! identifiers to them.
//!
//! This crate provides:
//! - The `Provider` trait every vendor adapter implements
//! - Adapters for OpenAI, Anthropic and Google Gemini
//! - A streaming normalizer over server-sent events
//! - The provider registry and model-identifier resolution

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod registry;
pub mod sse;
pub mod stream;
pub mod traits;
mod transport;

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use openai::OpenAIProvider;
pub use registry::ProviderRegistry;
pub use stream::{ChunkDecoder, ChunkMeta, Decoded, ResponseStream};
pub use traits::Provider;
