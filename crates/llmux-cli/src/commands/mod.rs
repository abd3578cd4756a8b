//! CLI command implementations.

pub mod complete;
pub mod providers;
pub mod route;

use clap::Args;

use llmux_core::{with_max_tokens, with_temperature, CompletionOption, Message};

/// Request flags shared by every completion command.
#[derive(Args, Debug, Clone, Default)]
pub struct RequestArgs {
    /// System prompt sent before the user prompt
    #[arg(long, global = true)]
    pub system: Option<String>,

    /// Sampling temperature
    #[arg(long, global = true)]
    pub temperature: Option<f64>,

    /// Maximum tokens to generate
    #[arg(long, global = true)]
    pub max_tokens: Option<u32>,
}

impl RequestArgs {
    /// Conversation for a single prompt.
    pub fn messages(&self, prompt: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = self.system {
            messages.push(Message::system(system.as_str()));
        }
        messages.push(Message::user(prompt));
        messages
    }

    /// Completion options for the flags that were given.
    pub fn options(&self) -> Vec<CompletionOption> {
        let mut options = Vec::new();
        if let Some(temperature) = self.temperature {
            options.push(with_temperature(temperature));
        }
        if let Some(max_tokens) = self.max_tokens {
            options.push(with_max_tokens(max_tokens));
        }
        options
    }
}
