//! Direct completions against a qualified model id.

use std::io::{self, Write};

use anyhow::Context;
use tracing::debug;

use llmux_core::CompletionResponse;
use llmux_providers::ResponseStream;

use super::RequestArgs;
use crate::AppContext;

pub async fn run(ctx: &AppContext, args: &RequestArgs, model: &str, prompt: &str) -> anyhow::Result<()> {
    let response = ctx
        .registry
        .completion(&ctx.cancel, model, &args.messages(prompt), &args.options())
        .await
        .with_context(|| format!("completion with {} failed", model))?;

    print_response(&response);
    Ok(())
}

pub async fn stream(ctx: &AppContext, args: &RequestArgs, model: &str, prompt: &str) -> anyhow::Result<()> {
    let stream = ctx
        .registry
        .completion_stream(&ctx.cancel, model, &args.messages(prompt), &args.options())
        .await
        .with_context(|| format!("opening stream with {} failed", model))?;

    print_stream(stream).await
}

/// Print a finished response and log its usage.
pub(crate) fn print_response(response: &CompletionResponse) {
    println!("{}", response.content());
    if let Some(usage) = response.usage {
        debug!(
            provider = %response.provider,
            model = %response.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "completion finished"
        );
    }
}

/// Print chunks as they arrive.
pub(crate) async fn print_stream(mut stream: ResponseStream) -> anyhow::Result<()> {
    write_stream(&mut stream, &mut io::stdout()).await
}

/// Write chunks to `out` until the stream ends, then close it. The stream is
/// closed on every exit path, including write failures.
async fn write_stream<W: Write>(stream: &mut ResponseStream, out: &mut W) -> anyhow::Result<()> {
    let result: anyhow::Result<()> = loop {
        match stream.recv().await {
            Ok(Some(chunk)) => {
                if let Err(e) = write!(out, "{}", chunk.content()).and_then(|_| out.flush()) {
                    break Err(e.into());
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e).with_context(|| format!("stream from {} failed", stream.provider())),
        }
    };
    stream.close()?;

    writeln!(out)?;
    result
}
