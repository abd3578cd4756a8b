//! Task-based routing commands.

use anyhow::Context;

use llmux_core::TaskType;

use super::complete::{print_response, print_stream};
use super::RequestArgs;
use crate::AppContext;

pub async fn run(
    ctx: &AppContext,
    args: &RequestArgs,
    task: TaskType,
    prompt: &str,
    stream: bool,
) -> anyhow::Result<()> {
    let messages = args.messages(prompt);
    let options = args.options();

    if stream {
        let stream = ctx
            .router
            .route_stream(&ctx.cancel, task, &messages, &options)
            .await
            .with_context(|| format!("no model could serve task {}", task))?;
        tracing::info!("Routed {} to {}", task, stream.provider());
        print_stream(stream).await
    } else {
        let response = ctx
            .router
            .route(&ctx.cancel, task, &messages, &options)
            .await
            .with_context(|| format!("no model could serve task {}", task))?;
        tracing::info!("Routed {} to {}/{}", task, response.provider, response.model);
        print_response(&response);
        Ok(())
    }
}

pub fn show(ctx: &AppContext, task: TaskType) -> anyhow::Result<()> {
    println!("Attempt order for {}:\n", task);

    let candidates = ctx.router.candidates(task);
    if candidates.is_empty() {
        println!("  No routes configured.");
    }
    for (i, route) in candidates.iter().enumerate() {
        let status = match ctx.registry.resolve(&route.model_id) {
            Ok((provider, _)) if provider.is_configured() => "ready".to_string(),
            Ok(_) => "not configured".to_string(),
            Err(e) => e.to_string(),
        };
        println!(
            "  {}. {} (priority {}, max tokens {}) - {}",
            i + 1,
            route.model_id,
            route.priority,
            route.max_tokens,
            status
        );
    }
    println!("\n  Fallback: {}", ctx.router.fallback());

    if !ctx.config.router.routes.is_empty() {
        println!("\n  Routes loaded from configuration.");
    }
    Ok(())
}
