//! Provider listing.

use crate::AppContext;

pub fn list(ctx: &AppContext) -> anyhow::Result<()> {
    println!("Registered providers:\n");

    let mut names = ctx.registry.list();
    names.sort();

    for name in &names {
        let Some(provider) = ctx.registry.get(name) else {
            continue;
        };
        let status = if provider.is_configured() {
            "configured"
        } else {
            "not configured"
        };
        println!("  {} - {}", name, status);

        // Show available models
        let models = provider.available_models();
        if !models.is_empty() {
            println!("    Models:");
            for model in models.iter().take(3) {
                println!("      - {}/{}", name, model);
            }
            if models.len() > 3 {
                println!("      ... and {} more", models.len() - 3);
            }
        }
        println!();
    }

    if names.iter().any(|n| ctx.registry.get(n).is_some_and(|p| !p.is_configured())) {
        println!("  Set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY to configure providers.");
    }
    Ok(())
}
