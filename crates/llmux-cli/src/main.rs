//! # llmux-cli
//!
//! Command-line interface for llmux.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use llmux_core::{format_error_with_suggestion, Config, ProviderError, TaskType};
use llmux_providers::ProviderRegistry;
use llmux_router::Router;

mod commands;

use commands::RequestArgs;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
    pub registry: Arc<ProviderRegistry>,
    pub router: Router,
    /// Fired on Ctrl-C
    pub cancel: CancellationToken,
}

/// llmux - send completions to any provider by model id or task type
#[derive(Parser)]
#[command(name = "llmux")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    request: RequestArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a completion against a qualified model id (provider/model)
    Complete {
        /// Qualified model id, e.g. openai/gpt-4o
        model: String,
        /// Prompt text
        prompt: String,
    },
    /// Stream a completion against a qualified model id
    Stream {
        /// Qualified model id, e.g. anthropic/claude-3-5-haiku-20241022
        model: String,
        /// Prompt text
        prompt: String,
    },
    /// Let the router pick a model for a task type
    Route {
        /// Task type, e.g. code_generation
        task: TaskType,
        /// Prompt text
        prompt: String,
        /// Stream the response
        #[arg(short, long)]
        stream: bool,
    },
    /// List registered providers
    Providers,
    /// Show the attempt order for a task type
    Routes {
        /// Task type, e.g. summarization
        task: TaskType,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; output goes to stderr so completions stay clean
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration
    let config = Config::load_validated().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", format_error_with_suggestion(&e));
        Config::default()
    });

    let registry = Arc::new(ProviderRegistry::from_config(&config));
    let router = Router::from_config(Arc::clone(&registry), &config.router);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling request");
            trigger.cancel();
        }
    });

    let ctx = AppContext {
        config,
        registry,
        router,
        cancel,
    };

    let result = match cli.command {
        Commands::Complete { model, prompt } => commands::complete::run(&ctx, &cli.request, &model, &prompt).await,
        Commands::Stream { model, prompt } => commands::complete::stream(&ctx, &cli.request, &model, &prompt).await,
        Commands::Route { task, prompt, stream } => {
            commands::route::run(&ctx, &cli.request, task, &prompt, stream).await
        }
        Commands::Providers => commands::providers::list(&ctx),
        Commands::Routes { task } => commands::route::show(&ctx, task),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        if let Some(suggestion) = e.downcast_ref::<ProviderError>().and_then(|p| p.recovery_suggestion()) {
            eprintln!("Suggestion: {}", suggestion);
        }
        std::process::exit(1);
    }

    Ok(())
}
