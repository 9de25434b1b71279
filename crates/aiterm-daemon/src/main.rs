use aiterm_core::{AppConfig, AppContext};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "aiterm")]
#[command(about = "AI-assisted terminal sessions backed by a local model runtime")]
#[command(version)]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Model runtime endpoint (overrides the config file)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Model to use (overrides the config file)
    #[arg(short, long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the model catalog and what the runtime has installed
    Models,

    /// Ask the assistant a single question
    Ask {
        /// The question
        #[arg(required = true)]
        prompt: Vec<String>,

        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,
    },

    /// Open an interactive shell session; lines starting with `??` go to the assistant
    Shell {
        /// Shell to run instead of the configured one
        #[arg(long)]
        shell: Option<String>,

        /// Starting directory
        #[arg(long)]
        cwd: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let mut config = AppConfig::load_or_default(cli.config.as_deref())
        .context("failed to load config")?;
    if let Some(endpoint) = cli.endpoint {
        config.model_endpoint = endpoint;
    }

    let ctx = AppContext::from_config(&config).context("invalid config")?;
    if let Some(ref model) = cli.model {
        ctx.catalog.set_active(model)?;
    }
    log::debug!(
        "endpoint={} active_model={:?}",
        config.model_endpoint,
        ctx.catalog.active_id()
    );

    let result = match cli.command {
        Commands::Models => commands::models::run(&ctx),
        Commands::Ask { prompt, stream } => commands::ask::run(&ctx, &prompt.join(" "), stream),
        Commands::Shell { shell, cwd } => commands::shell::run(&ctx, shell, cwd),
    };

    ctx.shutdown();
    result
}
