mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "siaran",
    version,
    about = "Paced, resumable broadcast dispatch engine",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (environment variables are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine and its HTTP API
    Serve {
        /// Log messages instead of delivering them
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Create a campaign from a JSON draft and send it in the foreground
    Run {
        /// Draft file
        draft: PathBuf,

        /// Log messages instead of delivering them (in-memory store)
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Normalize a pasted recipient list
    Normalize {
        /// Input file, or `-` for stdin
        #[arg(default_value = "-")]
        input: PathBuf,

        /// Print the result as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Show campaign progress
    Status {
        /// Campaign id; all campaigns when omitted
        id: Option<Uuid>,

        /// Print the result as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Serve { dry_run } => {
            tracing::info!(dry_run = %dry_run, "Starting serve command");
            commands::serve(config, dry_run).await?;
        }

        Commands::Run { draft, dry_run } => {
            tracing::info!(
                draft = %draft.display(),
                dry_run = %dry_run,
                "Starting run command"
            );
            commands::run(config, &draft, dry_run).await?;
        }

        Commands::Normalize { input, json } => {
            commands::normalize(&config, &input, json)?;
        }

        Commands::Status { id, json } => {
            commands::status(&config, id, json)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("siaran=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("siaran={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
