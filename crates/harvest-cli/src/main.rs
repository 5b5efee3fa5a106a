use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Harvest workspace messages and write per-period analyses.")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $HARVEST_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect messages and analyze finished periods
    Run {
        /// Period scheme to bucket by (weekly, monthly)
        #[arg(long, value_name = "SCHEME")]
        scheme: Option<String>,

        /// Run without a database, even if one is configured
        #[arg(long)]
        no_store: bool,

        /// Emit line-oriented progress records instead of a progress bar
        #[arg(long)]
        json: bool,
    },

    /// Show what the store currently holds
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored analyses
    Analyses {
        /// Only show analyses for this author id
        #[arg(long, value_name = "AUTHOR_ID")]
        author: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Debug logs stay hidden unless RUST_LOG asks for them
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            scheme,
            no_store,
            json,
        } => commands::run::run(config, scheme.as_deref(), no_store, json).await,
        Commands::Status { json } => commands::status::run(config, json).await,
        Commands::Analyses { author, json } => {
            commands::analyses::run(config, author.as_deref(), json).await
        }
    }
}
