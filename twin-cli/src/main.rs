//! # twin CLI
//!
//! Command-line interface for the twin entity runtime.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "twin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used when absent)
    #[arg(long, global = true, env = "TWIN_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `twin_runtime=debug`; `RUST_LOG` takes precedence
    #[arg(long, global = true, env = "TWIN_LOG")]
    log: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a TQL rule and print what it reads and writes
    Compile {
        /// Rule text, e.g. "insert into a select b.x as x"
        tql: String,
    },

    /// Run an in-memory node over a mapper file and a message file
    Run {
        /// YAML list of mapper definitions
        #[arg(long)]
        mappers: PathBuf,

        /// JSON-lines property messages
        #[arg(long)]
        input: PathBuf,

        /// Milliseconds to wait for the node to settle
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,

        /// Override the mailbox capacity
        #[arg(long)]
        mailbox_capacity: Option<usize>,

        /// Override the worker pool size
        #[arg(long)]
        pool_size: Option<usize>,
    },
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let fallback = match (&cli.log, cli.verbose) {
        (Some(filter), _) => filter.clone(),
        (None, true) => "debug".to_string(),
        (None, false) => "info".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&fallback))?;

    // stdout carries command output
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    match cli.command {
        Commands::Compile { tql } => commands::compile_rule(&tql),
        Commands::Run {
            mappers,
            input,
            timeout_ms,
            mailbox_capacity,
            pool_size,
        } => {
            let opts = commands::RunOptions {
                mappers,
                input,
                timeout: Duration::from_millis(timeout_ms),
                mailbox_capacity,
                pool_size,
            };
            commands::run_node(cli.config.as_deref(), opts).await
        }
    }
}
