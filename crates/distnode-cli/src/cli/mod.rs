//! CLI for the distnode content distributor.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use distnode_core::config;

use commands::{run_completions, run_fetch, run_probe, run_serve, run_status};

/// Top-level CLI for the distnode content distributor.
#[derive(Debug, Parser)]
#[command(name = "distnode")]
#[command(about = "distnode: caching distributor for storage-node objects", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the node: reconcile local state, then serve maintenance cycles until Ctrl-C.
    Serve,

    /// Fetch one object through the cache (downloading it if needed).
    Fetch {
        /// Object identifier.
        object_id: String,

        /// Write the object here instead of stdout.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Measure response times of all active storage nodes once.
    Probe,

    /// Show persisted pending downloads and response-time samples.
    Status,

    /// Print shell completions.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        if let CliCommand::Completions { shell } = cli.command {
            return run_completions(shell);
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Serve => run_serve(&cfg).await?,
            CliCommand::Fetch { object_id, output } => {
                run_fetch(&cfg, &object_id, output.as_deref()).await?
            }
            CliCommand::Probe => run_probe(&cfg).await?,
            CliCommand::Status => run_status(&cfg).await?,
            CliCommand::Completions { .. } => {}
        }

        Ok(())
    }
}
