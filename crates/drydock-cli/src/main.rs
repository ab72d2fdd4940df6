//! drydock — deploy an application to a remote host through a command
//! channel.
//!
//! # Usage
//!
//! ```text
//! drydock deploy --environment development --revision abc123
//! ```
//!
//! Exit codes: 0 success, 2 failed (nothing changed or pre-restart
//! abort), 3 failed but rolled back cleanly, 4 rollback failed or
//! withheld — manual recovery required. Code 1 means the attempt never
//! started (config, lock, or state errors).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "drydock",
    about = "Drydock — deployment orchestrator over a remote command channel",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a revision to an environment.
    Deploy {
        /// Target environment (development or production).
        #[arg(short, long)]
        environment: String,

        /// Branch or commit to deploy.
        #[arg(short, long)]
        revision: String,

        /// Path to the drydock.toml config.
        #[arg(short, long, default_value = "drydock.toml")]
        config: PathBuf,

        /// Override the state directory from the config.
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,drydock=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy {
            environment,
            revision,
            config,
            state_dir,
        } => {
            let code =
                commands::deploy::run(&environment, &revision, &config, state_dir.as_deref())
                    .await?;
            std::process::exit(code);
        }
    }
}
