//! squad: run coding agents side by side in tmux sessions and git worktrees.
//!
//! # Usage
//!
//! ```text
//! squad new <title> [--path <repo>] [--program <cmd>] [--prompt <text>] [--auto-yes]
//! squad list [--json]
//! squad prompt <title> <text>
//! squad preview|diff|attach|pause|resume|kill <title>
//! squad push <title> [--message <msg>]
//! squad orchestrate <goal> [--path <repo>] [--program <cmd>] [--plan <file>] [--yes]
//! squad daemon start|stop|status|logs
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{
    daemon::DaemonCommand, instance::InstanceCommand, list::ListArgs, new::NewArgs,
    orchestrate::OrchestrateArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "squad",
    version,
    about = "Run several coding agents in isolated tmux sessions and git worktrees",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create and start a new instance.
    New(NewArgs),

    /// List recorded instances.
    List(ListArgs),

    /// Operate on one existing instance.
    #[command(flatten)]
    Instance(InstanceCommand),

    /// Split a goal into tasks and run one worker per task.
    Orchestrate(OrchestrateArgs),

    /// Run or query the background polling daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Daemon { .. }) {
        init_tracing();
    }
    match cli.command {
        Commands::New(args) => args.run(),
        Commands::List(args) => args.run(),
        Commands::Instance(command) => commands::instance::run(command),
        Commands::Orchestrate(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

/// Warnings and errors on stderr unless `RUST_LOG` says otherwise. The
/// daemon installs its own file-backed subscriber.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
