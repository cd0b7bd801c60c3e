//! `squad daemon`: foreground polling daemon and its socket queries.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use squad_daemon::paths::{socket_path, stderr_log_path, stdout_log_path};
use squad_daemon::{request_status, request_stop, start_blocking, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the polling daemon in the foreground.
    Start,
    /// Ask a running daemon to shut down.
    Stop,
    /// Print the daemon's runtime status as JSON.
    Status,
    /// Print recent daemon log lines.
    Logs(DaemonLogsArgs),
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Show only warnings and errors.
    #[arg(long)]
    pub errors_only: bool,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        DaemonCommand::Start => start_blocking(&home).context("daemon exited with error"),
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => {
                println!("daemon stop requested");
                Ok(())
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
                Ok(())
            }
            Err(err) => Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => {
            let payload = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            let rendered = serde_json::to_string_pretty(&payload)
                .context("failed to render daemon status JSON")?;
            println!("{rendered}");
            Ok(())
        }
        DaemonCommand::Logs(args) => {
            let mut files = vec![stderr_log_path(&home)];
            if !args.errors_only {
                files.insert(0, stdout_log_path(&home));
            }
            for path in files {
                print_tail(&path, args.lines)?;
            }
            Ok(())
        }
    }
}

/// Print the last `lines` lines of `path` under a `==> path <==` header.
fn print_tail(path: &Path, lines: usize) -> Result<()> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            println!("log file not found: {}", path.display());
            return Ok(());
        }
        Err(err) => return Err(err).with_context(|| format!("open {}", path.display())),
    };

    let mut tail = VecDeque::<String>::with_capacity(lines + 1);
    for line in BufReader::new(file).lines() {
        tail.push_back(line.with_context(|| format!("read {}", path.display()))?);
        if tail.len() > lines {
            tail.pop_front();
        }
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
