//! Commands that act on one recorded instance.

use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;

use squad_core::session_name;
use squad_session::lock;

use super::Workspace;

#[derive(Subcommand, Debug)]
pub enum InstanceCommand {
    /// Type a prompt into the instance's agent.
    Prompt {
        title: String,
        /// Text to send, followed by Enter.
        text: String,
    },
    /// Print the agent's current screen.
    Preview { title: String },
    /// Show the instance's changes against its base commit.
    Diff { title: String },
    /// Attach the terminal to the instance's tmux session.
    Attach { title: String },
    /// Commit the instance's work and push its branch.
    Push {
        title: String,
        /// Commit message. Defaults to "[squad] update from '<title>' on <date>".
        #[arg(long, short)]
        message: Option<String>,
    },
    /// Commit, remove the worktree and stop the session. The branch stays.
    Pause { title: String },
    /// Recreate the worktree from the branch and start a new session.
    Resume { title: String },
    /// Remove session, worktree and branch.
    Kill { title: String },
}

pub fn run(command: InstanceCommand) -> Result<()> {
    let mut workspace = Workspace::open()?;

    match command {
        InstanceCommand::Prompt { title, text } => {
            let instance = workspace.bound_instance(&title)?;
            lock(&instance)
                .send_prompt(&text)
                .with_context(|| format!("failed to send prompt to '{title}'"))?;
            workspace.save()?;
        }
        InstanceCommand::Preview { title } => {
            let instance = workspace.bound_instance(&title)?;
            let screen = lock(&instance).preview()?;
            print!("{screen}");
            if !screen.ends_with('\n') {
                println!();
            }
        }
        InstanceCommand::Diff { title } => {
            let instance = workspace.bound_instance(&title)?;
            let mut guard = lock(&instance);
            guard.update_diff_stats()?;
            let stats = guard.diff_stats();
            if stats.is_empty() {
                println!("No changes on {}.", guard.branch());
                return Ok(());
            }
            print!("{}", stats.content);
            if !stats.content.ends_with('\n') {
                println!();
            }
            println!(
                "{} {}",
                format!("+{}", stats.added).green(),
                format!("-{}", stats.removed).red()
            );
        }
        InstanceCommand::Attach { title } => {
            let instance = workspace.instance(&title)?;
            let status = lock(&instance).status();
            if !status.is_live() {
                bail!("cannot attach to '{title}' while it is {status}");
            }
            let exit = Command::new("tmux")
                .args(["attach-session", "-t", &format!("={}:", session_name(&title))])
                .status()
                .context("failed to run tmux")?;
            if !exit.success() {
                bail!("tmux attach-session exited with {exit}");
            }
        }
        InstanceCommand::Push { title, message } => {
            let instance = workspace.bound_instance(&title)?;
            let mut guard = lock(&instance);
            let message = message.unwrap_or_else(|| guard.default_push_message());
            guard
                .push_changes(&message, true)
                .with_context(|| format!("failed to push '{title}'"))?;
            println!("{} {}", "pushed".green().bold(), guard.branch().cyan());
        }
        InstanceCommand::Pause { title } => {
            let instance = workspace.bound_instance(&title)?;
            lock(&instance).pause()?;
            workspace.save()?;
            println!("{} {title}", "paused".yellow().bold());
        }
        InstanceCommand::Resume { title } => {
            let instance = workspace.instance(&title)?;
            lock(&instance).resume()?;
            workspace.save()?;
            println!("{} {title}", "resumed".green().bold());
        }
        InstanceCommand::Kill { title } => {
            workspace.registry.kill(&title)?;
            workspace.save()?;
            println!("{} {title}", "killed".red().bold());
        }
    }

    Ok(())
}
