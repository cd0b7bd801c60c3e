//! `squad new <title>`: provision a worktree and session, optionally send a prompt.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use squad_session::{lock, Instance, InstanceOptions};

use super::{repo_path, Workspace};

/// Arguments for `squad new`.
#[derive(Args, Debug)]
pub struct NewArgs {
    /// Instance title; also names the branch and tmux session.
    pub title: String,

    /// Repository to branch from. Defaults to the current directory.
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Agent command to run. Defaults to `default_program` from the config.
    #[arg(long)]
    pub program: Option<String>,

    /// First prompt to type into the agent.
    #[arg(long)]
    pub prompt: Option<String>,

    /// Accept the agent's confirmation prompts automatically.
    #[arg(long)]
    pub auto_yes: bool,
}

impl NewArgs {
    pub fn run(self) -> Result<()> {
        let mut workspace = Workspace::open()?;
        let options = InstanceOptions {
            title: self.title.clone(),
            base_path: repo_path(self.path)?,
            program: self
                .program
                .unwrap_or_else(|| workspace.config.default_program.clone()),
            auto_yes: self.auto_yes || workspace.config.auto_yes,
        };
        let instance = Instance::new(options, workspace.backend.clone())?;
        let shared = workspace.registry.add(instance)?;

        let started = lock(&shared).start(true);
        if let Err(err) = started {
            workspace.registry.remove(&self.title);
            return Err(err).with_context(|| format!("failed to start '{}'", self.title));
        }
        workspace.save()?;

        if let Some(prompt) = self.prompt.as_deref() {
            lock(&shared)
                .send_prompt(prompt)
                .with_context(|| format!("failed to send prompt to '{}'", self.title))?;
            workspace.save()?;
        }

        let branch = lock(&shared).branch().to_string();
        println!(
            "{} {} on branch {}",
            "started".green().bold(),
            self.title.bold(),
            branch.cyan()
        );
        Ok(())
    }
}
