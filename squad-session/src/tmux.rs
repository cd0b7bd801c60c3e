//! tmux-backed [`Session`].

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use squad_core::session_name;

use crate::backend::{Probe, Session};
use crate::error::ProviderError;
use crate::runner::{args, run_checked, run_raw, run_stdout, CommandRunner};

const TMUX: &str = "tmux";

pub struct TmuxSession {
    name: String,
    program: String,
    last_hash: Option<String>,
    runner: Arc<dyn CommandRunner>,
}

impl TmuxSession {
    pub fn new(title: &str, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            name: session_name(title),
            program: String::new(),
            last_hash: None,
            runner,
        }
    }

    /// Session target with an exact-match prefix so `squad_a` never matches `squad_ab`.
    fn target(&self) -> String {
        format!("={}", self.name)
    }

    /// Pane target (`=name:`) for commands that address a window or pane.
    /// Without the `=` tmux falls back to prefix matching on another session.
    fn pane_target(&self) -> String {
        format!("={}:", self.name)
    }

    fn tmux(&self, argv: Vec<OsString>) -> Result<(), ProviderError> {
        run_checked(self.runner.as_ref(), TMUX, &argv, None).map(|_| ())
    }
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

impl Session for TmuxSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self) -> bool {
        run_raw(
            self.runner.as_ref(),
            TMUX,
            &args(["has-session", "-t", self.target().as_str()]),
            None,
        )
        .map(|output| output.status.success())
        .unwrap_or(false)
    }

    fn start(&mut self, program: &str, workdir: &Path) -> Result<(), ProviderError> {
        if self.exists() {
            return Err(ProviderError::CommandFailed {
                command: format!("tmux new-session -s {}", self.name),
                detail: format!("session '{}' already exists", self.name),
            });
        }
        let mut argv = args(["new-session", "-d", "-s", self.name.as_str(), "-c"]);
        argv.push(workdir.as_os_str().to_os_string());
        argv.push(program.into());
        self.tmux(argv)?;
        debug!(session = %self.name, program, "tmux session started");
        self.program = program.to_string();
        self.last_hash = None;
        Ok(())
    }

    fn restore(&mut self, program: &str) -> Result<(), ProviderError> {
        if !self.exists() {
            return Err(ProviderError::SessionMissing(self.name.clone()));
        }
        self.program = program.to_string();
        self.last_hash = None;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ProviderError> {
        if !self.exists() {
            return Ok(());
        }
        self.tmux(args(["kill-session", "-t", self.target().as_str()]))?;
        debug!(session = %self.name, "tmux session killed");
        Ok(())
    }

    fn probe(&mut self) -> Result<Probe, ProviderError> {
        let content = self.capture()?;
        let hash = content_hash(&content);
        let changed = self.last_hash.as_deref() != Some(hash.as_str());
        self.last_hash = Some(hash);
        Ok(Probe {
            changed,
            awaiting_confirmation: squad_detector::awaiting_confirmation(&self.program, &content),
        })
    }

    fn capture(&self) -> Result<String, ProviderError> {
        run_stdout(
            self.runner.as_ref(),
            TMUX,
            &args(["capture-pane", "-p", "-e", "-J", "-t", self.pane_target().as_str()]),
            None,
        )
    }

    fn send_keys(&mut self, text: &str) -> Result<(), ProviderError> {
        self.tmux(args(["send-keys", "-t", self.pane_target().as_str(), "-l", text]))?;
        self.tap_enter()
    }

    fn tap_enter(&mut self) -> Result<(), ProviderError> {
        self.tmux(args(["send-keys", "-t", self.pane_target().as_str(), "Enter"]))
    }
}
