//! Error types for squad-orchestrator.

use std::path::PathBuf;

use thiserror::Error;

use squad_core::SquadError;
use squad_renderer::RenderError;

use crate::orchestrator::RunState;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Squad(#[from] SquadError),

    #[error(transparent)]
    Render(#[from] RenderError),

    /// The planning agent could not be run or exited unsuccessfully.
    #[error("planner `{program}` failed: {detail}")]
    Planner { program: String, detail: String },

    #[error("failed to read plan file {path}: {source}")]
    PlanFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot {op} while the orchestrator is {state}")]
    InvalidState { op: &'static str, state: RunState },

    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl OrchestratorError {
    /// The core taxonomy variant, when this error carries one.
    pub fn as_squad(&self) -> Option<&SquadError> {
        match self {
            OrchestratorError::Squad(err) => Some(err),
            _ => None,
        }
    }
}
