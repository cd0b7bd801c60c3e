//! # squad-orchestrator
//!
//! Decomposes a goal into a [`Plan`](squad_core::Plan) through a [`Planner`],
//! runs one worker instance per task under the global instance ceiling, and
//! merges their diffs in plan order.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use squad_core::Config;
//! use squad_orchestrator::{FilePlanner, Orchestrator, RunSettings};
//! use squad_renderer::Renderer;
//! use squad_session::SystemBackend;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let home = Path::new("/home/me");
//!     let config = Config::default();
//!     let mut orchestrator = Orchestrator::new(
//!         "add a health endpoint",
//!         RunSettings::from_config(&config, None, true),
//!         Arc::new(SystemBackend::new(home, &config)),
//!         Arc::new(Renderer::new()?),
//!     );
//!     orchestrator.plan_and_confirm(&FilePlanner::new("plan.yaml"), Path::new("."))?;
//!     let report = orchestrator.run_blocking(Path::new("."), 0)?;
//!     println!("{}", report.merged);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod orchestrator;
pub mod planner;

pub use error::OrchestratorError;
pub use orchestrator::{Orchestrator, RunReport, RunSettings, RunState, TaskOutcome, TaskResult};
pub use planner::{parse_plan, task_name, AgentPlanner, FilePlanner, Planner};
