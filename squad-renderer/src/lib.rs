//! # squad-renderer
//!
//! Tera templates for the text squad hands to agents and operators: the
//! planner prompt, the plan listing shown for confirmation, the per-worker
//! prompt, and the merged report of an orchestration run.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use squad_renderer::Renderer;
//!
//! fn planner_prompt(goal: &str) -> Option<String> {
//!     let renderer = Renderer::new().ok()?;
//!     renderer.planner(goal, None).ok()
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{
    FailureCtx, MergeContext, PlanContext, PlannerContext, SectionCtx, TaskCtx, WorkerContext,
    PLAN_MARKER,
};
pub use engine::{Renderer, TemplateEngine, TemplateKind};
pub use error::RenderError;
