//! Tera rendering engine: [`TemplateKind`] enum and [`Renderer`].
//!
//! | Template               | Rendered for                                   |
//! |------------------------|------------------------------------------------|
//! | `planner.md.tera`      | the one-shot planning agent                    |
//! | `plan.tera`            | the operator, before confirming a plan         |
//! | `worker.md.tera`       | each worker's first prompt                     |
//! | `merge_report.tera`    | the merged result of an orchestration run      |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tera::Tera;

use squad_core::Plan;

use crate::context::{to_tera_context, MergeContext, PlanContext, PlannerContext, WorkerContext};
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("shared/_header.tera", include_str!("templates/_partials/header.tera")),
    ("planner.md.tera", include_str!("templates/planner.md.tera")),
    ("plan.tera", include_str!("templates/plan.tera")),
    ("worker.md.tera", include_str!("templates/worker.md.tera")),
    ("merge_report.tera", include_str!("templates/merge_report.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents.replace("\r\n", "\n")));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(
            normalize_template_name(Path::new(name)),
            (*content).to_string(),
        );
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// TemplateKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Planner,
    Plan,
    Worker,
    MergeReport,
}

impl TemplateKind {
    pub fn all() -> &'static [TemplateKind] {
        &[
            TemplateKind::Planner,
            TemplateKind::Plan,
            TemplateKind::Worker,
            TemplateKind::MergeReport,
        ]
    }

    /// Name under which the template is registered (and overridden).
    pub fn template_name(&self) -> &'static str {
        match self {
            TemplateKind::Planner => "planner.md.tera",
            TemplateKind::Plan => "plan.tera",
            TemplateKind::Worker => "worker.md.tera",
            TemplateKind::MergeReport => "merge_report.tera",
        }
    }
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine for rendering templates with optional user overrides.
///
/// `user_template_dir` may contain `.tera` files that override embedded defaults
/// by name (e.g. `worker.md.tera`).
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let tera = build_tera(user_template_dir)?;
        Ok(TemplateEngine { tera })
    }

    /// Render `kind` with any serializable context.
    pub fn render<T: Serialize>(&self, kind: TemplateKind, ctx: &T) -> Result<String, RenderError> {
        let tera_ctx = to_tera_context(ctx)?;
        let rendered = self.tera.render(kind.template_name(), &tera_ctx)?;
        Ok(rendered.replace("\r\n", "\n"))
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Typed front-end over [`TemplateEngine`]. Create once and reuse.
pub struct Renderer {
    engine: TemplateEngine,
}

impl Renderer {
    /// Embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Ok(Renderer {
            engine: TemplateEngine::new(None)?,
        })
    }

    /// Embedded templates, overridden by any found in `dir`.
    pub fn with_user_templates(dir: &Path) -> Result<Self, RenderError> {
        Ok(Renderer {
            engine: TemplateEngine::new(Some(dir))?,
        })
    }

    pub fn planner(&self, goal: &str, max_tasks: Option<usize>) -> Result<String, RenderError> {
        self.engine
            .render(TemplateKind::Planner, &PlannerContext::new(goal, max_tasks))
    }

    pub fn plan(&self, goal: &str, plan: &Plan) -> Result<String, RenderError> {
        self.engine
            .render(TemplateKind::Plan, &PlanContext::from_plan(goal, plan))
    }

    pub fn worker(&self, ctx: &WorkerContext) -> Result<String, RenderError> {
        self.engine.render(TemplateKind::Worker, ctx)
    }

    pub fn merge_report(&self, ctx: &MergeContext) -> Result<String, RenderError> {
        let rendered = self.engine.render(TemplateKind::MergeReport, ctx)?;
        Ok(rendered.trim_start_matches('\n').to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use squad_core::Task;

    #[test]
    fn renderer_new_succeeds() {
        Renderer::new().expect("Renderer::new should succeed with embedded templates");
    }

    #[test]
    fn planner_prompt_carries_marker_contract() {
        let renderer = Renderer::new().unwrap();
        let prompt = renderer.planner("add a health endpoint", Some(4)).unwrap();
        assert!(prompt.contains("add a health endpoint"));
        assert!(prompt.contains("CREATE_WORKER: <task_name> | <initial_prompt>"));
        assert!(prompt.contains("at most 4 tasks"));
    }

    #[test]
    fn planner_prompt_without_limit_omits_rule() {
        let renderer = Renderer::new().unwrap();
        let prompt = renderer.planner("goal", None).unwrap();
        assert!(!prompt.contains("Produce at most"));
    }

    #[test]
    fn plan_listing_numbers_tasks() {
        let renderer = Renderer::new().unwrap();
        let plan = Plan::new(vec![
            Task::new("api", "Add GET /health"),
            Task::new("tests", "Cover /health"),
        ])
        .unwrap();
        let listing = renderer.plan("add a health endpoint", &plan).unwrap();
        assert!(listing.starts_with("Goal: add a health endpoint"));
        assert!(listing.contains("Task 1: api\nPrompt: Add GET /health"));
        assert!(listing.contains("Task 2: tests\nPrompt: Cover /health"));
    }

    #[test]
    fn every_template_is_registered() {
        let engine = TemplateEngine::new(None).unwrap();
        for kind in TemplateKind::all() {
            assert!(
                engine.tera.get_template_names().any(|n| n == kind.template_name()),
                "missing template for {kind:?}"
            );
        }
    }

    #[test]
    fn no_html_escaping_in_prompts() {
        let renderer = Renderer::new().unwrap();
        let ctx = WorkerContext {
            goal: "handle <T> & 'quotes'".to_string(),
            index: 1,
            total: 1,
            name: "generics".to_string(),
            prompt: "use Vec<u8> && Option<&str>".to_string(),
            branch: "squad/generics".to_string(),
        };
        let out = renderer.worker(&ctx).unwrap();
        assert!(out.contains("Vec<u8> && Option<&str>"));
        assert!(out.contains("handle <T> & 'quotes'"));
    }
}
