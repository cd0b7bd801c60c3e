//! Template contexts: serializable rendering payloads, one per template.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use squad_core::{DiffStats, Plan, MAX_TITLE_LEN};

use crate::error::RenderError;

/// Line prefix the planner must use for every task it proposes.
pub const PLAN_MARKER: &str = "CREATE_WORKER:";

/// Payload of `planner.md.tera`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerContext {
    pub goal: String,
    pub marker: String,
    pub max_name_len: usize,
    /// Upper bound on tasks, usually the free instance capacity.
    pub max_tasks: Option<usize>,
}

impl PlannerContext {
    pub fn new(goal: &str, max_tasks: Option<usize>) -> Self {
        Self {
            goal: goal.to_string(),
            marker: PLAN_MARKER.to_string(),
            max_name_len: MAX_TITLE_LEN,
            max_tasks,
        }
    }
}

/// One task of a plan, numbered from 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCtx {
    pub index: usize,
    pub name: String,
    pub prompt: String,
}

/// Payload of `plan.tera`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanContext {
    pub goal: String,
    pub tasks: Vec<TaskCtx>,
}

impl PlanContext {
    pub fn from_plan(goal: &str, plan: &Plan) -> Self {
        let tasks = plan
            .iter()
            .enumerate()
            .map(|(i, task)| TaskCtx {
                index: i + 1,
                name: task.name.clone(),
                prompt: task.prompt.clone(),
            })
            .collect();
        Self {
            goal: goal.to_string(),
            tasks,
        }
    }
}

/// Payload of `worker.md.tera`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerContext {
    pub goal: String,
    pub index: usize,
    pub total: usize,
    pub name: String,
    pub prompt: String,
    pub branch: String,
}

/// A successful worker's contribution to the merged report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionCtx {
    pub index: usize,
    pub name: String,
    pub branch: String,
    pub added: usize,
    pub removed: usize,
    pub diff: String,
}

/// A worker that produced nothing mergeable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureCtx {
    pub index: usize,
    pub name: String,
    /// `failed`, `timed out` or `cancelled`.
    pub status: String,
    pub error: Option<String>,
}

/// Payload of `merge_report.tera`. Sections must be pushed in plan order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeContext {
    pub goal: String,
    pub total: usize,
    pub sections: Vec<SectionCtx>,
    pub failures: Vec<FailureCtx>,
    pub generated_at: DateTime<Utc>,
}

impl MergeContext {
    pub fn new(goal: &str, total: usize) -> Self {
        Self {
            goal: goal.to_string(),
            total,
            sections: Vec::new(),
            failures: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn push_success(&mut self, index: usize, name: &str, branch: &str, diff: &DiffStats) {
        self.sections.push(SectionCtx {
            index,
            name: name.to_string(),
            branch: branch.to_string(),
            added: diff.added,
            removed: diff.removed,
            diff: diff.content.trim_end().to_string(),
        });
    }

    pub fn push_failure(&mut self, index: usize, name: &str, status: &str, error: Option<String>) {
        self.failures.push(FailureCtx {
            index,
            name: name.to_string(),
            status: status.to_string(),
            error,
        });
    }
}

/// Convert any context to a [`tera::Context`] for rendering.
pub fn to_tera_context<T: Serialize>(ctx: &T) -> Result<tera::Context, RenderError> {
    tera::Context::from_serialize(ctx).map_err(RenderError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use squad_core::Task;

    #[test]
    fn plan_context_numbers_from_one() {
        let plan = Plan::new(vec![Task::new("api", "build"), Task::new("docs", "write")])
            .expect("plan");
        let ctx = PlanContext::from_plan("ship it", &plan);
        assert_eq!(ctx.tasks[0].index, 1);
        assert_eq!(ctx.tasks[1].name, "docs");
    }

    #[test]
    fn merge_context_keeps_push_order() {
        let mut ctx = MergeContext::new("goal", 3);
        ctx.push_success(1, "a", "squad/a", &DiffStats::from_diff("+x\n"));
        ctx.push_failure(2, "b", "failed", Some("boom".to_string()));
        ctx.push_success(3, "c", "squad/c", &DiffStats::from_diff("-y\n"));
        let names: Vec<_> = ctx.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(ctx.sections[1].removed, 1);
        to_tera_context(&ctx).expect("tera context");
    }
}
