//! Single-shot orchestration: one goal, one confirmed plan, one merged result.
//!
//! `Idle → Planned → Running → Done | Failed`. There is no way back to
//! `Running` for the same plan; [`Orchestrator::reset`] starts over with a
//! new goal.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use squad_core::{
    Config, DiffStats, FailurePolicy, InstanceSnapshot, Plan, SquadError, Status, Task,
};
use squad_renderer::{MergeContext, Renderer, WorkerContext};
use squad_session::{lock, poll_instance, Backend, Instance, InstanceOptions, SharedInstance};

use crate::error::OrchestratorError;
use crate::planner::Planner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Planned,
    Running,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Planned => "planned",
            RunState::Running => "running",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Policy knobs of a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Agent command every worker runs.
    pub program: String,
    pub auto_yes: bool,
    /// Ceiling on live instances, interactive ones included.
    pub limit: usize,
    pub poll_interval: Duration,
    /// How long a worker must stay `Ready` to count as done.
    pub quiet_window: Duration,
    pub worker_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
}

impl RunSettings {
    pub fn from_config(config: &Config, program: Option<&str>, auto_yes: bool) -> Self {
        Self {
            program: program.unwrap_or(&config.default_program).to_string(),
            auto_yes: auto_yes || config.auto_yes,
            limit: config.global_instance_limit,
            poll_interval: config.poll_interval(),
            quiet_window: config.orchestrator.quiet_window(),
            worker_timeout: config.orchestrator.worker_timeout(),
            failure_policy: config.orchestrator.failure_policy,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// How one worker ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded { diff: DiffStats },
    Failed { error: String },
    /// Never went quiet within the worker timeout.
    TimedOut,
    /// Session killed from outside, or stopped by an aborting run.
    Cancelled,
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Succeeded { .. } => "succeeded",
            TaskOutcome::Failed { .. } => "failed",
            TaskOutcome::TimedOut => "timed out",
            TaskOutcome::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    /// 1-based position in the plan.
    pub index: usize,
    pub task: Task,
    /// Empty when the worker never got a branch.
    pub branch: String,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
    /// The retired worker, for the operator to resume. `None` if it never started.
    #[serde(skip)]
    pub snapshot: Option<InstanceSnapshot>,
}

/// Merged output of a run and the per-task outcomes, in plan order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub merged: String,
    pub results: Vec<TaskResult>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn unsuccessful(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| !r.outcome.is_success())
    }

    /// Snapshots of every worker that was started.
    pub fn snapshots(&self) -> Vec<InstanceSnapshot> {
        self.results
            .iter()
            .filter_map(|r| r.snapshot.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    goal: String,
    settings: RunSettings,
    backend: Arc<dyn Backend>,
    renderer: Arc<Renderer>,
    state: RunState,
    plan: Option<Plan>,
    report: Option<RunReport>,
}

impl Orchestrator {
    pub fn new(
        goal: &str,
        settings: RunSettings,
        backend: Arc<dyn Backend>,
        renderer: Arc<Renderer>,
    ) -> Self {
        Self {
            goal: goal.to_string(),
            settings,
            backend,
            renderer,
            state: RunState::Idle,
            plan: None,
            report: None,
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// The confirmed plan.
    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn report(&self) -> Option<&RunReport> {
        self.report.as_ref()
    }

    /// Decompose the goal. Nothing is confirmed or provisioned.
    pub fn divide_prompt(
        &self,
        planner: &dyn Planner,
        base_path: &Path,
    ) -> Result<Plan, OrchestratorError> {
        self.expect_state(RunState::Idle, "plan")?;
        let plan = planner.plan(&self.goal, base_path)?;
        info!(goal = %self.goal, tasks = plan.len(), "goal decomposed");
        Ok(plan)
    }

    /// The plan as shown to the operator for approval.
    pub fn plan_listing(&self, plan: &Plan) -> Result<String, OrchestratorError> {
        Ok(self.renderer.plan(&self.goal, plan)?)
    }

    pub fn confirm(&mut self, plan: Plan) -> Result<(), OrchestratorError> {
        self.expect_state(RunState::Idle, "confirm a plan")?;
        self.plan = Some(plan);
        self.state = RunState::Planned;
        Ok(())
    }

    /// `divide_prompt` and `confirm` in one step, for auto-confirmed runs.
    pub fn plan_and_confirm(
        &mut self,
        planner: &dyn Planner,
        base_path: &Path,
    ) -> Result<&Plan, OrchestratorError> {
        let plan = self.divide_prompt(planner, base_path)?;
        self.confirm(plan)?;
        self.plan
            .as_ref()
            .ok_or(OrchestratorError::InvalidState {
                op: "confirm a plan",
                state: self.state,
            })
    }

    /// Forget plan and result and take a new goal.
    pub fn reset(&mut self, goal: &str) {
        self.goal = goal.to_string();
        self.plan = None;
        self.report = None;
        self.state = RunState::Idle;
    }

    /// Execute the confirmed plan against `base_path`.
    ///
    /// `already_live` instances (interactive ones) count against the limit;
    /// tasks beyond the remaining capacity queue until a worker retires.
    /// Under [`FailurePolicy::AbortAll`] the first failure stops every other
    /// worker and the run fails with `RunAborted`; the partial report stays
    /// available through [`report`](Self::report).
    pub async fn run(
        &mut self,
        base_path: &Path,
        already_live: usize,
    ) -> Result<&RunReport, OrchestratorError> {
        self.expect_state(RunState::Planned, "run")?;
        let plan = match &self.plan {
            Some(plan) => plan.clone(),
            None => {
                return Err(OrchestratorError::InvalidState {
                    op: "run",
                    state: self.state,
                })
            }
        };
        let capacity = self.settings.limit.saturating_sub(already_live);
        if capacity == 0 {
            return Err(SquadError::CapacityExhausted {
                limit: self.settings.limit,
            }
            .into());
        }

        self.state = RunState::Running;
        info!(
            goal = %self.goal,
            tasks = plan.len(),
            capacity,
            "orchestration started"
        );

        let results = self.execute(&plan, base_path, capacity).await;
        let aborted = self.settings.failure_policy == FailurePolicy::AbortAll
            && results.iter().any(|r| !r.outcome.is_success());

        let merged = match self.merge(&results) {
            Ok(merged) => merged,
            Err(err) => {
                self.state = RunState::Failed;
                return Err(err);
            }
        };
        let report = RunReport { merged, results };
        let succeeded = report.succeeded();
        let total = report.results.len();

        let failure = if aborted {
            Some(format!(
                "{} of {total} tasks did not succeed",
                total - succeeded
            ))
        } else if succeeded == 0 {
            Some(format!("none of the {total} tasks succeeded"))
        } else {
            None
        };
        self.report = Some(report);

        match failure {
            Some(reason) => {
                self.state = RunState::Failed;
                error!(goal = %self.goal, reason = %reason, "orchestration failed");
                Err(SquadError::RunAborted(reason).into())
            }
            None => {
                self.state = RunState::Done;
                info!(goal = %self.goal, succeeded, total, "orchestration done");
                self.report.as_ref().ok_or(OrchestratorError::InvalidState {
                    op: "report",
                    state: RunState::Done,
                })
            }
        }
    }

    /// [`run`](Self::run) on a private multi-threaded runtime.
    pub fn run_blocking(
        &mut self,
        base_path: &Path,
        already_live: usize,
    ) -> Result<&RunReport, OrchestratorError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(OrchestratorError::Runtime)?;
        runtime.block_on(self.run(base_path, already_live))
    }

    async fn execute(&self, plan: &Plan, base_path: &Path, capacity: usize) -> Vec<TaskResult> {
        let slots = Arc::new(Semaphore::new(capacity));
        let (abort_tx, abort_rx) = watch::channel(false);
        let abort_tx = Arc::new(abort_tx);
        let total = plan.len();

        let mut set = JoinSet::new();
        for (i, task) in plan.iter().enumerate() {
            let job = WorkerJob {
                index: i + 1,
                total,
                goal: self.goal.clone(),
                task: task.clone(),
                base_path: base_path.to_path_buf(),
                settings: self.settings.clone(),
                backend: Arc::clone(&self.backend),
                renderer: Arc::clone(&self.renderer),
            };
            let slots = Arc::clone(&slots);
            let abort_rx = abort_rx.clone();
            let abort_tx = Arc::clone(&abort_tx);
            let abort_on_failure = self.settings.failure_policy == FailurePolicy::AbortAll;
            set.spawn(async move {
                let index = job.index;
                let task = job.task.clone();
                let result = match slots.acquire_owned().await {
                    Ok(_permit) => {
                        if *abort_rx.borrow() {
                            cancelled(index, task)
                        } else {
                            job.run(abort_rx).await
                        }
                    }
                    Err(_) => cancelled(index, task),
                };
                if abort_on_failure && !result.outcome.is_success() {
                    let _ = abort_tx.send(true);
                }
                result
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => {
                    debug!(index = result.index, outcome = result.outcome.label(), "worker finished");
                    results.push(result);
                }
                Err(err) => error!(error = %err, "worker task panicked"),
            }
        }
        // A panicked worker still gets a row, so the report covers every task.
        for (i, task) in plan.iter().enumerate() {
            if !results.iter().any(|r| r.index == i + 1) {
                results.push(TaskResult {
                    index: i + 1,
                    task: task.clone(),
                    branch: String::new(),
                    outcome: TaskOutcome::Failed {
                        error: "worker task panicked".to_string(),
                    },
                    snapshot: None,
                });
            }
        }
        results.sort_by_key(|r| r.index);
        results
    }

    /// Successful diffs in plan order, then a failure summary.
    fn merge(&self, results: &[TaskResult]) -> Result<String, OrchestratorError> {
        let mut ctx = MergeContext::new(&self.goal, results.len());
        for result in results {
            match &result.outcome {
                TaskOutcome::Succeeded { diff } => {
                    ctx.push_success(result.index, &result.task.name, &result.branch, diff)
                }
                TaskOutcome::Failed { error } => ctx.push_failure(
                    result.index,
                    &result.task.name,
                    result.outcome.label(),
                    Some(error.clone()),
                ),
                other => {
                    ctx.push_failure(result.index, &result.task.name, other.label(), None)
                }
            }
        }
        Ok(self.renderer.merge_report(&ctx)?)
    }

    fn expect_state(&self, expected: RunState, op: &'static str) -> Result<(), OrchestratorError> {
        if self.state != expected {
            return Err(OrchestratorError::InvalidState {
                op,
                state: self.state,
            });
        }
        Ok(())
    }
}

fn cancelled(index: usize, task: Task) -> TaskResult {
    TaskResult {
        index,
        task,
        branch: String::new(),
        outcome: TaskOutcome::Cancelled,
        snapshot: None,
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct WorkerJob {
    index: usize,
    total: usize,
    goal: String,
    task: Task,
    base_path: PathBuf,
    settings: RunSettings,
    backend: Arc<dyn Backend>,
    renderer: Arc<Renderer>,
}

/// How the completion wait ended.
enum Wait {
    Quiet,
    TimedOut,
    SessionGone,
    Aborted,
}

impl WorkerJob {
    async fn run(self, abort: watch::Receiver<bool>) -> TaskResult {
        let options = InstanceOptions {
            title: self.task.name.clone(),
            base_path: self.base_path.clone(),
            program: self.settings.program.clone(),
            auto_yes: self.settings.auto_yes,
        };
        let instance = match Instance::new(options, Arc::clone(&self.backend)) {
            Ok(instance) => Arc::new(std::sync::Mutex::new(instance)),
            Err(err) => return self.finish(None, TaskOutcome::Failed { error: err.to_string() }),
        };

        if let Err(err) = blocking(&instance, |i| i.start(true)).await {
            warn!(task = %self.task.name, error = %err, "worker failed to start");
            return self.finish(None, TaskOutcome::Failed { error: err.to_string() });
        }
        let branch = lock(&instance).branch().to_string();
        info!(task = %self.task.name, index = self.index, branch = %branch, "worker started");

        let prompt = match self.renderer.worker(&WorkerContext {
            goal: self.goal.clone(),
            index: self.index,
            total: self.total,
            name: self.task.name.clone(),
            prompt: self.task.prompt.clone(),
            branch: branch.clone(),
        }) {
            Ok(prompt) => prompt,
            Err(err) => {
                let outcome = TaskOutcome::Failed { error: err.to_string() };
                return self.retire(&instance, outcome).await;
            }
        };
        if let Err(err) = blocking(&instance, move |i| i.send_prompt(&prompt)).await {
            let outcome = TaskOutcome::Failed { error: err.to_string() };
            return self.retire(&instance, outcome).await;
        }

        let outcome = match self.wait_for_quiet(&instance, abort).await {
            Wait::Quiet => match blocking(&instance, |i| {
                i.update_diff_stats()?;
                Ok(i.diff_stats().clone())
            })
            .await
            {
                Ok(diff) => TaskOutcome::Succeeded { diff },
                Err(err) => TaskOutcome::Failed { error: err.to_string() },
            },
            Wait::TimedOut => TaskOutcome::TimedOut,
            Wait::SessionGone | Wait::Aborted => TaskOutcome::Cancelled,
        };
        self.retire(&instance, outcome).await
    }

    /// Poll until the worker stays `Ready` for the quiet window.
    async fn wait_for_quiet(
        &self,
        instance: &SharedInstance,
        mut abort: watch::Receiver<bool>,
    ) -> Wait {
        let started = Instant::now();
        let mut quiet_since: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = abort.changed() => {
                    if changed.is_ok() && *abort.borrow() {
                        return Wait::Aborted;
                    }
                }
            }
            if *abort.borrow() {
                return Wait::Aborted;
            }
            if let Some(limit) = self.settings.worker_timeout {
                if started.elapsed() >= limit {
                    warn!(task = %self.task.name, "worker timed out");
                    return Wait::TimedOut;
                }
            }

            let polled = blocking(instance, |i| {
                let probe = poll_instance(i);
                Ok((probe, i.status(), i.session_alive()))
            })
            .await;
            let (probe, status, alive) = match polled {
                Ok(polled) => polled,
                Err(err) => {
                    warn!(task = %self.task.name, error = %err, "worker poll failed");
                    continue;
                }
            };
            if let Err(err) = probe {
                if !alive {
                    warn!(task = %self.task.name, "worker session disappeared");
                    return Wait::SessionGone;
                }
                debug!(task = %self.task.name, error = %err, "probe failed");
                continue;
            }

            if status == Status::Ready {
                let since = *quiet_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.settings.quiet_window {
                    return Wait::Quiet;
                }
            } else {
                quiet_since = None;
            }
        }
    }

    /// Commit, detach and close the worker (pause semantics), freeing its
    /// slot while the branch stays for the operator.
    async fn retire(&self, instance: &SharedInstance, outcome: TaskOutcome) -> TaskResult {
        let outcome = match blocking(instance, |i| i.pause()).await {
            Ok(()) => outcome,
            Err(err) if outcome.is_success() => TaskOutcome::Failed {
                error: format!("failed to retire worker: {err}"),
            },
            Err(err) => {
                warn!(task = %self.task.name, error = %err, "failed to retire worker");
                outcome
            }
        };
        let snapshot = lock(instance).snapshot();
        self.finish(Some(snapshot), outcome)
    }

    fn finish(&self, snapshot: Option<InstanceSnapshot>, outcome: TaskOutcome) -> TaskResult {
        TaskResult {
            index: self.index,
            task: self.task.clone(),
            branch: snapshot
                .as_ref()
                .map(|s| s.branch.clone())
                .unwrap_or_default(),
            outcome,
            snapshot,
        }
    }
}

/// Run a provider-bound closure on a blocking thread.
async fn blocking<T, F>(instance: &SharedInstance, f: F) -> Result<T, SquadError>
where
    T: Send + 'static,
    F: FnOnce(&mut Instance) -> Result<T, SquadError> + Send + 'static,
{
    let instance = Arc::clone(instance);
    tokio::task::spawn_blocking(move || f(&mut lock(&instance)))
        .await
        .map_err(|e| SquadError::RunAborted(format!("worker thread failed: {e}")))?
}
