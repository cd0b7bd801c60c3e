//! Goal decomposition: turning one free-text goal into a validated [`Plan`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use squad_core::{slug, Plan, SquadError, Task, MAX_TITLE_LEN};
use squad_renderer::{Renderer, PLAN_MARKER};
use squad_session::{CommandRunner, ProcessCommandRunner};

use crate::error::OrchestratorError;

/// Produces a plan for a goal. Commits no resources.
pub trait Planner: Send + Sync {
    fn plan(&self, goal: &str, base_path: &Path) -> Result<Plan, OrchestratorError>;
}

// ---------------------------------------------------------------------------
// AgentPlanner
// ---------------------------------------------------------------------------

/// Asks the agent program itself, in one-shot print mode, to split the goal.
pub struct AgentPlanner {
    program: String,
    args: Vec<String>,
    max_tasks: Option<usize>,
    renderer: Arc<Renderer>,
    runner: Arc<dyn CommandRunner>,
}

impl AgentPlanner {
    /// `program` may carry its own arguments (`"claude --model opus"`);
    /// `args` are appended before the prompt.
    pub fn new(program: &str, args: Vec<String>, renderer: Arc<Renderer>) -> Self {
        Self::with_runner(program, args, renderer, Arc::new(ProcessCommandRunner))
    }

    pub fn with_runner(
        program: &str,
        args: Vec<String>,
        renderer: Arc<Renderer>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            program: program.to_string(),
            args,
            max_tasks: None,
            renderer,
            runner,
        }
    }

    /// Ask for at most `max_tasks` tasks in the prompt. Not enforced on the answer.
    pub fn max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = Some(max_tasks);
        self
    }
}

impl Planner for AgentPlanner {
    fn plan(&self, goal: &str, base_path: &Path) -> Result<Plan, OrchestratorError> {
        let prompt = self.renderer.planner(goal, self.max_tasks)?;

        let mut words = self.program.split_whitespace();
        let executable = words.next().ok_or_else(|| OrchestratorError::Planner {
            program: self.program.clone(),
            detail: "empty program".to_string(),
        })?;
        let mut args: Vec<OsString> = words.map(OsString::from).collect();
        args.extend(self.args.iter().map(OsString::from));
        args.push(OsString::from(prompt));

        info!(program = %self.program, path = %base_path.display(), "asking agent for a plan");
        let output = self
            .runner
            .run(executable, &args, Some(base_path))
            .map_err(|e| OrchestratorError::Planner {
                program: self.program.clone(),
                detail: e.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            };
            return Err(OrchestratorError::Planner {
                program: self.program.clone(),
                detail,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let plan = parse_plan(&stdout)?;
        debug!(tasks = plan.len(), "plan parsed");
        Ok(plan)
    }
}

/// Parse every `CREATE_WORKER: <name> | <prompt>` line of an agent answer.
///
/// Lines may be indented, bulleted, or wrapped in backticks. Names are
/// slugged and cut to the title limit. Lines without a `|` are skipped.
pub fn parse_plan(output: &str) -> Result<Plan, SquadError> {
    let mut tasks = Vec::new();
    for line in output.lines() {
        let line = line
            .trim()
            .trim_start_matches(['-', '*', '`', ' '])
            .trim_end_matches('`');
        let Some(rest) = line.strip_prefix(PLAN_MARKER) else {
            continue;
        };
        let Some((name, prompt)) = rest.split_once('|') else {
            warn!(line = %line, "planner line without a prompt ignored");
            continue;
        };
        let name = task_name(name);
        let prompt = prompt.trim();
        if name.is_empty() || prompt.is_empty() {
            warn!(line = %line, "planner line with an empty name or prompt ignored");
            continue;
        }
        tasks.push(Task::new(name, prompt));
    }
    if tasks.is_empty() {
        return Err(SquadError::Decomposition(format!(
            "planner answer contains no '{PLAN_MARKER} <task_name> | <initial_prompt>' lines"
        )));
    }
    Plan::new(tasks)
}

/// Branch-safe task name of at most [`MAX_TITLE_LEN`] characters.
pub fn task_name(raw: &str) -> String {
    let slugged = slug(raw);
    let cut: String = slugged.chars().take(MAX_TITLE_LEN).collect();
    cut.trim_end_matches('-').to_string()
}

// ---------------------------------------------------------------------------
// FilePlanner
// ---------------------------------------------------------------------------

/// A plan written by hand: a YAML list of `{name, prompt}`.
pub struct FilePlanner {
    path: PathBuf,
}

impl FilePlanner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Planner for FilePlanner {
    fn plan(&self, _goal: &str, _base_path: &Path) -> Result<Plan, OrchestratorError> {
        let contents =
            std::fs::read_to_string(&self.path).map_err(|source| OrchestratorError::PlanFile {
                path: self.path.clone(),
                source,
            })?;
        let tasks: Vec<Task> = serde_yaml::from_str(&contents).map_err(|e| {
            SquadError::Decomposition(format!("{}: {e}", self.path.display()))
        })?;
        Ok(Plan::new(tasks)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Output};
    use std::sync::Mutex;

    struct CannedRunner {
        output: Output,
        seen: Mutex<Vec<(String, Vec<OsString>, Option<PathBuf>)>>,
    }

    impl CannedRunner {
        fn new(code: i32, stdout: &str, stderr: &str) -> Self {
            Self {
                output: Output {
                    status: ExitStatus::from_raw(code << 8),
                    stdout: stdout.as_bytes().to_vec(),
                    stderr: stderr.as_bytes().to_vec(),
                },
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for CannedRunner {
        fn run(&self, program: &str, args: &[OsString], cwd: Option<&Path>) -> io::Result<Output> {
            self.seen.lock().expect("lock").push((
                program.to_string(),
                args.to_vec(),
                cwd.map(Path::to_path_buf),
            ));
            Ok(self.output.clone())
        }
    }

    fn renderer() -> Arc<Renderer> {
        Arc::new(Renderer::new().expect("renderer"))
    }

    #[test]
    fn parses_marker_lines_in_order() {
        let answer = "Here is the plan:\n\
            CREATE_WORKER: implement-login | Implement a login form\n\
            - CREATE_WORKER: Add Tests | Cover the login form with tests\n\
            `CREATE_WORKER: docs | Document the login flow`\n\
            That's all.";
        let plan = parse_plan(answer).expect("plan");
        let names: Vec<&str> = plan.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["implement-login", "add-tests", "docs"]);
        assert_eq!(plan.tasks()[0].prompt, "Implement a login form");
    }

    #[test]
    fn prompt_may_contain_pipes() {
        let plan = parse_plan("CREATE_WORKER: cli | Support `a | b` pipelines").expect("plan");
        assert_eq!(plan.tasks()[0].prompt, "Support `a | b` pipelines");
    }

    #[test]
    fn answer_without_markers_is_a_decomposition_error() {
        let err = parse_plan("I could not find anything to do.").expect_err("empty");
        assert!(matches!(err, SquadError::Decomposition(_)));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let plan = parse_plan("CREATE_WORKER: no-prompt\nCREATE_WORKER: ok | do it").expect("plan");
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = parse_plan("CREATE_WORKER: api | one\nCREATE_WORKER: API | two").expect_err("dup");
        assert!(err.to_string().contains("duplicate task name"));
    }

    #[test]
    fn long_names_are_truncated_to_title_limit() {
        let name = task_name("implement the entire authentication subsystem end to end");
        assert!(name.chars().count() <= MAX_TITLE_LEN);
        assert!(!name.ends_with('-'));
        assert!(name.starts_with("implement-the-entire"));
    }

    #[test]
    fn agent_planner_runs_program_in_base_path() {
        let runner = Arc::new(CannedRunner::new(0, "CREATE_WORKER: health | Add GET /health", ""));
        let planner = AgentPlanner::with_runner(
            "claude --model opus",
            vec!["-p".to_string()],
            renderer(),
            runner.clone(),
        );

        let plan = planner
            .plan("add a health endpoint", Path::new("/repo"))
            .expect("plan");
        assert_eq!(plan.tasks()[0].name, "health");

        let seen = runner.seen.lock().expect("lock");
        let (program, args, cwd) = &seen[0];
        assert_eq!(program, "claude");
        assert_eq!(args[0], "--model");
        assert_eq!(args[1], "opus");
        assert_eq!(args[2], "-p");
        let prompt = args[3].to_string_lossy();
        assert!(prompt.contains("Your goal is to implement: add a health endpoint"));
        assert!(prompt.contains("CREATE_WORKER: <task_name> | <initial_prompt>"));
        assert_eq!(cwd.as_deref(), Some(Path::new("/repo")));
    }

    #[test]
    fn agent_planner_failure_carries_stderr() {
        let runner = Arc::new(CannedRunner::new(1, "", "not logged in"));
        let planner = AgentPlanner::with_runner("claude", Vec::new(), renderer(), runner);

        let err = planner.plan("goal", Path::new("/repo")).expect_err("fails");
        assert!(matches!(err, OrchestratorError::Planner { ref detail, .. } if detail == "not logged in"));
    }

    #[test]
    fn file_planner_reads_yaml_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plan.yaml");
        std::fs::write(
            &path,
            "- name: schema\n  prompt: Add the users table\n- name: api\n  prompt: Expose /users\n",
        )
        .expect("write");

        let plan = FilePlanner::new(&path).plan("ignored", dir.path()).expect("plan");
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.tasks()[1].name, "api");
    }

    #[test]
    fn file_planner_missing_file() {
        let err = FilePlanner::new("/definitely/not/here.yaml")
            .plan("goal", Path::new("/"))
            .expect_err("missing");
        assert!(matches!(err, OrchestratorError::PlanFile { .. }));
    }

    #[test]
    fn file_planner_rejects_empty_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plan.yaml");
        std::fs::write(&path, "[]\n").expect("write");

        let err = FilePlanner::new(&path).plan("goal", dir.path()).expect_err("empty");
        assert!(err.to_string().contains("invalid plan"));
    }
}
