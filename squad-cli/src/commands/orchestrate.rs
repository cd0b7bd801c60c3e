//! `squad orchestrate <goal>`: plan, confirm, run workers, print the merged result.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use squad_core::storage::squad_root;
use squad_core::SquadError;
use squad_orchestrator::{AgentPlanner, FilePlanner, Orchestrator, Planner, RunSettings};
use squad_renderer::Renderer;

use super::{repo_path, Workspace};

/// Arguments for `squad orchestrate`.
#[derive(Args, Debug)]
pub struct OrchestrateArgs {
    /// What the workers should achieve together.
    pub goal: String,

    /// Repository the workers branch from. Defaults to the current directory.
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Agent command for planner and workers.
    #[arg(long)]
    pub program: Option<String>,

    /// Read the task list from a YAML file instead of asking the agent.
    #[arg(long, value_name = "FILE")]
    pub plan: Option<PathBuf>,

    /// Run the plan without asking, and auto-confirm agent prompts.
    #[arg(long, short)]
    pub yes: bool,
}

impl OrchestrateArgs {
    pub fn run(self) -> Result<()> {
        let mut workspace = Workspace::open()?;
        let base_path = repo_path(self.path)?;
        // `~/.squad/templates/*.tera` override the built-in prompts by name.
        let template_dir = squad_root(&workspace.home).join("templates");
        let renderer = Arc::new(
            Renderer::with_user_templates(&template_dir).context("failed to load templates")?,
        );
        let settings =
            RunSettings::from_config(&workspace.config, self.program.as_deref(), self.yes);

        let planner: Box<dyn Planner> = match self.plan {
            Some(path) => Box::new(FilePlanner::new(path)),
            None => Box::new(AgentPlanner::new(
                &settings.program,
                workspace.config.orchestrator.planner_args.clone(),
                Arc::clone(&renderer),
            )),
        };

        let mut orchestrator = Orchestrator::new(
            &self.goal,
            settings,
            Arc::clone(&workspace.backend),
            renderer,
        );
        let plan = orchestrator
            .divide_prompt(planner.as_ref(), &base_path)
            .context("failed to build a plan")?;
        // Each worker is recorded afterwards, so the plan must fit in the
        // registry's free slots, not only beside the live instances.
        let free = workspace.registry.remaining();
        if plan.len() > free {
            return Err(SquadError::CapacityExhausted {
                limit: workspace.registry.limit(),
            })
            .with_context(|| {
                format!(
                    "plan needs {} workers but only {free} slots are free",
                    plan.len()
                )
            });
        }
        println!("{}", orchestrator.plan_listing(&plan)?);

        if !self.yes && !confirm("Run this plan?")? {
            println!("Plan discarded.");
            return Ok(());
        }
        orchestrator.confirm(plan)?;

        let recorded = workspace.registry.len();
        let outcome = orchestrator.run_blocking(&base_path, recorded).map(|_| ());

        // Record every retired worker so its branch can be resumed later,
        // including after an aborted run.
        if let Some(report) = orchestrator.report() {
            for snapshot in report.snapshots() {
                let worker =
                    squad_session::Instance::from_snapshot(snapshot, Arc::clone(&workspace.backend));
                if let Err(err) = workspace.registry.add(worker) {
                    tracing::warn!(error = %err, "worker not recorded");
                }
            }
            workspace.save()?;

            println!("{}", report.merged);
            println!(
                "{} {} of {} tasks succeeded",
                "done:".bold(),
                report.succeeded(),
                report.results.len()
            );
        }
        outcome.context("orchestration failed")
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} (y/n) ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read answer")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
