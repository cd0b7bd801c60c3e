use squad_core::DiffStats;
use squad_renderer::{MergeContext, Renderer, WorkerContext};
use tempfile::TempDir;

fn diff(file: &str, line: &str) -> DiffStats {
    DiffStats::from_diff(format!(
        "diff --git a/{file} b/{file}\n--- a/{file}\n+++ b/{file}\n@@ -0,0 +1 @@\n+{line}\n"
    ))
}

// ---------------------------------------------------------------------------
// Merge report
// ---------------------------------------------------------------------------

#[test]
fn merge_report_follows_push_order() {
    let renderer = Renderer::new().expect("renderer");
    let mut ctx = MergeContext::new("add a health endpoint", 3);
    ctx.push_success(1, "route", "squad/route", &diff("src/routes.rs", "fn health() {}"));
    ctx.push_success(2, "handler", "squad/handler", &diff("src/handler.rs", "struct Health;"));
    ctx.push_success(3, "tests", "squad/tests", &diff("tests/health.rs", "#[test] fn ok() {}"));

    let report = renderer.merge_report(&ctx).expect("render");
    let first = report.find("Task 1: route").expect("task 1");
    let second = report.find("Task 2: handler").expect("task 2");
    let third = report.find("Task 3: tests").expect("task 3");
    assert!(first < second && second < third, "report:\n{report}");
    assert!(report.contains("+fn health() {}"));
    assert!(!report.contains("Failed tasks"));
    assert!(report.starts_with("### Task 1"));
}

#[test]
fn merge_report_lists_failures_after_sections() {
    let renderer = Renderer::new().expect("renderer");
    let mut ctx = MergeContext::new("goal", 3);
    ctx.push_success(1, "a", "squad/a", &diff("a.txt", "a"));
    ctx.push_failure(2, "b", "failed", Some("failed to provision 'b': branch exists".to_string()));
    ctx.push_failure(3, "c", "timed out", None);

    let report = renderer.merge_report(&ctx).expect("render");
    assert!(report.contains("### Failed tasks (2 of 3)"), "report:\n{report}");
    assert!(report.contains("- Task 2: b [failed] failed to provision 'b': branch exists"));
    assert!(report.contains("- Task 3: c [timed out]"));
    let section = report.find("Task 1: a").expect("section");
    let failures = report.find("Failed tasks").expect("failures");
    assert!(section < failures);
}

#[test]
fn merge_report_reports_line_counts() {
    let renderer = Renderer::new().expect("renderer");
    let mut ctx = MergeContext::new("goal", 1);
    ctx.push_success(
        1,
        "swap",
        "squad/swap",
        &DiffStats::from_diff("--- a/x\n+++ b/x\n-old\n+new\n+newer\n"),
    );
    let report = renderer.merge_report(&ctx).expect("render");
    assert!(report.contains("(squad/swap) +2 -1"), "report:\n{report}");
}

// ---------------------------------------------------------------------------
// Worker prompt
// ---------------------------------------------------------------------------

#[test]
fn worker_prompt_carries_task_and_position() {
    let renderer = Renderer::new().expect("renderer");
    let out = renderer
        .worker(&WorkerContext {
            goal: "add a health endpoint".to_string(),
            index: 2,
            total: 3,
            name: "handler".to_string(),
            prompt: "Implement the /health handler returning 200".to_string(),
            branch: "squad/handler".to_string(),
        })
        .expect("render");
    assert!(out.contains("worker 2 of 3"));
    assert!(out.contains("Implement the /health handler returning 200"));
    assert!(out.contains("squad/handler"));
}

// ---------------------------------------------------------------------------
// User overrides
// ---------------------------------------------------------------------------

#[test]
fn user_template_overrides_embedded_default() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(
        dir.path().join("worker.md.tera"),
        "CUSTOM {{ name }}: {{ prompt }}\r\n",
    )
    .expect("write override");

    let renderer = Renderer::with_user_templates(dir.path()).expect("renderer");
    let out = renderer
        .worker(&WorkerContext {
            goal: "g".to_string(),
            index: 1,
            total: 1,
            name: "api".to_string(),
            prompt: "do it".to_string(),
            branch: "squad/api".to_string(),
        })
        .expect("render");
    assert_eq!(out, "CUSTOM api: do it\n");
}

#[test]
fn non_tera_files_in_override_dir_are_ignored() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("notes.txt"), "{{ broken").expect("write");
    Renderer::with_user_templates(dir.path()).expect("non-.tera files must be skipped");
}

#[test]
fn missing_override_dir_is_fine() {
    let dir = TempDir::new().expect("tempdir");
    Renderer::with_user_templates(&dir.path().join("absent")).expect("renderer");
}

#[test]
fn broken_override_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("plan.tera"), "{% for %}").expect("write");
    assert!(Renderer::with_user_templates(dir.path()).is_err());
}
