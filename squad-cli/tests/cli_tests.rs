use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use chrono::Utc;
use predicates::str::contains;

use squad_core::storage::{load_instances_at, save_instances_at};
use squad_core::{InstanceSnapshot, Status};

fn squad_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("squad"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG");
    cmd
}

fn paused_record(title: &str) -> InstanceSnapshot {
    InstanceSnapshot {
        title: title.to_string(),
        base_path: "/repo".into(),
        program: "claude".to_string(),
        auto_yes: false,
        status: Status::Paused,
        branch: format!("squad/{title}"),
        base_commit: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[test]
fn list_on_a_fresh_home_has_no_instances() {
    let home = TempDir::new().expect("home");
    squad_cmd(home.path())
        .arg("list")
        .assert()
        .success()
        .stdout(contains("No instances"));
}

#[test]
fn list_json_prints_recorded_snapshots() {
    let home = TempDir::new().expect("home");
    save_instances_at(home.path(), &[paused_record("docs")]).expect("save");

    let assert = squad_cmd(home.path())
        .args(["list", "--json"])
        .assert()
        .success();
    let json: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json");
    assert_eq!(json[0]["title"], "docs");
    assert_eq!(json[0]["status"], "paused");
}

#[test]
fn list_table_shows_titles_and_branches() {
    let home = TempDir::new().expect("home");
    save_instances_at(home.path(), &[paused_record("docs")]).expect("save");

    squad_cmd(home.path())
        .arg("list")
        .assert()
        .success()
        .stdout(contains("docs"))
        .stdout(contains("squad/docs"));
}

#[test]
fn kill_of_unknown_title_fails() {
    let home = TempDir::new().expect("home");
    squad_cmd(home.path())
        .args(["kill", "ghost"])
        .assert()
        .failure()
        .stderr(contains("instance 'ghost' not found"));
}

#[test]
fn overlong_title_is_rejected_before_provisioning() {
    let home = TempDir::new().expect("home");
    let repo = TempDir::new().expect("repo");
    let title = "t".repeat(33);

    squad_cmd(home.path())
        .args(["new", &title, "--path"])
        .arg(repo.path())
        .assert()
        .failure()
        .stderr(contains("invalid title"));
    assert!(load_instances_at(home.path()).expect("load").is_empty());
}

#[test]
fn resume_of_an_unrecorded_title_fails() {
    let home = TempDir::new().expect("home");
    save_instances_at(home.path(), &[paused_record("docs")]).expect("save");

    squad_cmd(home.path())
        .args(["resume", "other"])
        .assert()
        .failure()
        .stderr(contains("instance 'other' not found"));
}

#[test]
fn plan_file_with_duplicate_names_is_an_invalid_plan() {
    let home = TempDir::new().expect("home");
    let repo = TempDir::new().expect("repo");
    let plan = repo.child("plan.yaml");
    plan.write_str(
        "- name: api\n  prompt: add the route\n- name: api\n  prompt: add the handler\n",
    )
    .expect("plan");

    squad_cmd(home.path())
        .args(["orchestrate", "add a health endpoint", "--yes", "--path"])
        .arg(repo.path())
        .arg("--plan")
        .arg(plan.path())
        .assert()
        .failure()
        .stderr(contains("invalid plan"));
}

#[test]
fn plan_larger_than_free_slots_is_refused_before_any_worker_starts() {
    let home = TempDir::new().expect("home");
    let repo = TempDir::new().expect("repo");
    let records: Vec<InstanceSnapshot> =
        (0..9).map(|i| paused_record(&format!("p{i}"))).collect();
    save_instances_at(home.path(), &records).expect("save");
    let plan = repo.child("plan.yaml");
    plan.write_str(
        "- name: api\n  prompt: add the route\n- name: docs\n  prompt: document it\n",
    )
    .expect("plan");

    squad_cmd(home.path())
        .args(["orchestrate", "add a health endpoint", "--yes", "--path"])
        .arg(repo.path())
        .arg("--plan")
        .arg(plan.path())
        .assert()
        .failure()
        .stderr(contains("only 1 slots are free"));
    assert_eq!(load_instances_at(home.path()).expect("load").len(), 9);
}

#[test]
fn missing_plan_file_is_reported() {
    let home = TempDir::new().expect("home");
    let repo = TempDir::new().expect("repo");

    squad_cmd(home.path())
        .args(["orchestrate", "goal", "--yes", "--path"])
        .arg(repo.path())
        .arg("--plan")
        .arg(repo.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(contains("absent.yaml"));
}

#[test]
fn daemon_status_without_daemon_reports_not_running() {
    let home = TempDir::new().expect("home");
    let assert = squad_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success();
    let json: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json");
    assert_eq!(json["running"], false);
}

#[test]
fn daemon_stop_without_daemon_is_not_an_error() {
    let home = TempDir::new().expect("home");
    squad_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}

#[test]
fn daemon_logs_without_files_says_so() {
    let home = TempDir::new().expect("home");
    squad_cmd(home.path())
        .args(["daemon", "logs", "--lines", "5"])
        .assert()
        .success()
        .stdout(contains("log file not found"));
}
