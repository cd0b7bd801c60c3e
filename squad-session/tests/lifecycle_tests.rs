use std::path::PathBuf;
use std::sync::Arc;

use rstest::rstest;
use squad_core::{SquadError, Status};
use squad_session::{Backend, FakeBackend, Instance, InstanceOptions, Script};

fn options(title: &str) -> InstanceOptions {
    InstanceOptions {
        title: title.to_string(),
        base_path: PathBuf::from("/repo"),
        program: "claude".to_string(),
        auto_yes: false,
    }
}

fn started(backend: &FakeBackend, title: &str) -> Instance {
    let shared: Arc<dyn Backend> = Arc::new(backend.clone());
    let mut instance = Instance::new(options(title), shared).expect("new instance");
    instance.start(true).expect("start");
    instance
}

#[test]
fn start_provisions_session_and_branch() {
    let backend = FakeBackend::new();
    let instance = started(&backend, "Login Page");

    assert_eq!(instance.status(), Status::Running);
    assert_eq!(instance.branch(), "squad/login-page");
    assert!(instance.is_active());
    assert!(instance.base_commit().is_some());
    assert!(backend.session_exists("Login Page"));
    assert!(backend.worktree_attached("squad/login-page"));
}

#[test]
fn start_twice_is_rejected() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "twice");

    let err = instance.start(true).expect_err("second start");
    assert!(matches!(err, SquadError::InvalidState { op: "start", .. }));
    assert_eq!(backend.live_sessions(), 1);
}

#[test]
fn colliding_title_fails_to_provision() {
    let backend = FakeBackend::new();
    let _first = started(&backend, "auth");

    let shared: Arc<dyn Backend> = Arc::new(backend.clone());
    let mut second = Instance::new(options("auth"), shared).expect("new");
    let err = second.start(true).expect_err("branch already exists");

    assert!(matches!(err, SquadError::Provision { .. }));
    assert_eq!(second.status(), Status::NotStarted);
    assert_eq!(backend.live_sessions(), 1);
}

#[test]
fn failed_session_start_removes_the_new_worktree() {
    let backend = FakeBackend::new();
    backend.script(
        "broken",
        Script {
            fail_start: true,
            ..Default::default()
        },
    );
    let shared: Arc<dyn Backend> = Arc::new(backend.clone());
    let mut instance = Instance::new(options("broken"), shared).expect("new");

    let err = instance.start(true).expect_err("session start fails");
    assert!(matches!(err, SquadError::Provision { .. }));
    assert_eq!(instance.status(), Status::NotStarted);
    assert!(!backend.branch_exists("squad/broken"));
}

#[test]
fn empty_title_cannot_start() {
    let backend: Arc<dyn Backend> = Arc::new(FakeBackend::new());
    let mut instance = Instance::new(options(""), backend).expect("empty title is accepted while typing");

    let err = instance.start(true).expect_err("empty title");
    assert!(matches!(err, SquadError::InvalidTitle { .. }));
}

#[rstest]
#[case(32, true)]
#[case(33, false)]
fn title_length_limit(#[case] len: usize, #[case] ok: bool) {
    let backend: Arc<dyn Backend> = Arc::new(FakeBackend::new());
    let mut instance = Instance::new(options("draft"), backend).expect("new");

    let result = instance.set_title(&"t".repeat(len));
    assert_eq!(result.is_ok(), ok);
    if !ok {
        assert!(matches!(result, Err(SquadError::InvalidTitle { .. })));
        assert_eq!(instance.title(), "draft");
    }
}

#[test]
fn title_is_frozen_after_start() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "frozen");

    let err = instance.set_title("renamed").expect_err("rename after start");
    assert!(matches!(err, SquadError::InvalidState { op: "rename", .. }));
    assert_eq!(instance.title(), "frozen");
}

#[test]
fn prompt_shows_up_in_diff_stats() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "health");

    instance
        .send_prompt("add a /health endpoint\nreturn 200")
        .expect("send");
    instance.update_diff_stats().expect("diff");

    let stats = instance.diff_stats();
    assert_eq!(stats.added, 2);
    assert_eq!(stats.removed, 0);
    assert!(stats.content.contains("+add a /health endpoint"));
}

#[test]
fn pause_then_resume_preserves_work() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "feature");
    instance.send_prompt("write the parser").expect("send");

    instance.pause().expect("pause");
    assert_eq!(instance.status(), Status::Paused);
    assert!(!instance.is_bound());
    assert!(!backend.session_exists("feature"));
    assert!(!backend.worktree_attached("squad/feature"));
    assert!(backend.branch_exists("squad/feature"));
    assert_eq!(
        backend.committed("squad/feature").get("feature.txt").map(String::as_str),
        Some("write the parser\n")
    );

    instance.resume().expect("resume");
    assert_eq!(instance.status(), Status::Running);
    assert!(instance.is_active());
    assert!(backend.session_exists("feature"));
    assert_eq!(
        backend.files("squad/feature").get("feature.txt").map(String::as_str),
        Some("write the parser\n")
    );
}

#[test]
fn failed_session_close_leaves_the_instance_running() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "sticky");
    instance.send_prompt("draft the schema").expect("send");
    backend.script(
        "sticky",
        Script {
            fail_close: true,
            ..Default::default()
        },
    );

    let err = instance.pause().expect_err("close fails");
    assert!(matches!(err, SquadError::Session { .. }));
    assert_eq!(instance.status(), Status::Running);
    assert!(instance.is_active());
    assert!(backend.session_exists("sticky"));
    assert!(backend.worktree_attached("squad/sticky"));
    assert_eq!(
        backend.files("squad/sticky").get("sticky.txt").map(String::as_str),
        Some("draft the schema\n")
    );

    backend.script("sticky", Script::default());
    instance.pause().expect("pause once the session can be closed");
    assert_eq!(instance.status(), Status::Paused);
    assert!(!backend.session_exists("sticky"));
}

#[test]
fn pause_and_resume_are_state_checked() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "states");

    let err = instance.resume().expect_err("resume while running");
    assert!(matches!(err, SquadError::InvalidState { op: "resume", .. }));

    instance.pause().expect("pause");
    let err = instance.pause().expect_err("pause twice");
    assert!(matches!(err, SquadError::InvalidState { op: "pause", .. }));
    assert_eq!(instance.status(), Status::Paused);
}

#[test]
fn checked_out_branch_blocks_pause_and_kill() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "guarded");
    backend.set_checked_out(Some("squad/guarded"));

    let err = instance.pause().expect_err("pause conflicts");
    assert!(matches!(err, SquadError::Conflict { ref branch, .. } if branch == "squad/guarded"));
    assert_eq!(instance.status(), Status::Running);
    assert!(instance.is_bound());

    let err = instance.kill().expect_err("kill conflicts");
    assert!(matches!(err, SquadError::Conflict { .. }));
    assert_eq!(instance.status(), Status::Running);
    assert!(backend.session_exists("guarded"));

    backend.set_checked_out(None);
    instance.pause().expect("pause once the operator switched away");
    assert_eq!(instance.status(), Status::Paused);
}

#[test]
fn checked_out_branch_blocks_resume() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "resume-guard");
    instance.pause().expect("pause");
    backend.set_checked_out(Some("squad/resume-guard"));

    let err = instance.resume().expect_err("resume conflicts");
    assert!(matches!(err, SquadError::Conflict { .. }));
    assert_eq!(instance.status(), Status::Paused);
    assert!(!backend.session_exists("resume-guard"));
}

#[test]
fn kill_removes_everything() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "doomed");

    instance.kill().expect("kill");
    assert_eq!(instance.status(), Status::Killed);
    assert!(!backend.session_exists("doomed"));
    assert!(!backend.branch_exists("squad/doomed"));

    let err = instance.kill().expect_err("already killed");
    assert!(matches!(err, SquadError::InvalidState { op: "kill", .. }));
}

#[test]
fn kill_paused_instance_deletes_branch() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "parked");
    instance.pause().expect("pause");

    instance.kill().expect("kill");
    assert_eq!(instance.status(), Status::Killed);
    assert!(!backend.branch_exists("squad/parked"));
}

#[test]
fn operations_on_paused_instance_are_rejected() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "asleep");
    instance.pause().expect("pause");

    assert!(matches!(
        instance.send_prompt("hello"),
        Err(SquadError::InvalidState { .. })
    ));
    assert!(matches!(
        instance.has_updated(),
        Err(SquadError::InvalidState { .. })
    ));
    assert!(instance.preview().is_err());
    assert!(matches!(
        instance.push_changes("msg", true),
        Err(SquadError::InvalidState { op: "push", .. })
    ));
}

#[test]
fn push_commits_and_records_the_branch() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "shipit");
    instance.send_prompt("ship it").expect("send");

    let message = instance.default_push_message();
    assert!(message.starts_with("[squad] update from 'shipit' on "));
    instance.push_changes(&message, true).expect("push");
    instance.push_changes(&message, true).expect("push again");

    let pushes = backend.pushes();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0].0, "squad/shipit");
    assert!(backend.committed("squad/shipit").contains_key("shipit.txt"));
}

#[test]
fn tap_enter_requires_auto_yes() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "careful");

    instance.tap_enter().expect("no-op");
    assert_eq!(backend.taps("careful"), 0);

    instance.set_auto_yes(true);
    instance.tap_enter().expect("tap");
    assert_eq!(backend.taps("careful"), 1);
}

// ---------------------------------------------------------------------------
// Reconstruction
// ---------------------------------------------------------------------------

#[test]
fn dormant_instance_rebinds_to_surviving_resources() {
    let backend = FakeBackend::new();
    let instance = started(&backend, "survivor");
    let snapshot = instance.snapshot();
    drop(instance);

    let shared: Arc<dyn Backend> = Arc::new(backend.clone());
    let mut restored = Instance::from_snapshot(snapshot, shared);
    assert!(restored.is_dormant());
    assert!(!restored.is_active());
    assert_eq!(restored.status(), Status::Running);

    restored.start(false).expect("rebind");
    assert!(restored.is_active());
    assert_eq!(restored.status(), Status::Running);
    assert_eq!(backend.live_sessions(), 1);
}

#[test]
fn dormant_instance_with_dead_session_is_resumed() {
    let backend = FakeBackend::new();
    let instance = started(&backend, "orphan");
    let snapshot = instance.snapshot();
    drop(instance);
    backend.drop_session("orphan");

    let shared: Arc<dyn Backend> = Arc::new(backend.clone());
    let mut restored = Instance::from_snapshot(snapshot, shared);
    let err = restored.start(false).expect_err("session is gone");
    assert!(matches!(err, SquadError::Provision { .. }));
    assert!(restored.is_dormant());

    restored.resume().expect("resume re-provisions the session");
    assert!(restored.is_active());
    assert!(backend.session_exists("orphan"));
}

#[test]
fn paused_snapshot_stays_paused_on_rebind() {
    let backend = FakeBackend::new();
    let mut instance = started(&backend, "napping");
    instance.pause().expect("pause");
    let snapshot = instance.snapshot();

    let shared: Arc<dyn Backend> = Arc::new(backend.clone());
    let mut restored = Instance::from_snapshot(snapshot, shared);
    restored.start(false).expect("paused rebind is a no-op");
    assert_eq!(restored.status(), Status::Paused);
    assert!(!restored.is_bound());

    restored.resume().expect("resume");
    assert_eq!(restored.status(), Status::Running);
}
