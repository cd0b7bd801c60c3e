use std::fs;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};

use squad_core::config::load_config_at;
use squad_core::storage::{instances_path_at, load_instances_at, squad_root};
use squad_core::{Config, InstanceSnapshot, Status};
use squad_session::{
    lock, poll_all, Backend, Instance, InstanceRegistry, PollReport, PollTarget, SystemBackend,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{logs_dir, socket_path, stderr_log_path, stdout_log_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

const ROTATION_INTERVAL: Duration = Duration::from_secs(5);

/// Counters of the most recent polling tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSummary {
    pub at_unix: u64,
    pub polled: usize,
    pub idle: usize,
    pub busy: usize,
    pub timed_out: usize,
    pub failed: usize,
}

impl TickSummary {
    fn from_report(report: &PollReport) -> Self {
        Self {
            at_unix: unix_seconds_now(),
            polled: report.polled.len(),
            idle: report.idle.len(),
            busy: report.busy.len(),
            timed_out: report.timed_out.len(),
            failed: report.failed.len(),
        }
    }
}

struct DaemonState {
    registry: InstanceRegistry,
    ticks: u64,
    last_tick: Option<TickSummary>,
}

/// Start the daemon on a fresh runtime and block until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    ensure_runtime_dirs(home)?;
    init_tracing(home);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon against tmux and git.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = load_config_at(&home)?;
    let backend: Arc<dyn Backend> = Arc::new(SystemBackend::new(&home, &config));
    run_with(home, config, backend).await
}

/// Run the daemon with an explicit backend until `stop` or Ctrl-C.
pub async fn run_with(
    home: PathBuf,
    config: Config,
    backend: Arc<dyn Backend>,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let started_at_unix = unix_seconds_now();
    let state = Arc::new(RwLock::new(DaemonState {
        registry: InstanceRegistry::new(config.global_instance_limit),
        ticks: 0,
        last_tick: None,
    }));
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let poller_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = poller_task(home, config, backend, state, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                state,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move { log_rotation_task(home, shutdown.subscribe()).await })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, shutting down daemon");
                        let _ = shutdown.send(());
                        Ok(())
                    }
                    Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                }
            }
        })
    };

    tracing::info!(home = %home.display(), "daemon started");
    let (poller_result, socket_result, rotation_result, signal_result) =
        tokio::join!(poller_handle, socket_handle, rotation_handle, signal_handle);

    handle_join("poller", poller_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Tracks the modification time of `instances.yaml`.
struct SnapshotWatch {
    path: PathBuf,
    seen: Option<Option<SystemTime>>,
}

impl SnapshotWatch {
    fn new(home: &Path) -> Self {
        Self {
            path: instances_path_at(home),
            seen: None,
        }
    }

    /// True on the first call and whenever the file's mtime changed.
    fn changed(&mut self) -> bool {
        let current = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        if self.seen == Some(current) {
            return false;
        }
        self.seen = Some(current);
        true
    }
}

async fn poller_task(
    home: PathBuf,
    config: Config,
    backend: Arc<dyn Backend>,
    state: Arc<RwLock<DaemonState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut watch = SnapshotWatch::new(&home);
    let mut interval = tokio::time::interval(config.poll_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let budget = config.probe_timeout();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                if watch.changed() {
                    reload(&home, &config, &backend, &state).await;
                }
                let targets = state.read().await.registry.poll_targets();
                let report = poll_all(targets, budget).await;
                let mut guard = state.write().await;
                guard.ticks += 1;
                guard.last_tick = Some(TickSummary::from_report(&report));
            }
        }
    }
    Ok(())
}

/// Replace the registry with the current snapshot file. A load failure keeps
/// the previous registry.
async fn reload(
    home: &Path,
    config: &Config,
    backend: &Arc<dyn Backend>,
    state: &Arc<RwLock<DaemonState>>,
) {
    let previous = state.read().await.registry.poll_targets();
    let home = home.to_path_buf();
    let backend = Arc::clone(backend);
    let limit = config.global_instance_limit;
    let joined = tokio::task::spawn_blocking(move || {
        load_instances_at(&home).map(|snapshots| reconcile(previous, snapshots, backend, limit))
    })
    .await;
    match joined {
        Ok(Ok(registry)) => {
            tracing::info!(instances = registry.len(), "instance snapshot reloaded");
            state.write().await.registry = registry;
        }
        Ok(Err(err)) => tracing::warn!(error = %err, "failed to reload instance snapshot"),
        Err(err) => tracing::error!(error = %err, "snapshot reload task failed"),
    }
}

/// Build the registry for `snapshots`, keeping instances from `previous`
/// that are still bound the way their record says, and re-binding the rest.
pub(crate) fn reconcile(
    previous: Vec<PollTarget>,
    snapshots: Vec<InstanceSnapshot>,
    backend: Arc<dyn Backend>,
    limit: usize,
) -> InstanceRegistry {
    let mut registry = InstanceRegistry::new(limit);
    for snapshot in snapshots {
        if snapshot.status == Status::Killed {
            continue;
        }
        let kept = previous
            .iter()
            .find(|t| t.title == snapshot.title)
            .filter(|t| {
                let existing = lock(&t.instance);
                existing.branch() == snapshot.branch
                    && existing.status().is_live() == snapshot.status.is_live()
                    && existing.is_bound() == snapshot.status.is_live()
            })
            .map(|t| Arc::clone(&t.instance));

        let instance = match kept {
            Some(instance) => instance,
            None => {
                let mut fresh = Instance::from_snapshot(snapshot, Arc::clone(&backend));
                if fresh.status().is_live() {
                    if let Err(err) = fresh.start(false) {
                        tracing::warn!(title = %fresh.title(), error = %err, "failed to re-bind instance");
                    }
                }
                Arc::new(std::sync::Mutex::new(fresh))
            }
        };
        if let Err(err) = registry.adopt(instance) {
            tracing::warn!(error = %err, "instance record skipped");
        }
    }
    registry
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    home: PathBuf,
    state: Arc<RwLock<DaemonState>>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_socket_client(stream, home, state, shutdown_tx, started_at_unix).await
                    {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    state: Arc<RwLock<DaemonState>>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request {
            DaemonRequest::Status => {
                DaemonResponse::ok(build_status_payload(&home, &state, started_at_unix).await)
            }
            DaemonRequest::Stop => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
        };
        write_response(&mut writer, &response).await?;
        if request == DaemonRequest::Stop {
            break;
        }
    }
    Ok(())
}

async fn build_status_payload(
    home: &Path,
    state: &Arc<RwLock<DaemonState>>,
    started_at_unix: u64,
) -> Value {
    let (targets, ticks, last_tick) = {
        let guard = state.read().await;
        (
            guard.registry.poll_targets(),
            guard.ticks,
            guard.last_tick.clone(),
        )
    };

    // Instances locked by an in-flight probe are reported without details.
    let instances: Vec<Value> = targets
        .iter()
        .map(|target| match target.instance.try_lock() {
            Ok(instance) => json!({
                "title": instance.title(),
                "status": instance.status(),
                "branch": instance.branch(),
                "active": instance.is_active(),
                "added": instance.diff_stats().added,
                "removed": instance.diff_stats().removed,
            }),
            Err(_) => json!({ "title": target.title, "busy": true }),
        })
        .collect();

    json!({
        "running": true,
        "started_at_unix": started_at_unix,
        "ticks": ticks,
        "last_tick": last_tick,
        "instances": instances,
        "socket": socket_path(home).display().to_string(),
        "squad_root": squad_root(home).display().to_string(),
    })
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(ROTATION_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                // Failures are logged by rotate_logs.
                let _ = tokio::task::spawn_blocking(move || crate::log_rotation::rotate_logs(&home)).await;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }
    if StdUnixStream::connect(socket).is_ok() {
        return Err(DaemonError::Protocol(format!(
            "daemon socket already in use: {}",
            socket.display()
        )));
    }
    tracing::warn!(socket = %socket.display(), "removing stale daemon socket before bind");
    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    squad_core::storage::ensure_root_at(home)?;
    let logs = logs_dir(home);
    if !logs.exists() {
        fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Everything goes to `daemon.log`; warnings and errors also to `daemon-err.log`.
fn init_tracing(home: &Path) {
    use tracing_subscriber::fmt::writer::MakeWriterExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let all = LogFile(stdout_log_path(home));
    let errors = LogFile(stderr_log_path(home)).with_max_level(tracing::Level::WARN);
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(all.and(errors))
        .try_init();
}

/// Appends to a log file, reopened per event so rotation takes effect.
struct LogFile(PathBuf);

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFile {
    type Writer = Box<dyn std::io::Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        match fs::OpenOptions::new().create(true).append(true).open(&self.0) {
            Ok(file) => Box::new(file),
            Err(_) => Box::new(std::io::sink()),
        }
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use squad_core::storage::save_instances_at;
    use squad_session::{FakeBackend, InstanceOptions};
    use tempfile::TempDir;

    fn started(backend: &FakeBackend, title: &str) -> Instance {
        let shared: Arc<dyn Backend> = Arc::new(backend.clone());
        let mut instance = Instance::new(
            InstanceOptions {
                title: title.to_string(),
                base_path: PathBuf::from("/repo"),
                program: "claude".to_string(),
                auto_yes: false,
            },
            shared,
        )
        .expect("new");
        instance.start(true).expect("start");
        instance
    }

    #[test]
    fn snapshot_watch_reports_first_and_changed_mtime() {
        let home = TempDir::new().expect("home");
        let mut watch = SnapshotWatch::new(home.path());
        assert!(watch.changed(), "first check always loads");
        assert!(!watch.changed());

        save_instances_at(home.path(), &[]).expect("save");
        assert!(watch.changed(), "file appeared");
        assert!(!watch.changed());
    }

    #[test]
    fn reconcile_rebinds_live_records_and_leaves_paused_ones() {
        let fake = FakeBackend::new();
        let running = started(&fake, "running");
        let mut paused = started(&fake, "paused");
        paused.pause().expect("pause");
        let mut killed = started(&fake, "killed");
        killed.kill().expect("kill");
        let snapshots = vec![running.snapshot(), paused.snapshot(), killed.snapshot()];

        let backend: Arc<dyn Backend> = Arc::new(fake.clone());
        let registry = reconcile(Vec::new(), snapshots, backend, 10);

        assert_eq!(registry.titles(), vec!["running", "paused"]);
        assert!(lock(&registry.get("running").expect("running")).is_active());
        let paused = registry.get("paused").expect("paused");
        assert!(!lock(&paused).is_bound());
        assert_eq!(lock(&paused).status(), Status::Paused);
    }

    #[test]
    fn reconcile_keeps_bound_instances_across_reloads() {
        let fake = FakeBackend::new();
        let snapshot = started(&fake, "steady").snapshot();
        let backend: Arc<dyn Backend> = Arc::new(fake.clone());

        let first = reconcile(Vec::new(), vec![snapshot.clone()], Arc::clone(&backend), 10);
        let before = first.get("steady").expect("steady");
        let second = reconcile(first.poll_targets(), vec![snapshot], backend, 10);
        let after = second.get("steady").expect("steady");

        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn reconcile_tolerates_vanished_sessions() {
        let fake = FakeBackend::new();
        let snapshot = started(&fake, "ghost").snapshot();
        fake.drop_session("ghost");

        let backend: Arc<dyn Backend> = Arc::new(fake.clone());
        let registry = reconcile(Vec::new(), vec![snapshot], backend, 10);
        let ghost = registry.get("ghost").expect("kept");
        assert!(lock(&ghost).is_dormant());
    }
}
