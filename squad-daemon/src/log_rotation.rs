//! Size-based rotation of the daemon log files.
//!
//! `daemon.log` → `daemon.log.1` → … → `daemon.log.<keep>`; the oldest
//! generation is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::paths::{stderr_log_path, stdout_log_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    /// Rotated generations kept next to the live file.
    pub keep: usize,
}

impl Default for RotationPolicy {
    /// 10 MiB, five generations.
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            keep: 5,
        }
    }
}

/// Rotate `log_path` once it reaches `policy.max_bytes`.
///
/// Returns whether a rotation happened. A missing file is not an error.
pub fn rotate_if_needed(log_path: &Path, policy: RotationPolicy) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < policy.max_bytes || policy.keep == 0 {
        return Ok(false);
    }

    let oldest = generation(log_path, policy.keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..policy.keep).rev() {
        let from = generation(log_path, n);
        if from.exists() {
            fs::rename(&from, generation(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, generation(log_path, 1))?;
    fs::File::create(log_path)?;
    Ok(true)
}

/// Rotate both daemon logs under `home`; failures are logged, not returned.
pub fn rotate_logs(home: &Path) {
    for path in [stdout_log_path(home), stderr_log_path(home)] {
        match rotate_if_needed(&path, RotationPolicy::default()) {
            Ok(true) => tracing::info!(path = %path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "log rotation failed"),
        }
    }
}

fn generation(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SMALL: RotationPolicy = RotationPolicy {
        max_bytes: 16,
        keep: 3,
    };

    #[test]
    fn small_file_is_left_alone() {
        let dir = TempDir::new().expect("dir");
        let log = dir.path().join("daemon.log");
        fs::write(&log, "short").expect("write");

        assert!(!rotate_if_needed(&log, SMALL).expect("rotate"));
        assert!(!generation(&log, 1).exists());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = TempDir::new().expect("dir");
        assert!(!rotate_if_needed(&dir.path().join("none.log"), SMALL).expect("rotate"));
    }

    #[test]
    fn oversized_file_moves_to_first_generation() {
        let dir = TempDir::new().expect("dir");
        let log = dir.path().join("daemon.log");
        fs::write(&log, "x".repeat(32)).expect("write");

        assert!(rotate_if_needed(&log, SMALL).expect("rotate"));
        assert_eq!(fs::metadata(&log).expect("live").len(), 0);
        assert_eq!(
            fs::read_to_string(generation(&log, 1)).expect("gen 1"),
            "x".repeat(32)
        );
    }

    #[test]
    fn generations_shift_and_oldest_is_dropped() {
        let dir = TempDir::new().expect("dir");
        let log = dir.path().join("daemon.log");

        for round in 1..=4 {
            fs::write(&log, format!("round-{round}-{}", "y".repeat(16))).expect("write");
            rotate_if_needed(&log, SMALL).expect("rotate");
        }

        assert!(fs::read_to_string(generation(&log, 1))
            .expect("gen 1")
            .starts_with("round-4"));
        assert!(fs::read_to_string(generation(&log, 3))
            .expect("gen 3")
            .starts_with("round-2"));
        assert!(!generation(&log, 4).exists());
    }

    #[test]
    fn default_policy_is_ten_mib_five_files() {
        let policy = RotationPolicy::default();
        assert_eq!(policy.max_bytes, 10 * 1024 * 1024);
        assert_eq!(policy.keep, 5);
    }
}
