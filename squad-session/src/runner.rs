//! Process execution seam shared by the tmux and git providers.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{Command, Output};

use crate::error::ProviderError;

/// Runs an external program to completion and returns its captured output.
///
/// Providers never spawn processes directly so tests can substitute a stub.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[OsString], cwd: Option<&Path>) -> io::Result<Output>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString], cwd: Option<&Path>) -> io::Result<Output> {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        command.output()
    }
}

/// Build an argument vector from anything string-like.
pub(crate) fn args<I, S>(items: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    items.into_iter().map(Into::into).collect()
}

/// Run and return the output regardless of exit status.
pub(crate) fn run_raw(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[OsString],
    cwd: Option<&Path>,
) -> Result<Output, ProviderError> {
    runner
        .run(program, args, cwd)
        .map_err(|source| ProviderError::Spawn {
            program: program.to_string(),
            source,
        })
}

/// Run and fail with [`ProviderError::CommandFailed`] on a non-zero exit.
pub(crate) fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[OsString],
    cwd: Option<&Path>,
) -> Result<Output, ProviderError> {
    let output = run_raw(runner, program, args, cwd)?;
    if output.status.success() {
        return Ok(output);
    }
    Err(command_failed(program, args, &output))
}

/// Run and return trimmed stdout.
pub(crate) fn run_stdout(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[OsString],
    cwd: Option<&Path>,
) -> Result<String, ProviderError> {
    let output = run_checked(runner, program, args, cwd)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub(crate) fn command_failed(program: &str, args: &[OsString], output: &Output) -> ProviderError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    let detail = if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        format!("exit status {}", output.status)
    };
    let rendered_args = args
        .iter()
        .map(|arg| arg.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    ProviderError::CommandFailed {
        command: format!("{program} {rendered_args}"),
        detail,
    }
}
