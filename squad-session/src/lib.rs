//! # squad-session
//!
//! The [`Instance`] lifecycle over a tmux session and a git worktree, the
//! [`InstanceRegistry`] holding them, and the status polling tick.
//!
//! Providers sit behind the [`Backend`] traits. [`SystemBackend`] shells out
//! to tmux and git; `FakeBackend` (feature `fake`) is an in-memory stand-in.

pub mod backend;
pub mod error;
pub mod git;
pub mod instance;
pub mod poll;
pub mod registry;
pub mod runner;
pub mod tmux;

#[cfg(feature = "fake")]
pub mod fake;

pub use backend::{Backend, Probe, Session, SystemBackend, Worktree, WorktreeRef};
pub use error::ProviderError;
pub use instance::{Instance, InstanceOptions};
pub use poll::{poll_all, poll_instance, PollReport};
pub use registry::{lock, InstanceRegistry, PollTarget, SharedInstance};
pub use runner::{CommandRunner, ProcessCommandRunner};

#[cfg(feature = "fake")]
pub use fake::{FakeBackend, Script};
