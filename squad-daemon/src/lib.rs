//! Background poller for squad instances.
//!
//! The daemon watches `~/.squad/instances.yaml`, keeps every recorded
//! instance's status current, and answers `status` and `stop` requests on a
//! Unix socket.

mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{request_status, request_stop, send_request, DaemonRequest, DaemonResponse};
pub use runtime::{run, run_with, start_blocking, TickSummary};
