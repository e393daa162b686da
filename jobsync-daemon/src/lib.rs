//! jobsync daemon: one long-lived [`jobsync_sync::Orchestrator`] served as
//! newline-delimited JSON over a Unix socket, plus the blocking client the
//! CLI uses to talk to it.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_info, request_list, request_ping, request_start, request_status, request_stop,
    send_request, DaemonRequest, DaemonResponse, ErrorCode,
};
pub use runtime::{run, serve, start_blocking};
