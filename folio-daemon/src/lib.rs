//! Long-running folio process: periodic build loop, audit-log rotation and
//! the ctrl-c shutdown hook.

mod error;
pub mod log_rotation;
mod runtime;

pub use error::DaemonError;
pub use runtime::{init_tracing, run, run_until, start_blocking, ROTATION_INTERVAL, SHUTDOWN_GRACE};
