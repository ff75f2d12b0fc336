//! Tracing initialisation
//!
//! Installs the global `tracing` subscriber used by the daemon: human-readable output
//! by default, JSON lines when requested.

mod init_basic;

pub use init_basic::{init_telemetry, shutdown_telemetry};
