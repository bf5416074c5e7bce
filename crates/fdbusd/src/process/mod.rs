//! Process wiring for the `fdbusd` binary.

mod errors;
mod launch;
mod signals;

pub use errors::LaunchError;
pub use launch::{run_daemon, run_daemon_with};
pub use signals::{ShutdownError, ShutdownSignal, SignalWatch, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
