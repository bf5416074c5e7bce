//! Supervises broker launch sequencing.

use tracing::{error, info, warn};

use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::broker::{Broker, BrokerSettings, ShutdownReport};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::signals::{ShutdownSignal, SystemShutdownSignal};

/// Runs the broker with the production collaborators.
///
/// # Errors
///
/// See [`run_daemon_with`].
pub fn run_daemon() -> Result<ShutdownReport, LaunchError> {
    run_daemon_with(&SystemConfigLoader, &SystemShutdownSignal)
}

/// Runs the broker with injected collaborators until `signal` fires.
///
/// # Errors
///
/// Returns bootstrap, signal installation, bind, and fatal loop failures.
/// Cleanup failures during shutdown are reported in the returned
/// [`ShutdownReport`] instead.
pub fn run_daemon_with(
    loader: &dyn ConfigLoader,
    signal: &dyn ShutdownSignal,
) -> Result<ShutdownReport, LaunchError> {
    launch(loader, signal).inspect_err(|failure| {
        error!(target: PROCESS_TARGET, error = %failure, "broker launch failed");
    })
}

fn launch(
    loader: &dyn ConfigLoader,
    signal: &dyn ShutdownSignal,
) -> Result<ShutdownReport, LaunchError> {
    let bootstrapped = bootstrap_with(loader)?;
    let settings = BrokerSettings::from_config(bootstrapped.config());
    info!(
        target: PROCESS_TARGET,
        socket = %settings.socket_path,
        "starting broker"
    );

    let handle = Broker::bind(settings)?.start()?;
    let watch = match signal.watch(handle.shutdown_token()) {
        Ok(watch) => watch,
        Err(error) => {
            handle.shutdown();
            if let Err(join_error) = handle.join() {
                warn!(target: PROCESS_TARGET, error = %join_error, "broker stopped uncleanly");
            }
            return Err(error.into());
        }
    };
    let outcome = handle.join();
    drop(watch);
    let report = outcome?;

    if report.is_clean() {
        info!(target: PROCESS_TARGET, "shutdown sequence completed");
    } else {
        for failure in report.failures() {
            warn!(target: PROCESS_TARGET, error = %failure, "shutdown step failed");
        }
        warn!(
            target: PROCESS_TARGET,
            failures = report.failures().len(),
            "shutdown sequence completed with failures"
        );
    }
    Ok(report)
}
