//! Entry point for the fdbus broker daemon.

use std::process::ExitCode;

fn main() -> ExitCode {
    if fdbusd::run_daemon().is_ok_and(|report| report.is_clean()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
