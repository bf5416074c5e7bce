//! Defines the error surface for launching the broker process.

use thiserror::Error;

use crate::BrokerError;
use crate::bootstrap::BootstrapError;

use super::signals::ShutdownError;

/// Errors surfaced while launching or supervising the broker.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration, telemetry, or socket directory setup failed.
    #[error("broker bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// Installing the shutdown watcher failed.
    #[error("failed to watch for shutdown signals: {source}")]
    Shutdown {
        /// Underlying watcher error.
        #[source]
        source: ShutdownError,
    },
    /// Binding, running, or joining the broker failed.
    #[error("broker failed: {source}")]
    Broker {
        /// Underlying broker error.
        #[source]
        source: BrokerError,
    },
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

impl From<BrokerError> for LaunchError {
    fn from(source: BrokerError) -> Self {
        Self::Broker { source }
    }
}
