//! Configuration loading and pre-bind preparation.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use fdbus_config::{Config, SocketPreparationError};

use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Abstracts configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the broker configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when configuration cannot be resolved.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands back a configuration resolved elsewhere.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already resolved configuration.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The socket directory could not be prepared.
    #[error("failed to prepare broker socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
}

/// Configuration and telemetry ready for binding.
#[derive(Debug)]
pub struct Bootstrapped {
    config: Config,
    telemetry: TelemetryHandle,
}

impl Bootstrapped {
    /// Resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Telemetry handle, mainly useful in tests.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }
}

/// Loads configuration, installs telemetry, and prepares the socket
/// directory.
///
/// # Errors
///
/// Returns the first failing step as a [`BootstrapError`].
pub fn bootstrap_with(loader: &dyn ConfigLoader) -> Result<Bootstrapped, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    config
        .socket_path()
        .prepare_filesystem()
        .map_err(|source| BootstrapError::Socket { source })?;
    Ok(Bootstrapped { config, telemetry })
}
