//! Shared configuration for the fdbus broker and its clients.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults, then an
//! optional TOML file (`--config-path`), then `FDBUS_*` environment
//! variables, then command-line flags. The resolved [`Config`] names the
//! broker socket, the telemetry settings, and the readiness-wait bound that
//! limits shutdown latency.

mod defaults;
mod logging;
mod socket;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LISTEN_BACKLOG, DEFAULT_LOG_FILTER, DEFAULT_POLL_INTERVAL_MS, default_log_filter,
    default_log_filter_string, default_log_format, default_socket_path,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketParseError, SocketPath, SocketPreparationError};

/// Resolved broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "FDBUS")]
pub struct Config {
    /// Filesystem path of the broker's Unix domain socket.
    #[ortho_config(default = defaults::default_socket_path())]
    pub socket_path: SocketPath,
    /// `tracing` filter expression.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Telemetry output format.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Upper bound on a single readiness wait, in milliseconds.
    #[ortho_config(default = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,
    /// Pending-connection backlog for the listening socket.
    #[ortho_config(default = DEFAULT_LISTEN_BACKLOG)]
    pub listen_backlog: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
        }
    }
}

impl Config {
    /// Socket path the broker binds.
    #[must_use]
    pub const fn socket_path(&self) -> &SocketPath {
        &self.socket_path
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Readiness-wait bound as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Backlog handed to `listen`.
    #[must_use]
    pub const fn listen_backlog(&self) -> i32 {
        self.listen_backlog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bound_the_readiness_wait_to_one_second() {
        let config = Config::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.listen_backlog(), DEFAULT_LISTEN_BACKLOG);
    }
}
