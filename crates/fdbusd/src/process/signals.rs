//! Bridges process termination signals to the broker's shutdown token.

use std::fmt;
use std::io;
use std::thread::{self, JoinHandle};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;
use crate::broker::ShutdownToken;

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Arranges for `token` to be cancelled when shutdown should proceed.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the watcher cannot be installed.
    fn watch(&self, token: ShutdownToken) -> Result<SignalWatch, ShutdownError>;
}

/// Errors reported by shutdown signal watchers.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Spawning the watcher thread failed.
    #[error("failed to spawn signal watcher: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Keeps a signal watcher alive; dropping it stops the watcher.
#[derive(Default)]
pub struct SignalWatch {
    handle: Option<Handle>,
    thread: Option<JoinHandle<()>>,
}

impl SignalWatch {
    /// A watch with nothing to stop, for watchers that act immediately.
    #[must_use]
    pub fn inert() -> Self {
        Self::default()
    }
}

impl fmt::Debug for SignalWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalWatch")
            .field("active", &self.thread.is_some())
            .finish()
    }
}

impl Drop for SignalWatch {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        if let Some(thread) = self.thread.take() {
            // The watcher thread only logs and cancels; a panic there has
            // nothing left to clean up.
            drop(thread.join());
        }
    }
}

/// Watches SIGTERM, SIGINT, SIGQUIT, and SIGHUP on a dedicated thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn watch(&self, token: ShutdownToken) -> Result<SignalWatch, ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("fdbusd-signals".to_owned())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(target: PROCESS_TARGET, signal, "shutdown signal received");
                    token.cancel();
                }
            })
            .map_err(|source| ShutdownError::Spawn { source })?;
        Ok(SignalWatch {
            handle: Some(handle),
            thread: Some(thread),
        })
    }
}
