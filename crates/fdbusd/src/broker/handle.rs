//! Handle to a broker running on its own thread.

use std::thread::JoinHandle;

use fdbus_config::SocketPath;

use super::{ShutdownReport, ShutdownToken};
use crate::BrokerError;

/// Controls a broker started with [`super::Broker::start`].
///
/// Dropping the handle requests shutdown but does not wait for it.
#[derive(Debug)]
pub struct BrokerHandle {
    token: ShutdownToken,
    socket_path: SocketPath,
    thread: Option<JoinHandle<Result<ShutdownReport, BrokerError>>>,
}

impl BrokerHandle {
    pub(super) fn new(
        token: ShutdownToken,
        socket_path: SocketPath,
        thread: JoinHandle<Result<ShutdownReport, BrokerError>>,
    ) -> Self {
        Self {
            token,
            socket_path,
            thread: Some(thread),
        }
    }

    /// Requests shutdown; the loop stops within one poll interval.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Token that stops this broker when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.token.clone()
    }

    /// Path the broker is listening on.
    #[must_use]
    pub const fn socket_path(&self) -> &SocketPath {
        &self.socket_path
    }

    /// Waits for the broker thread to finish its shutdown sequence.
    ///
    /// # Errors
    ///
    /// Returns the loop's fatal error, or [`BrokerError::ThreadPanic`] when
    /// the thread panicked.
    pub fn join(mut self) -> Result<ShutdownReport, BrokerError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| BrokerError::ThreadPanic)?,
            None => Ok(ShutdownReport::default()),
        }
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
