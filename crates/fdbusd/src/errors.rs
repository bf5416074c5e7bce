//! Error taxonomy for broker operations.

use std::io;
use std::os::fd::IntoRawFd;

use thiserror::Error;

use fdbus_wire::{ClientId, TransferError};

use crate::broker::BrokerPhase;

/// Errors surfaced by the broker, its registry, and its descriptor pool.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Creating or binding the listening socket failed.
    #[error("failed to bind broker socket at {path}: {source}")]
    Bind {
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Marking the bound socket as listening failed.
    #[error("failed to listen on broker socket at {path}: {source}")]
    Listen {
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Accepting a pending connection failed.
    #[error("failed to accept client connection: {source}")]
    Accept {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The readiness wait itself failed.
    #[error("readiness wait failed: {source}")]
    Poll {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Receiving from a client failed.
    #[error("failed to receive from client {client}: {source}")]
    Recv {
        /// Client on the other end of the transfer.
        client: ClientId,
        /// Underlying error.
        #[source]
        source: TransferError,
    },
    /// Sending to a client failed.
    #[error("failed to send to client {client}: {source}")]
    Send {
        /// Client on the other end of the transfer.
        client: ClientId,
        /// Underlying error.
        #[source]
        source: TransferError,
    },
    /// Removing the socket file failed.
    #[error("failed to remove broker socket {path}: {source}")]
    Unlink {
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Closing a handle failed.
    #[error("failed to close {handle}: {source}")]
    Close {
        /// Description of the handle.
        handle: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// No registered client carries the identifier.
    #[error("unknown client {id}")]
    UnknownClient {
        /// Identifier that was looked up.
        id: ClientId,
    },
    /// The client has no pooled descriptor under the name.
    #[error("client {owner} has no descriptor named '{name}'")]
    UnknownDescriptor {
        /// Client the lookup was scoped to.
        owner: ClientId,
        /// Descriptor name.
        name: String,
    },
    /// The readiness wait would never time out.
    #[error("poll interval must be greater than zero")]
    InvalidPollInterval,
    /// An operation required a listening socket.
    #[error("broker is {phase}; no listening socket is available")]
    NotListening {
        /// Phase the broker was in.
        phase: BrokerPhase,
    },
    /// The reactor thread could not be spawned.
    #[error("failed to spawn broker thread: {source}")]
    Spawn {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The reactor thread panicked.
    #[error("broker thread panicked")]
    ThreadPanic,
}

impl BrokerError {
    /// Creates an unknown descriptor error.
    pub fn unknown_descriptor(owner: ClientId, name: impl Into<String>) -> Self {
        Self::UnknownDescriptor {
            owner,
            name: name.into(),
        }
    }

    /// Returns `true` for failures caused by the peer hanging up.
    #[must_use]
    pub fn is_hangup(&self) -> bool {
        matches!(
            self,
            Self::Recv {
                source: TransferError::Closed,
                ..
            }
        )
    }
}

/// Closes `handle` explicitly so the failure can be reported.
pub(crate) fn close_handle(
    handle: impl IntoRawFd,
    label: impl Into<String>,
) -> Result<(), BrokerError> {
    nix::unistd::close(handle.into_raw_fd()).map_err(|errno| BrokerError::Close {
        handle: label.into(),
        source: io::Error::from(errno),
    })
}
