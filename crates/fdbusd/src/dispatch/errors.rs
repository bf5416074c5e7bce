//! Error types for message dispatch failures.

use thiserror::Error;

use fdbus_wire::{ClientId, WireError};

use crate::BrokerError;

/// What the reactor does with a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Drop the offending message; every connection stays open.
    Discard,
    /// Close the named client's connection.
    Disconnect(ClientId),
}

/// Errors surfaced while decoding and routing a client message.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The frame did not decode, or a reply could not be encoded.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The command exists but clients may not send it.
    #[error("no route for '{protocol}:{command}'")]
    NoRoute {
        /// Protocol name.
        protocol: &'static str,
        /// Command name.
        command: &'static str,
    },

    /// The argument count falls outside the command's arity.
    #[error("'{command}' expects {expected} argument(s), got {actual}")]
    Arity {
        /// Command name.
        command: &'static str,
        /// Accepted argument counts.
        expected: String,
        /// Argument count received.
        actual: usize,
    },

    /// A descriptor name argument was empty.
    #[error("'{command}' requires a non-empty descriptor name")]
    EmptyName {
        /// Command name.
        command: &'static str,
    },

    /// Registry, pool, or transport failure.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl DispatchError {
    /// Classifies the failure.
    ///
    /// Transport faults cost the faulting client its connection, which may
    /// be the target of a pass rather than the requester. Everything else
    /// only costs the message.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Broker(BrokerError::Send { client, .. } | BrokerError::Recv { client, .. }) => {
                Disposition::Disconnect(*client)
            }
            _ => Disposition::Discard,
        }
    }
}
