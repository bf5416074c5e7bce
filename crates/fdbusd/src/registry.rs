//! Registry of connected clients.
//!
//! The registry is the only source of truth for "who is connected". Keys are
//! broker-assigned [`ClientId`]s drawn from a counter that never rewinds, so
//! an identifier cannot be reissued even when the OS recycles the numeric
//! value of a closed socket handle.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use fdbus_wire::{Channel, ClientId};

use crate::BrokerError;

/// A registered client and its live connection.
#[derive(Debug)]
pub struct ClientConnection {
    id: ClientId,
    handle: RawFd,
    channel: Channel,
}

impl ClientConnection {
    /// Broker-assigned identifier.
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Numeric OS handle, for diagnostics only.
    #[must_use]
    pub const fn raw_handle(&self) -> RawFd {
        self.handle
    }

    /// Framed connection to the client.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Releases the connection so it can be closed explicitly.
    #[must_use]
    pub fn into_stream(self) -> UnixStream {
        self.channel.into_stream()
    }
}

/// Connected clients keyed by identifier.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientConnection>,
    next_id: u64,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    /// Creates an empty registry whose first identifier is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers an accepted connection and returns its new identifier.
    ///
    /// Sends on the connection never wait: a client whose receive buffer is
    /// full fails the send instead of stalling the caller.
    pub fn add(&mut self, stream: UnixStream) -> ClientId {
        let id = ClientId::new(self.next_id);
        self.next_id += 1;
        let connection = ClientConnection {
            id,
            handle: stream.as_raw_fd(),
            channel: Channel::new(stream).with_nonblocking_sends(),
        };
        self.clients.insert(id, connection);
        id
    }

    /// Removes a client, handing its connection back to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownClient`] when `id` is not registered.
    pub fn remove(&mut self, id: ClientId) -> Result<ClientConnection, BrokerError> {
        self.clients
            .remove(&id)
            .ok_or(BrokerError::UnknownClient { id })
    }

    /// Looks up a client.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownClient`] when `id` is not registered.
    pub fn get(&self, id: ClientId) -> Result<&ClientConnection, BrokerError> {
        self.clients.get(&id).ok_or(BrokerError::UnknownClient { id })
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Snapshot of registered identifiers in ascending order.
    #[must_use]
    pub fn enumerate(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Removes every client, returning their connections.
    pub fn drain(&mut self) -> Vec<ClientConnection> {
        self.clients.drain().map(|(_, connection)| connection).collect()
    }
}
