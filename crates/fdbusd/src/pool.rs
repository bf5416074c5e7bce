//! Broker-side store of descriptors loaded by clients.
//!
//! Entries are keyed by the owning client and a client-chosen name, so two
//! clients may load descriptors under the same name without colliding.

use std::collections::HashMap;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use fdbus_wire::ClientId;

use crate::BrokerError;

/// Capability contract for name-addressed descriptor storage.
pub trait DescriptorPool: Send {
    /// Stores `descriptor` under (`owner`, `name`), returning any descriptor
    /// it displaced.
    fn register(&mut self, owner: ClientId, name: &str, descriptor: OwnedFd) -> Option<OwnedFd>;

    /// Borrows the descriptor stored under (`owner`, `name`).
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownDescriptor`] when no entry exists.
    fn lookup(&self, owner: ClientId, name: &str) -> Result<BorrowedFd<'_>, BrokerError>;

    /// Removes and returns the descriptor stored under (`owner`, `name`).
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownDescriptor`] when no entry exists.
    fn remove(&mut self, owner: ClientId, name: &str) -> Result<OwnedFd, BrokerError>;

    /// Removes every descriptor owned by `owner`.
    fn release_owner(&mut self, owner: ClientId) -> Vec<(String, OwnedFd)>;

    /// Removes every descriptor.
    fn drain(&mut self) -> Vec<(ClientId, String, OwnedFd)>;

    /// Number of stored descriptors.
    fn len(&self) -> usize;

    /// Whether the pool is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process [`DescriptorPool`].
#[derive(Debug, Default)]
pub struct MemoryDescriptorPool {
    owners: HashMap<ClientId, HashMap<String, OwnedFd>>,
}

impl MemoryDescriptorPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DescriptorPool for MemoryDescriptorPool {
    fn register(&mut self, owner: ClientId, name: &str, descriptor: OwnedFd) -> Option<OwnedFd> {
        self.owners
            .entry(owner)
            .or_default()
            .insert(name.to_owned(), descriptor)
    }

    fn lookup(&self, owner: ClientId, name: &str) -> Result<BorrowedFd<'_>, BrokerError> {
        self.owners
            .get(&owner)
            .and_then(|entries| entries.get(name))
            .map(AsFd::as_fd)
            .ok_or_else(|| BrokerError::unknown_descriptor(owner, name))
    }

    fn remove(&mut self, owner: ClientId, name: &str) -> Result<OwnedFd, BrokerError> {
        let entries = self
            .owners
            .get_mut(&owner)
            .ok_or_else(|| BrokerError::unknown_descriptor(owner, name))?;
        let descriptor = entries
            .remove(name)
            .ok_or_else(|| BrokerError::unknown_descriptor(owner, name))?;
        if entries.is_empty() {
            self.owners.remove(&owner);
        }
        Ok(descriptor)
    }

    fn release_owner(&mut self, owner: ClientId) -> Vec<(String, OwnedFd)> {
        self.owners
            .remove(&owner)
            .map(|entries| entries.into_iter().collect())
            .unwrap_or_default()
    }

    fn drain(&mut self) -> Vec<(ClientId, String, OwnedFd)> {
        self.owners
            .drain()
            .flat_map(|(owner, entries)| {
                entries
                    .into_iter()
                    .map(move |(name, descriptor)| (owner, name, descriptor))
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.owners.values().map(HashMap::len).sum()
    }
}
