//! Readiness multiplexer for the broker's reactor loop.
//!
//! The interest set is an ordered list of client identifiers; the listening
//! socket is always polled first. Each wait reports at most one ready event,
//! the earliest in poll order, so under contention readiness order rather
//! than arrival order decides who is serviced next.

use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use fdbus_wire::ClientId;

use crate::BrokerError;
use crate::registry::ClientRegistry;

/// A single ready event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A connection is waiting to be accepted.
    Listener,
    /// A client connection is ready.
    Client {
        /// Ready client.
        id: ClientId,
        /// The peer hung up or the handle is invalid, with nothing left to
        /// read. The connection must be closed without a read.
        hangup: bool,
    },
}

/// Bounded-timeout readiness wait over the listener and registered clients.
#[derive(Debug)]
pub struct Multiplexer {
    interest: Vec<ClientId>,
    timeout: PollTimeout,
}

impl Multiplexer {
    /// Creates an empty interest set with a bounded wait.
    ///
    /// Intervals above `u16::MAX` milliseconds are clamped; sub-millisecond
    /// intervals round up to one millisecond.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidPollInterval`] for a zero interval, which
    /// would turn the loop into a busy spin.
    pub fn new(interval: Duration) -> Result<Self, BrokerError> {
        if interval.is_zero() {
            return Err(BrokerError::InvalidPollInterval);
        }
        let millis = u16::try_from(interval.as_millis())
            .unwrap_or(u16::MAX)
            .max(1);
        Ok(Self {
            interest: Vec::new(),
            timeout: PollTimeout::from(millis),
        })
    }

    /// Adds a client to the end of the interest set.
    pub fn register(&mut self, id: ClientId) {
        if !self.interest.contains(&id) {
            self.interest.push(id);
        }
    }

    /// Removes a client from the interest set.
    pub fn deregister(&mut self, id: ClientId) {
        self.interest.retain(|registered| *registered != id);
    }

    /// Registered clients in poll order.
    #[must_use]
    pub fn interest(&self) -> &[ClientId] {
        &self.interest
    }

    /// Waits for the first ready event.
    ///
    /// Returns `Ok(None)` when the timeout elapses or a signal interrupts the
    /// wait. Clients in the interest set but absent from `registry` are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Poll`] when the wait itself fails.
    pub fn wait(
        &self,
        listener: BorrowedFd<'_>,
        registry: &ClientRegistry,
    ) -> Result<Option<Readiness>, BrokerError> {
        let clients: Vec<(ClientId, BorrowedFd<'_>)> = self
            .interest
            .iter()
            .filter_map(|id| {
                registry
                    .get(*id)
                    .ok()
                    .map(|connection| (*id, connection.channel().as_fd()))
            })
            .collect();

        let mut fds = Vec::with_capacity(clients.len() + 1);
        fds.push(PollFd::new(listener, PollFlags::POLLIN));
        fds.extend(
            clients
                .iter()
                .map(|(_, fd)| PollFd::new(*fd, PollFlags::POLLIN)),
        );

        match poll(&mut fds, self.timeout) {
            Ok(0) | Err(Errno::EINTR) => return Ok(None),
            Ok(_) => {}
            Err(errno) => {
                return Err(BrokerError::Poll {
                    source: io::Error::from(errno),
                });
            }
        }

        let mut ready = fds
            .iter()
            .map(|fd| fd.revents().unwrap_or_else(PollFlags::empty));
        if ready.next().is_some_and(|flags| !flags.is_empty()) {
            return Ok(Some(Readiness::Listener));
        }
        Ok(clients
            .iter()
            .zip(ready)
            .find(|(_, flags)| !flags.is_empty())
            .map(|((id, _), flags)| Readiness::Client {
                id: *id,
                hangup: is_hangup(flags),
            }))
    }
}

fn is_hangup(flags: PollFlags) -> bool {
    flags.intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL)
        && !flags.contains(PollFlags::POLLIN)
}
