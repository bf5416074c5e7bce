//! Command routing table.
//!
//! Routes are a closed, const table keyed by [`Command`]. Each row declares
//! the command's arity and whether it may carry a descriptor; the table
//! enforces both before a handler runs.

use std::fmt;
use std::os::fd::OwnedFd;

use tracing::{debug, warn};

use fdbus_wire::{ClientId, Command, Message};

use super::errors::DispatchError;
use super::handlers;
use crate::errors::close_handle;
use crate::pool::DescriptorPool;
use crate::registry::ClientRegistry;

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Broker state a handler may touch.
pub struct Session<'a> {
    /// Connected clients, for replies and peer lookups.
    pub registry: &'a ClientRegistry,
    /// Descriptors loaded by clients.
    pub pool: &'a mut dyn DescriptorPool,
}

/// One decoded client message.
#[derive(Debug)]
pub struct Request {
    /// Sender of the message.
    pub client: ClientId,
    /// Decoded message.
    pub message: Message,
    /// Descriptor received with the frame, if any.
    pub descriptor: Option<OwnedFd>,
}

/// Signature shared by every route handler.
pub type Handler = fn(&mut Session<'_>, Request) -> Result<(), DispatchError>;

/// Inclusive bounds on a command's argument count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    min: usize,
    max: usize,
}

impl Arity {
    /// Exactly `count` arguments.
    #[must_use]
    pub const fn exactly(count: usize) -> Self {
        Self {
            min: count,
            max: count,
        }
    }

    /// Between `min` and `max` arguments inclusive.
    #[must_use]
    pub const fn between(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// Whether `count` satisfies the bounds.
    #[must_use]
    pub const fn admits(self, count: usize) -> bool {
        count >= self.min && count <= self.max
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}..={}", self.min, self.max)
        }
    }
}

/// A single row of the dispatch table.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    /// Command handled by this row.
    pub command: Command,
    /// Accepted argument counts.
    pub arity: Arity,
    /// Whether an attached descriptor is handed to the handler.
    pub accepts_descriptor: bool,
    /// Handler invoked for the command.
    pub handler: Handler,
}

const ROUTES: &[Route] = &[
    Route {
        command: Command::Load,
        arity: Arity::exactly(1),
        accepts_descriptor: true,
        handler: handlers::load,
    },
    Route {
        command: Command::Pass,
        arity: Arity::between(1, 2),
        accepts_descriptor: false,
        handler: handlers::pass,
    },
    Route {
        command: Command::Release,
        arity: Arity::exactly(1),
        accepts_descriptor: false,
        handler: handlers::release,
    },
    Route {
        command: Command::List,
        arity: Arity::exactly(0),
        accepts_descriptor: false,
        handler: handlers::list_peers,
    },
];

/// Maps client commands to handlers.
#[derive(Debug, Clone, Copy)]
pub struct DispatchTable {
    routes: &'static [Route],
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl DispatchTable {
    /// The broker's built-in routes.
    #[must_use]
    pub const fn standard() -> Self {
        Self { routes: ROUTES }
    }

    /// Finds the route for `command`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoRoute`] for commands clients may not send.
    pub fn route(&self, command: Command) -> Result<&Route, DispatchError> {
        self.routes
            .iter()
            .find(|route| route.command == command)
            .ok_or(DispatchError::NoRoute {
                protocol: command.protocol().name(),
                command: command.name(),
            })
    }

    /// Validates `request` against its route and runs the handler.
    ///
    /// Descriptors attached to commands that do not take one are closed
    /// before the handler runs.
    ///
    /// # Errors
    ///
    /// Returns routing and arity failures, or whatever the handler reports.
    pub fn dispatch(
        &self,
        session: &mut Session<'_>,
        mut request: Request,
    ) -> Result<(), DispatchError> {
        let command = request.message.command();
        let route = self.route(command)?;

        if !route.accepts_descriptor
            && let Some(stray) = request.descriptor.take()
        {
            debug!(
                target: DISPATCH_TARGET,
                client = %request.client,
                command = command.name(),
                "closing descriptor attached to a command that takes none"
            );
            if let Err(error) = close_handle(stray, "stray attachment") {
                warn!(target: DISPATCH_TARGET, %error, "failed to close stray descriptor");
            }
        }

        let actual = request.message.arguments().len();
        if !route.arity.admits(actual) {
            return Err(DispatchError::Arity {
                command: command.name(),
                expected: route.arity.to_string(),
                actual,
            });
        }

        debug!(
            target: DISPATCH_TARGET,
            client = %request.client,
            command = command.name(),
            "dispatching"
        );
        (route.handler)(session, request)
    }
}
