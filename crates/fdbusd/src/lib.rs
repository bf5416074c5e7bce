//! File-descriptor broker over a Unix domain socket.
//!
//! Clients connect to a single broker socket, learn their broker-assigned
//! identifier from a `peer:welcome` greeting, discover one another with
//! `peer:list`, and hand open descriptors to each other through the broker:
//! a client loads a descriptor into the broker's pool under a name, then asks
//! the broker to pass it to a peer, which receives it as `SCM_RIGHTS` data
//! tagged with the name and the sender.
//!
//! The broker is a single-threaded reactor. One readiness wait with a bounded
//! timeout drives everything, and exactly one event is serviced per pass.
//! Shutdown is cooperative: cancelling the [`ShutdownToken`] stops the loop
//! within one poll interval, after which the socket file, every connection,
//! the listener, and every pooled descriptor are released.
//!
//! Failures are contained at the per-event boundary. A malformed or unknown
//! message costs only that message; a transport fault costs only the
//! faulting connection; only accept and poll failures stop the loop.

mod bootstrap;
mod broker;
mod dispatch;
mod errors;
mod pool;
mod process;
mod reactor;
mod registry;
mod telemetry;

pub use bootstrap::{
    BootstrapError, Bootstrapped, ConfigLoader, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use broker::{
    Broker, BrokerHandle, BrokerPhase, BrokerSettings, ShutdownReport, ShutdownToken,
};
pub use dispatch::{
    Arity, DispatchError, DispatchTable, Disposition, Handler, Request, Route, Session,
};
pub use errors::BrokerError;
pub use pool::{DescriptorPool, MemoryDescriptorPool};
pub use process::{
    LaunchError, ShutdownError, ShutdownSignal, SignalWatch, SystemShutdownSignal, run_daemon,
    run_daemon_with,
};
pub use reactor::{Multiplexer, Readiness};
pub use registry::{ClientConnection, ClientRegistry};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
