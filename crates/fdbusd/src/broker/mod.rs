//! Broker lifecycle and the reactor loop.
//!
//! A broker moves linearly through [`BrokerPhase`]: [`Broker::bind`] creates
//! and listens on the socket, [`Broker::run`] (or [`Broker::start`] on a
//! dedicated thread) services events until the [`ShutdownToken`] is
//! cancelled, and [`Broker::shutdown`] tears everything down. Only the thread
//! running the loop touches the registry, the interest set, or a connection.

mod handle;
mod listener;
mod shutdown;

use std::fmt;
use std::fs;
use std::io;
use std::os::fd::AsFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use fdbus_config::{Config, DEFAULT_LISTEN_BACKLOG, DEFAULT_POLL_INTERVAL_MS, SocketPath};
use fdbus_wire::{ClientId, Command, Message};

use crate::BrokerError;
use crate::dispatch::{DispatchError, DispatchTable, Disposition, Request, Session};
use crate::errors::close_handle;
use crate::pool::{DescriptorPool, MemoryDescriptorPool};
use crate::reactor::{Multiplexer, Readiness};
use crate::registry::ClientRegistry;

pub use self::handle::BrokerHandle;
pub use self::shutdown::{ShutdownReport, ShutdownToken};

pub(crate) const BROKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::broker");

/// Lifecycle states, in the only order a broker passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerPhase {
    /// Settings validated, nothing bound yet.
    Created,
    /// The socket file exists.
    Bound,
    /// The socket accepts connections.
    Listening,
    /// The reactor loop is servicing events.
    Running,
    /// Cleanup is in progress.
    ShuttingDown,
    /// Every resource has been released.
    Terminated,
}

impl BrokerPhase {
    /// Lowercase name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Bound => "bound",
            Self::Listening => "listening",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for BrokerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters needed to bind and run a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Filesystem path of the listening socket.
    pub socket_path: SocketPath,
    /// Upper bound on each readiness wait.
    pub poll_interval: Duration,
    /// Pending-connection queue length passed to `listen`.
    pub listen_backlog: i32,
}

impl BrokerSettings {
    /// Settings for `socket_path` with default timings.
    #[must_use]
    pub fn new(socket_path: SocketPath) -> Self {
        Self {
            socket_path,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
        }
    }

    /// Extracts broker settings from loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            socket_path: config.socket_path().clone(),
            poll_interval: config.poll_interval(),
            listen_backlog: config.listen_backlog(),
        }
    }

    /// Overrides the readiness wait bound.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Descriptor broker serving clients over a Unix domain socket.
#[derive(Debug)]
pub struct Broker<P: DescriptorPool = MemoryDescriptorPool> {
    settings: BrokerSettings,
    phase: BrokerPhase,
    listener: Option<UnixListener>,
    registry: ClientRegistry,
    multiplexer: Multiplexer,
    pool: P,
    table: DispatchTable,
}

impl Broker<MemoryDescriptorPool> {
    /// Binds and listens with an in-memory descriptor pool.
    ///
    /// # Errors
    ///
    /// See [`Broker::bind_with_pool`].
    pub fn bind(settings: BrokerSettings) -> Result<Self, BrokerError> {
        Self::bind_with_pool(settings, MemoryDescriptorPool::new())
    }
}

impl<P: DescriptorPool> Broker<P> {
    /// Binds the socket path and starts listening.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidPollInterval`] for a zero interval,
    /// [`BrokerError::Bind`] when the path cannot be bound (including when
    /// any file already exists there), and [`BrokerError::Listen`] when the
    /// bound socket cannot listen.
    pub fn bind_with_pool(settings: BrokerSettings, pool: P) -> Result<Self, BrokerError> {
        let multiplexer = Multiplexer::new(settings.poll_interval)?;
        let mut phase = BrokerPhase::Created;
        let path = settings.socket_path.as_std_path();

        let socket = listener::bind_socket(path)?;
        phase = advance(phase, BrokerPhase::Bound);
        let listener = listener::listen_on(socket, path, settings.listen_backlog)?;
        phase = advance(phase, BrokerPhase::Listening);

        info!(
            target: BROKER_TARGET,
            socket = %settings.socket_path,
            poll_interval_ms = settings.poll_interval.as_millis(),
            "broker listening"
        );
        Ok(Self {
            settings,
            phase,
            listener: Some(listener),
            registry: ClientRegistry::new(),
            multiplexer,
            pool,
            table: DispatchTable::standard(),
        })
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> BrokerPhase {
        self.phase
    }

    /// Path of the listening socket.
    #[must_use]
    pub const fn socket_path(&self) -> &SocketPath {
        &self.settings.socket_path
    }

    /// Moves the broker onto a dedicated reactor thread.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Spawn`] when the thread cannot be created; the
    /// broker is shut down in that case.
    pub fn start(self) -> Result<BrokerHandle, BrokerError>
    where
        P: 'static,
    {
        let token = ShutdownToken::new();
        let thread_token = token.clone();
        let socket_path = self.settings.socket_path.clone();
        let thread = thread::Builder::new()
            .name("fdbusd-reactor".to_owned())
            .spawn(move || {
                let mut broker = self;
                broker.run(&thread_token)
            })
            .map_err(|source| BrokerError::Spawn { source })?;
        Ok(BrokerHandle::new(token, socket_path, thread))
    }

    /// Runs the reactor loop on the current thread until `token` is
    /// cancelled, then performs orderly shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotListening`] unless the broker is listening,
    /// and fatal loop failures ([`BrokerError::Accept`],
    /// [`BrokerError::Poll`]). Resources are released before a fatal error
    /// is returned.
    pub fn run(&mut self, token: &ShutdownToken) -> Result<ShutdownReport, BrokerError> {
        if self.phase != BrokerPhase::Listening {
            return Err(BrokerError::NotListening { phase: self.phase });
        }
        self.phase = advance(self.phase, BrokerPhase::Running);
        info!(target: BROKER_TARGET, "reactor running");

        let outcome = self.serve(token);
        let report = self.shutdown();
        let cleanup_failures = report.failures().len();
        outcome.map(|()| report).inspect_err(|error| {
            warn!(
                target: BROKER_TARGET,
                error = %error,
                cleanup_failures,
                "reactor stopped on a fatal error"
            );
        })
    }

    /// Services one event per pass until `token` is cancelled.
    fn serve(&mut self, token: &ShutdownToken) -> Result<(), BrokerError> {
        while !token.is_cancelled() {
            let listener = self
                .listener
                .as_ref()
                .ok_or(BrokerError::NotListening { phase: self.phase })?;
            let ready = self.multiplexer.wait(listener.as_fd(), &self.registry)?;
            match ready {
                None => {}
                Some(Readiness::Listener) => self.accept()?,
                Some(Readiness::Client { id, hangup: true }) => self.disconnect(id, "hangup"),
                Some(Readiness::Client { id, hangup: false }) => self.service_client(id),
            }
        }
        debug!(target: BROKER_TARGET, "shutdown requested");
        Ok(())
    }

    fn accept(&mut self) -> Result<(), BrokerError> {
        let listener = self
            .listener
            .as_ref()
            .ok_or(BrokerError::NotListening { phase: self.phase })?;
        let stream = accept_retrying(listener)?;
        let id = self.registry.add(stream);
        self.multiplexer.register(id);
        info!(
            target: BROKER_TARGET,
            client = %id,
            connected = self.registry.len(),
            "client connected"
        );

        let welcome = Message::new(Command::Welcome, [id.to_string()]);
        let greeted = self
            .registry
            .get(id)
            .and_then(|connection| {
                connection
                    .channel()
                    .send(&welcome)
                    .map_err(|source| BrokerError::Send { client: id, source })
            });
        if let Err(error) = greeted {
            warn!(target: BROKER_TARGET, error = %error, "welcome failed");
            self.disconnect(id, "welcome failed");
        }
        Ok(())
    }

    fn service_client(&mut self, id: ClientId) {
        let Err(error) = self.receive_and_dispatch(id) else {
            return;
        };
        match error.disposition() {
            Disposition::Discard => {
                warn!(
                    target: BROKER_TARGET,
                    client = %id,
                    error = %error,
                    "discarding message"
                );
            }
            Disposition::Disconnect(faulting) => {
                if let DispatchError::Broker(broker_error) = &error
                    && broker_error.is_hangup()
                {
                    self.disconnect(faulting, "hangup");
                } else {
                    warn!(
                        target: BROKER_TARGET,
                        client = %faulting,
                        error = %error,
                        "dropping faulting connection"
                    );
                    self.disconnect(faulting, "transport fault");
                }
            }
        }
    }

    fn receive_and_dispatch(&mut self, id: ClientId) -> Result<(), DispatchError> {
        let mut frame = self
            .registry
            .get(id)?
            .channel()
            .receive()
            .map_err(|source| BrokerError::Recv { client: id, source })?;
        let descriptor = frame.take_descriptor();
        let message = frame.message()?;

        let mut session = Session {
            registry: &self.registry,
            pool: &mut self.pool,
        };
        self.table.dispatch(
            &mut session,
            Request {
                client: id,
                message,
                descriptor,
            },
        )
    }

    /// Closes a client's connection and releases its pooled descriptors.
    fn disconnect(&mut self, id: ClientId, reason: &str) {
        self.multiplexer.deregister(id);
        match self.registry.remove(id) {
            Ok(connection) => {
                let label = format!("connection of client {id}");
                if let Err(error) = close_handle(connection.into_stream(), label) {
                    warn!(target: BROKER_TARGET, error = %error, "close failed");
                }
            }
            Err(error) => {
                debug!(target: BROKER_TARGET, error = %error, "client already gone");
                return;
            }
        }

        let released = self.pool.release_owner(id);
        let released_count = released.len();
        for (name, descriptor) in released {
            let label = format!("descriptor '{name}' of client {id}");
            if let Err(error) = close_handle(descriptor, label) {
                warn!(target: BROKER_TARGET, error = %error, "close failed");
            }
        }
        info!(
            target: BROKER_TARGET,
            client = %id,
            reason,
            released = released_count,
            connected = self.registry.len(),
            "client disconnected"
        );
    }

    /// Removes the socket file, then closes every client, the listener, and
    /// every pooled descriptor.
    ///
    /// Each step runs even when an earlier one failed. Calling this again
    /// after it completed returns an empty report.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.phase == BrokerPhase::Terminated {
            return report;
        }
        self.phase = BrokerPhase::ShuttingDown;

        if self.listener.is_some() {
            report.record(self.unlink_socket());
        }
        for connection in self.registry.drain() {
            let id = connection.id();
            self.multiplexer.deregister(id);
            report.record(close_handle(
                connection.into_stream(),
                format!("connection of client {id}"),
            ));
        }
        if let Some(listener) = self.listener.take() {
            report.record(close_handle(listener, "listening socket"));
        }
        for (owner, name, descriptor) in self.pool.drain() {
            report.record(close_handle(
                descriptor,
                format!("descriptor '{name}' of client {owner}"),
            ));
        }

        self.phase = BrokerPhase::Terminated;
        for failure in report.failures() {
            warn!(target: BROKER_TARGET, error = %failure, "shutdown step failed");
        }
        info!(
            target: BROKER_TARGET,
            clean = report.is_clean(),
            "broker terminated"
        );
        report
    }

    fn unlink_socket(&self) -> Result<(), BrokerError> {
        let path = self.settings.socket_path.as_std_path();
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BrokerError::Unlink {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}

impl<P: DescriptorPool> Drop for Broker<P> {
    fn drop(&mut self) {
        if self.phase != BrokerPhase::Terminated {
            let _report = self.shutdown();
        }
    }
}

fn advance(from: BrokerPhase, to: BrokerPhase) -> BrokerPhase {
    debug!(target: BROKER_TARGET, %from, %to, "phase change");
    to
}

fn accept_retrying(listener: &UnixListener) -> Result<UnixStream, BrokerError> {
    loop {
        match listener.accept() {
            Ok((stream, _)) => return Ok(stream),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => return Err(BrokerError::Accept { source }),
        }
    }
}
