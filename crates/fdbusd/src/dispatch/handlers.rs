//! Handlers for the built-in routes.

use std::os::fd::{BorrowedFd, OwnedFd};

use tracing::{debug, info, warn};

use fdbus_wire::{ClientId, Command, Message, TransferError};

use super::errors::DispatchError;
use super::table::{DISPATCH_TARGET, Request, Session};
use crate::BrokerError;
use crate::errors::close_handle;

/// `fd:load:<name>`: stores the attached descriptor under (sender, name).
pub(super) fn load(session: &mut Session<'_>, request: Request) -> Result<(), DispatchError> {
    let Request {
        client,
        message,
        descriptor: attachment,
    } = request;
    let name = descriptor_name(&message)?;
    let descriptor = attachment.ok_or(BrokerError::Recv {
        client,
        source: TransferError::MissingDescriptor {
            command: Command::Load.name(),
        },
    })?;

    if let Some(displaced) = session.pool.register(client, name, descriptor) {
        debug!(
            target: DISPATCH_TARGET,
            %client,
            name,
            "replacing pooled descriptor"
        );
        close_pooled(displaced, client, name);
    }
    info!(
        target: DISPATCH_TARGET,
        %client,
        name,
        pooled = session.pool.len(),
        "descriptor loaded"
    );
    Ok(())
}

/// `fd:pass:<name>[:<peer>]`: forwards the sender's pooled descriptor.
///
/// Without a peer the descriptor is returned to the sender. The pooled copy
/// is removed and closed only once the delivery succeeded.
pub(super) fn pass(session: &mut Session<'_>, request: Request) -> Result<(), DispatchError> {
    let Request {
        client: source,
        message,
        ..
    } = request;
    let name = descriptor_name(&message)?;
    let target = match message.argument(1) {
        Some(token) => token.parse::<ClientId>()?,
        None => source,
    };
    // Resolve the target before touching the pool so an unknown peer leaves
    // the pooled entry intact.
    session.registry.get(target)?;

    let delivery = Message::new(Command::Recv, [name.to_owned(), source.to_string()]);
    let descriptor = session.pool.lookup(source, name)?;
    send(session, target, &delivery, Some(descriptor))?;

    let handed_off = session.pool.remove(source, name)?;
    close_pooled(handed_off, source, name);
    info!(
        target: DISPATCH_TARGET,
        %source,
        %target,
        name,
        "descriptor passed"
    );
    Ok(())
}

/// `fd:release:<name>`: closes the sender's pooled descriptor.
pub(super) fn release(session: &mut Session<'_>, request: Request) -> Result<(), DispatchError> {
    let Request {
        client, message, ..
    } = request;
    let name = descriptor_name(&message)?;
    let descriptor = session.pool.remove(client, name)?;
    close_pooled(descriptor, client, name);
    debug!(
        target: DISPATCH_TARGET,
        %client,
        name,
        "descriptor released"
    );
    Ok(())
}

/// `peer:list`: replies with every other connected client, ascending.
pub(super) fn list_peers(session: &mut Session<'_>, request: Request) -> Result<(), DispatchError> {
    let Request { client, .. } = request;
    let peers: Vec<String> = session
        .registry
        .enumerate()
        .into_iter()
        .filter(|id| *id != client)
        .map(|id| id.to_string())
        .collect();
    debug!(
        target: DISPATCH_TARGET,
        %client,
        peers = peers.len(),
        "answering peer discovery"
    );
    let reply = Message::new(Command::List, peers);
    send(session, client, &reply, None)
}

fn descriptor_name(message: &Message) -> Result<&str, DispatchError> {
    match message.argument(0) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(DispatchError::EmptyName {
            command: message.command().name(),
        }),
    }
}

/// Sends `message` to `client`, attributing transport faults to `client`.
///
/// Encode failures stay [`DispatchError::Wire`] so they only cost the
/// message.
fn send(
    session: &Session<'_>,
    client: ClientId,
    message: &Message,
    descriptor: Option<BorrowedFd<'_>>,
) -> Result<(), DispatchError> {
    let channel = session.registry.get(client)?.channel();
    let sent = descriptor.map_or_else(
        || channel.send(message),
        |descriptor| channel.send_with_descriptor(message, descriptor),
    );
    sent.map_err(|source| match source {
        TransferError::Wire(error) => DispatchError::Wire(error),
        source => DispatchError::Broker(BrokerError::Send { client, source }),
    })
}

fn close_pooled(descriptor: OwnedFd, owner: ClientId, name: &str) {
    if let Err(error) = close_handle(descriptor, format!("descriptor '{name}' of client {owner}")) {
        warn!(target: DISPATCH_TARGET, %error, "failed to close pooled descriptor");
    }
}
