//! Unit tests for routing and the built-in handlers.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use rstest::{fixture, rstest};

use fdbus_wire::{Channel, ClientId, Command, Message, TransferError, WireError};

use super::*;
use crate::BrokerError;
use crate::pool::{DescriptorPool, MemoryDescriptorPool};
use crate::registry::ClientRegistry;

struct Harness {
    registry: ClientRegistry,
    pool: MemoryDescriptorPool,
    ends: Vec<(ClientId, Channel)>,
}

impl Harness {
    fn connect(&mut self) -> ClientId {
        let (broker_end, client_end) = UnixStream::pair().expect("unix pair");
        client_end
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("read timeout");
        let id = self.registry.add(broker_end);
        self.ends.push((id, Channel::new(client_end)));
        id
    }

    fn end(&self, id: ClientId) -> &Channel {
        self.ends
            .iter()
            .find(|(owner, _)| *owner == id)
            .map(|(_, channel)| channel)
            .expect("client end")
    }

    fn dispatch(
        &mut self,
        client: ClientId,
        message: Message,
        descriptor: Option<OwnedFd>,
    ) -> Result<(), DispatchError> {
        let mut session = Session {
            registry: &self.registry,
            pool: &mut self.pool,
        };
        DispatchTable::standard().dispatch(
            &mut session,
            Request {
                client,
                message,
                descriptor,
            },
        )
    }
}

#[fixture]
fn harness() -> Harness {
    Harness {
        registry: ClientRegistry::new(),
        pool: MemoryDescriptorPool::new(),
        ends: Vec::new(),
    }
}

fn file_with(contents: &str) -> OwnedFd {
    let mut file = tempfile::tempfile().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write");
    file.seek(SeekFrom::Start(0)).expect("rewind");
    OwnedFd::from(file)
}

#[rstest]
#[case(Command::Recv)]
#[case(Command::Welcome)]
fn broker_to_client_commands_have_no_route(#[case] command: Command) {
    assert!(matches!(
        DispatchTable::standard().route(command),
        Err(DispatchError::NoRoute { .. })
    ));
}

#[rstest]
#[case(Message::bare(Command::Load))]
#[case(Message::new(Command::Pass, ["a", "1", "2"]))]
#[case(Message::new(Command::List, ["extra"]))]
#[case(Message::bare(Command::Release))]
fn arity_violations_are_discarded(mut harness: Harness, #[case] message: Message) {
    let client = harness.connect();
    let error = harness
        .dispatch(client, message, None)
        .expect_err("arity violation");
    assert!(matches!(error, DispatchError::Arity { .. }));
    assert_eq!(error.disposition(), Disposition::Discard);
}

#[rstest]
fn load_pools_the_attached_descriptor(mut harness: Harness) {
    let client = harness.connect();
    harness
        .dispatch(
            client,
            Message::new(Command::Load, ["notes"]),
            Some(file_with("hello")),
        )
        .expect("load");
    assert_eq!(harness.pool.len(), 1);
    assert!(harness.pool.lookup(client, "notes").is_ok());
}

#[rstest]
fn load_without_descriptor_disconnects_sender(mut harness: Harness) {
    let client = harness.connect();
    let error = harness
        .dispatch(client, Message::new(Command::Load, ["notes"]), None)
        .expect_err("missing descriptor");
    assert!(matches!(
        error,
        DispatchError::Broker(BrokerError::Recv {
            source: TransferError::MissingDescriptor { .. },
            ..
        })
    ));
    assert_eq!(error.disposition(), Disposition::Disconnect(client));
}

#[rstest]
fn empty_names_are_rejected(mut harness: Harness) {
    let client = harness.connect();
    let error = harness
        .dispatch(client, Message::new(Command::Release, [""]), None)
        .expect_err("empty name");
    assert!(matches!(error, DispatchError::EmptyName { .. }));
}

#[rstest]
fn pass_delivers_descriptor_to_peer_and_hands_off(mut harness: Harness) {
    let source = harness.connect();
    let target = harness.connect();
    harness
        .dispatch(
            source,
            Message::new(Command::Load, ["notes"]),
            Some(file_with("shared")),
        )
        .expect("load");

    harness
        .dispatch(
            source,
            Message::new(Command::Pass, ["notes".to_owned(), target.to_string()]),
            None,
        )
        .expect("pass");

    let received = fdbus_wire::receive_descriptor(harness.end(target)).expect("delivery");
    assert_eq!(
        received.message,
        Message::new(Command::Recv, ["notes".to_owned(), source.to_string()])
    );
    let mut contents = String::new();
    File::from(received.descriptor)
        .read_to_string(&mut contents)
        .expect("read delivered file");
    assert_eq!(contents, "shared");
    assert!(harness.pool.is_empty(), "pooled copy should be handed off");
}

#[rstest]
fn pass_without_peer_returns_to_sender(mut harness: Harness) {
    let source = harness.connect();
    harness
        .dispatch(
            source,
            Message::new(Command::Load, ["self"]),
            Some(file_with("mine")),
        )
        .expect("load");
    harness
        .dispatch(source, Message::new(Command::Pass, ["self"]), None)
        .expect("pass");

    let received = fdbus_wire::receive_descriptor(harness.end(source)).expect("delivery");
    assert_eq!(received.tag(), Some("self"));
}

#[rstest]
fn pass_to_unknown_peer_keeps_pooled_entry(mut harness: Harness) {
    let source = harness.connect();
    harness
        .dispatch(
            source,
            Message::new(Command::Load, ["notes"]),
            Some(file_with("x")),
        )
        .expect("load");
    let error = harness
        .dispatch(source, Message::new(Command::Pass, ["notes", "99"]), None)
        .expect_err("unknown peer");
    assert!(matches!(
        error,
        DispatchError::Broker(BrokerError::UnknownClient { .. })
    ));
    assert_eq!(error.disposition(), Disposition::Discard);
    assert_eq!(harness.pool.len(), 1);
}

#[rstest]
fn pass_of_unknown_descriptor_is_discarded(mut harness: Harness) {
    let source = harness.connect();
    let error = harness
        .dispatch(source, Message::new(Command::Pass, ["ghost"]), None)
        .expect_err("unknown descriptor");
    assert!(matches!(
        error,
        DispatchError::Broker(BrokerError::UnknownDescriptor { .. })
    ));
    assert_eq!(error.disposition(), Disposition::Discard);
}

#[rstest]
fn pass_with_malformed_peer_id_is_discarded(mut harness: Harness) {
    let source = harness.connect();
    let error = harness
        .dispatch(source, Message::new(Command::Pass, ["notes", "x7"]), None)
        .expect_err("bad peer id");
    assert!(matches!(
        error,
        DispatchError::Wire(WireError::InvalidClientId { .. })
    ));
}

#[rstest]
fn pass_to_departed_peer_blames_the_peer(mut harness: Harness) {
    let source = harness.connect();
    let target = harness.connect();
    harness.ends.retain(|(id, _)| *id != target);
    harness
        .dispatch(
            source,
            Message::new(Command::Load, ["notes"]),
            Some(file_with("x")),
        )
        .expect("load");

    let error = harness
        .dispatch(
            source,
            Message::new(Command::Pass, ["notes".to_owned(), target.to_string()]),
            None,
        )
        .expect_err("peer end is closed");
    assert_eq!(error.disposition(), Disposition::Disconnect(target));
    assert_eq!(harness.pool.len(), 1, "failed delivery keeps pooled copy");
}

#[rstest]
fn release_closes_pooled_descriptor(mut harness: Harness) {
    let client = harness.connect();
    harness
        .dispatch(
            client,
            Message::new(Command::Load, ["notes"]),
            Some(file_with("x")),
        )
        .expect("load");
    harness
        .dispatch(client, Message::new(Command::Release, ["notes"]), None)
        .expect("release");
    assert!(harness.pool.is_empty());
}

#[rstest]
fn list_peers_excludes_requester(mut harness: Harness) {
    let first = harness.connect();
    let second = harness.connect();
    let third = harness.connect();
    harness
        .dispatch(second, Message::bare(Command::List), None)
        .expect("list");

    let reply = harness
        .end(second)
        .receive()
        .expect("reply")
        .message()
        .expect("decode reply");
    assert_eq!(
        reply,
        Message::new(Command::List, [first.to_string(), third.to_string()])
    );
}

#[rstest]
fn stray_attachments_are_closed(mut harness: Harness) {
    let client = harness.connect();
    let file = tempfile::tempfile().expect("temp file");
    let stray = file.as_fd().try_clone_to_owned().expect("dup");
    harness
        .dispatch(client, Message::bare(Command::List), Some(stray))
        .expect("list");
    assert!(harness.pool.is_empty());
}
