//! Shared helpers: a minimal bus client and a broker running on a temp
//! socket.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::{BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use fdbus_config::SocketPath;
use fdbus_wire::{Channel, ClientId, Command, FRAME_LEN, Message, TaggedDescriptor, TransferError};

use crate::{Broker, BrokerHandle, BrokerSettings, ShutdownReport};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(2);
pub const RETRY_INTERVAL: Duration = Duration::from_millis(20);
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Client end of a bus connection, greeted and identified.
pub struct BusClient {
    channel: Channel,
    id: ClientId,
}

impl BusClient {
    pub fn connect(path: &Path) -> Self {
        let channel = Channel::connect(path).expect("connect to broker");
        channel
            .set_read_timeout(Some(WAIT_TIMEOUT))
            .expect("set read timeout");
        let welcome = channel
            .receive()
            .expect("welcome frame")
            .message()
            .expect("decode welcome");
        assert_eq!(welcome.command(), Command::Welcome);
        let id = welcome
            .argument(0)
            .expect("welcome carries an id")
            .parse()
            .expect("numeric id");
        Self { channel, id }
    }

    pub const fn id(&self) -> ClientId {
        self.id
    }

    pub fn request_peers(&self) -> Vec<ClientId> {
        self.channel
            .send(&Message::bare(Command::List))
            .expect("send peer list request");
        let reply = self
            .channel
            .receive()
            .expect("peer list reply")
            .message()
            .expect("decode peer list");
        assert_eq!(reply.command(), Command::List);
        reply
            .arguments()
            .iter()
            .map(|token| token.parse().expect("numeric peer id"))
            .collect()
    }

    /// Requests peers until the reply has `expected` entries.
    pub fn wait_for_peers(&self, expected: usize) -> Vec<ClientId> {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let peers = self.request_peers();
            if peers.len() == expected || Instant::now() >= deadline {
                return peers;
            }
            thread::sleep(RETRY_INTERVAL);
        }
    }

    pub fn load(&self, name: &str, descriptor: BorrowedFd<'_>) {
        self.channel
            .send_with_descriptor(&Message::new(Command::Load, [name]), descriptor)
            .expect("send load");
    }

    pub fn pass(&self, name: &str, peer: Option<ClientId>) {
        let mut arguments = vec![name.to_owned()];
        arguments.extend(peer.map(|id| id.to_string()));
        self.channel
            .send(&Message::new(Command::Pass, arguments))
            .expect("send pass");
    }

    pub fn receive_descriptor(&self) -> TaggedDescriptor {
        fdbus_wire::receive_descriptor(&self.channel).expect("receive descriptor")
    }

    /// Sends up to `limit` peer list requests without reading any reply.
    ///
    /// Stops at the first failed write and returns how many were sent.
    pub fn flood_peer_requests(&self, limit: usize) -> usize {
        self.channel
            .stream()
            .set_write_timeout(Some(WAIT_TIMEOUT))
            .expect("set write timeout");
        let request = Message::bare(Command::List);
        (0..limit)
            .take_while(|_| self.channel.send(&request).is_ok())
            .count()
    }

    /// Writes `text` as a padded frame, bypassing the encoder.
    pub fn send_raw(&self, text: &str) {
        let mut frame = text.as_bytes().to_vec();
        frame.resize(FRAME_LEN, 0);
        let mut stream = self.channel.stream();
        stream.write_all(&frame).expect("write raw frame");
    }

    /// Whether the broker closed this connection.
    pub fn observes_closed(&self) -> bool {
        matches!(self.channel.receive(), Err(TransferError::Closed))
    }
}

/// A broker started on its own thread under a temporary directory.
pub struct BrokerFixture {
    dir: TempDir,
    handle: Option<BrokerHandle>,
}

impl BrokerFixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
            handle: None,
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.path().join("fdbusd.sock")
    }

    pub fn settings(&self) -> BrokerSettings {
        let path = self
            .socket_path()
            .to_str()
            .expect("utf8 socket path")
            .to_owned();
        BrokerSettings::new(SocketPath::new(path)).with_poll_interval(TEST_POLL_INTERVAL)
    }

    pub fn start(&mut self) {
        let broker = Broker::bind(self.settings()).expect("bind broker");
        self.handle = Some(broker.start().expect("start broker"));
    }

    pub fn connect(&self) -> BusClient {
        BusClient::connect(&self.socket_path())
    }

    pub fn stop(&mut self) -> ShutdownReport {
        let handle = self.handle.take().expect("broker running");
        handle.shutdown();
        handle.join().expect("join broker")
    }
}

impl Drop for BrokerFixture {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
            drop(handle.join());
        }
    }
}

pub fn file_with(contents: &str) -> File {
    let mut file = tempfile::tempfile().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write contents");
    file.seek(SeekFrom::Start(0)).expect("rewind");
    file
}

pub fn read_all(descriptor: OwnedFd) -> String {
    let mut contents = String::new();
    File::from(descriptor)
        .read_to_string(&mut contents)
        .expect("read through descriptor");
    contents
}
