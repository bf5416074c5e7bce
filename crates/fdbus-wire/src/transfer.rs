//! Frame transport and descriptor transfer over Unix domain streams.
//!
//! Every frame is exactly [`FRAME_LEN`] bytes. A descriptor travels as
//! `SCM_RIGHTS` ancillary data on the first `sendmsg` of its frame, so the
//! receiver always observes the descriptor together with the text that names
//! it.

use std::io::{self, IoSlice, IoSliceMut, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};
use thiserror::Error;

use crate::{FRAME_LEN, Message, WireError};

/// Ancillary capacity per receive; extra descriptors beyond the first are
/// closed on arrival.
const MAX_DESCRIPTORS: usize = 4;

/// A vanished peer must surface as `EPIPE`, not kill the process.
#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: MsgFlags = MsgFlags::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: MsgFlags = MsgFlags::empty();

/// Received descriptors must not leak into spawned children.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const RECV_FLAGS: MsgFlags = MsgFlags::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
const RECV_FLAGS: MsgFlags = MsgFlags::empty();

/// Errors raised while moving frames or descriptors across a connection.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The platform send call failed.
    #[error("send failed: {source}")]
    Send {
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The platform receive call failed.
    #[error("receive failed: {source}")]
    Receive {
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// A command that must carry a descriptor arrived without one.
    #[error("'{command}' arrived without an attached descriptor")]
    MissingDescriptor {
        /// Command name.
        command: &'static str,
    },

    /// The frame could not be encoded or decoded.
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl TransferError {
    fn send(errno: Errno) -> Self {
        Self::Send {
            source: io::Error::from(errno),
        }
    }

    fn receive(errno: Errno) -> Self {
        Self::Receive {
            source: io::Error::from(errno),
        }
    }
}

/// One received frame: the payload up to its NUL padding and the descriptor
/// attached to it, if any.
#[derive(Debug)]
pub struct Frame {
    payload: Vec<u8>,
    descriptor: Option<OwnedFd>,
}

impl Frame {
    /// Text bytes of the frame without padding.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decodes the payload.
    ///
    /// # Errors
    ///
    /// Propagates [`Message::decode`] failures.
    pub fn message(&self) -> Result<Message, WireError> {
        Message::decode(&self.payload)
    }

    /// Borrows the attached descriptor.
    #[must_use]
    pub fn descriptor(&self) -> Option<BorrowedFd<'_>> {
        self.descriptor.as_ref().map(AsFd::as_fd)
    }

    /// Takes ownership of the attached descriptor.
    pub fn take_descriptor(&mut self) -> Option<OwnedFd> {
        self.descriptor.take()
    }
}

/// A descriptor received together with the message that names it.
#[derive(Debug)]
pub struct TaggedDescriptor {
    /// Message delivered with the descriptor.
    pub message: Message,
    /// The received descriptor; the receiver owns it.
    pub descriptor: OwnedFd,
}

impl TaggedDescriptor {
    /// Name tag carried as the first message argument.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.message.argument(0)
    }
}

/// Framed connection over a Unix domain stream.
#[derive(Debug)]
pub struct Channel {
    stream: UnixStream,
    nonblocking_sends: bool,
}

impl Channel {
    /// Wraps an established stream.
    #[must_use]
    pub const fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            nonblocking_sends: false,
        }
    }

    /// Makes every send fail instead of waiting for buffer space.
    ///
    /// A frame the peer has no room for is reported as
    /// [`TransferError::Send`] with [`io::ErrorKind::WouldBlock`]. Receives
    /// are unaffected.
    #[must_use]
    pub const fn with_nonblocking_sends(mut self) -> Self {
        self.nonblocking_sends = true;
        self
    }

    /// Connects to a broker socket.
    ///
    /// # Errors
    ///
    /// Returns the underlying connect failure.
    pub fn connect(path: impl AsRef<Path>) -> io::Result<Self> {
        UnixStream::connect(path).map(Self::new)
    }

    /// Bounds blocking receives; `None` blocks indefinitely.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket option failure.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    /// Borrows the underlying stream.
    #[must_use]
    pub const fn stream(&self) -> &UnixStream {
        &self.stream
    }

    /// Releases the underlying stream.
    #[must_use]
    pub fn into_stream(self) -> UnixStream {
        self.stream
    }

    /// Sends a message without an attachment.
    ///
    /// # Errors
    ///
    /// Fails on encode errors or transport failure.
    pub fn send(&self, message: &Message) -> Result<(), TransferError> {
        self.send_frame(message, None)
    }

    /// Sends a message with `descriptor` attached as `SCM_RIGHTS` data.
    ///
    /// The caller keeps its own copy of the descriptor open.
    ///
    /// # Errors
    ///
    /// Fails on encode errors or transport failure.
    pub fn send_with_descriptor(
        &self,
        message: &Message,
        descriptor: BorrowedFd<'_>,
    ) -> Result<(), TransferError> {
        self.send_frame(message, Some(descriptor))
    }

    /// Receives one frame.
    ///
    /// A short read is accepted as-is. Zero bytes means the peer hung up.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Closed`] on end of stream and
    /// [`TransferError::Receive`] on platform failure or truncated ancillary
    /// data.
    pub fn receive(&self) -> Result<Frame, TransferError> {
        let mut buffer = vec![0_u8; FRAME_LEN];
        let (bytes, mut descriptors, truncated) = loop {
            match recv_once(self.stream.as_raw_fd(), &mut buffer) {
                Ok(received) => break received,
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(TransferError::receive(errno)),
            }
        };

        if truncated {
            return Err(TransferError::Receive {
                source: io::Error::new(io::ErrorKind::InvalidData, "ancillary data truncated"),
            });
        }
        if bytes == 0 {
            return Err(TransferError::Closed);
        }

        buffer.truncate(bytes);
        if let Some(end) = buffer.iter().position(|byte| *byte == 0) {
            buffer.truncate(end);
        }
        let descriptor = if descriptors.is_empty() {
            None
        } else {
            Some(descriptors.swap_remove(0))
        };
        Ok(Frame {
            payload: buffer,
            descriptor,
        })
    }

    fn send_frame(
        &self,
        message: &Message,
        descriptor: Option<BorrowedFd<'_>>,
    ) -> Result<(), TransferError> {
        let mut frame = message.encode()?.into_bytes();
        frame.resize(FRAME_LEN, 0);

        let raw_fds: Vec<RawFd> = descriptor.iter().map(AsRawFd::as_raw_fd).collect();
        let control: Vec<ControlMessage<'_>> = if raw_fds.is_empty() {
            Vec::new()
        } else {
            vec![ControlMessage::ScmRights(&raw_fds)]
        };

        let flags = if self.nonblocking_sends {
            SEND_FLAGS | MsgFlags::MSG_DONTWAIT
        } else {
            SEND_FLAGS
        };
        let sent = loop {
            match sendmsg::<()>(
                self.stream.as_raw_fd(),
                &[IoSlice::new(&frame)],
                &control,
                flags,
                None,
            ) {
                Ok(sent) => break sent,
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(TransferError::send(errno)),
            }
        };

        if let Some(rest) = frame.get(sent..)
            && !rest.is_empty()
        {
            if self.nonblocking_sends {
                return Err(TransferError::Send {
                    source: io::Error::new(io::ErrorKind::WouldBlock, "frame only partly sent"),
                });
            }
            (&self.stream)
                .write_all(rest)
                .map_err(|source| TransferError::Send { source })?;
        }
        Ok(())
    }
}

impl AsFd for Channel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AsRawFd for Channel {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

fn recv_once(fd: RawFd, buffer: &mut [u8]) -> Result<(usize, Vec<OwnedFd>, bool), Errno> {
    let mut control = nix::cmsg_space!([RawFd; MAX_DESCRIPTORS]);
    let mut iov = [IoSliceMut::new(buffer)];
    let message = recvmsg::<()>(fd, &mut iov, Some(&mut control), RECV_FLAGS)?;

    let mut descriptors = Vec::new();
    for cmsg in message.cmsgs()? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            // SAFETY: SCM_RIGHTS installs fresh descriptors in this process
            // and nothing else holds them yet.
            descriptors.extend(fds.into_iter().map(|raw| unsafe { OwnedFd::from_raw_fd(raw) }));
        }
    }
    let truncated = message.flags.contains(MsgFlags::MSG_CTRUNC);
    Ok((message.bytes, descriptors, truncated))
}

/// Sends `descriptor` to the peer of `channel`, tagged by `message`.
///
/// # Errors
///
/// Returns [`TransferError::Send`] on transport failure. The descriptor is
/// never closed by this call.
pub fn send_descriptor(
    channel: &Channel,
    descriptor: BorrowedFd<'_>,
    message: &Message,
) -> Result<(), TransferError> {
    channel.send_with_descriptor(message, descriptor)
}

/// Receives one frame that must carry a descriptor.
///
/// # Errors
///
/// Returns [`TransferError::MissingDescriptor`] when the frame arrived
/// without an attachment, in addition to the failures of
/// [`Channel::receive`].
pub fn receive_descriptor(channel: &Channel) -> Result<TaggedDescriptor, TransferError> {
    let mut frame = channel.receive()?;
    let message = frame.message()?;
    let descriptor = frame
        .take_descriptor()
        .ok_or(TransferError::MissingDescriptor {
            command: message.command().name(),
        })?;
    Ok(TaggedDescriptor {
        message,
        descriptor,
    })
}
