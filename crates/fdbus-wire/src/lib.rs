//! Wire types shared by the fdbus broker and its clients.
//!
//! Messages are colon-delimited UTF-8 text, `protocol:command:arg*`, carried
//! in fixed-size NUL-padded frames over a Unix domain stream. The same
//! connection carries open file descriptors as `SCM_RIGHTS` ancillary data
//! attached to a frame.
//!
//! The delimiter cannot be escaped: arguments containing `:` (or NUL) are
//! rejected when encoding rather than silently producing an ambiguous frame.

mod client_id;
mod message;
mod protocol;
mod transfer;

pub use client_id::ClientId;
pub use message::{DELIMITER, FRAME_LEN, Message, WireError};
pub use protocol::{Command, Protocol};
pub use transfer::{
    Channel, Frame, TaggedDescriptor, TransferError, receive_descriptor, send_descriptor,
};
