//! Colon-delimited message codec.

use std::str;

use thiserror::Error;

use crate::{Command, Protocol};

/// Separator between message tokens.
pub const DELIMITER: char = ':';

/// Size of every frame on the wire; the encoded text is NUL padded up to it.
pub const FRAME_LEN: usize = 4096;

/// Errors raised while encoding or decoding messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// The frame carried no text.
    #[error("empty message")]
    Empty,

    /// The frame text was not valid UTF-8.
    #[error("message is not valid UTF-8")]
    NotUtf8,

    /// The message named a protocol but no command.
    #[error("message for protocol '{protocol}' has no command")]
    MissingCommand {
        /// Protocol name.
        protocol: String,
    },

    /// The protocol name is not registered.
    #[error("invalid protocol: {token}")]
    InvalidProtocol {
        /// Offending token.
        token: String,
    },

    /// The command name is not registered for the protocol.
    #[error("invalid command '{token}' for protocol '{protocol}'")]
    InvalidCommand {
        /// Protocol name.
        protocol: String,
        /// Offending token.
        token: String,
    },

    /// An argument contained the delimiter or a NUL byte.
    #[error("argument '{argument}' contains a reserved character")]
    ForbiddenDelimiter {
        /// Offending argument.
        argument: String,
    },

    /// The encoded message does not fit in a frame.
    #[error("encoded message is {len} bytes, frame limit is {max}")]
    TooLong {
        /// Encoded length in bytes.
        len: usize,
        /// Frame capacity in bytes.
        max: usize,
    },

    /// A client identifier token was not a decimal integer.
    #[error("invalid client id: {token}")]
    InvalidClientId {
        /// Offending token.
        token: String,
    },
}

impl WireError {
    /// Creates an unknown protocol error.
    pub fn invalid_protocol(token: impl Into<String>) -> Self {
        Self::InvalidProtocol {
            token: token.into(),
        }
    }

    /// Creates an unknown command error.
    pub fn invalid_command(protocol: impl Into<String>, token: impl Into<String>) -> Self {
        Self::InvalidCommand {
            protocol: protocol.into(),
            token: token.into(),
        }
    }

    /// Creates an invalid client id error.
    pub fn invalid_client_id(token: impl Into<String>) -> Self {
        Self::InvalidClientId {
            token: token.into(),
        }
    }
}

/// A decoded `protocol:command:arg*` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    command: Command,
    arguments: Vec<String>,
}

impl Message {
    /// Builds a message from a command and its ordered arguments.
    pub fn new<I, S>(command: Command, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command,
            arguments: arguments.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a message without arguments.
    #[must_use]
    pub const fn bare(command: Command) -> Self {
        Self {
            command,
            arguments: Vec::new(),
        }
    }

    /// Protocol family of the message.
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.command.protocol()
    }

    /// Command carried by the message.
    #[must_use]
    pub const fn command(&self) -> Command {
        self.command
    }

    /// Ordered arguments.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Argument at `index`, if present.
    #[must_use]
    pub fn argument(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).map(String::as_str)
    }

    /// Encodes the message as delimiter-joined text.
    ///
    /// # Errors
    ///
    /// Fails when an argument contains the delimiter or NUL, or when the text
    /// would not fit in a single frame.
    pub fn encode(&self) -> Result<String, WireError> {
        if let Some(argument) = self
            .arguments
            .iter()
            .find(|argument| argument.contains([DELIMITER, '\0']))
        {
            return Err(WireError::ForbiddenDelimiter {
                argument: argument.clone(),
            });
        }

        let mut text = String::with_capacity(64);
        text.push_str(self.protocol().name());
        text.push(DELIMITER);
        text.push_str(self.command.name());
        for argument in &self.arguments {
            text.push(DELIMITER);
            text.push_str(argument);
        }

        if text.len() > FRAME_LEN {
            return Err(WireError::TooLong {
                len: text.len(),
                max: FRAME_LEN,
            });
        }
        Ok(text)
    }

    /// Decodes frame bytes, ignoring everything from the first NUL onwards.
    ///
    /// # Errors
    ///
    /// Unknown protocol or command names yield [`WireError::InvalidProtocol`]
    /// or [`WireError::InvalidCommand`] carrying the offending token.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let end = bytes
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(bytes.len());
        let text =
            str::from_utf8(bytes.get(..end).unwrap_or_default()).map_err(|_| WireError::NotUtf8)?;
        if text.is_empty() {
            return Err(WireError::Empty);
        }

        let mut tokens = text.split(DELIMITER);
        let protocol_token = tokens.next().unwrap_or_default();
        let protocol = Protocol::parse(protocol_token)?;
        let command_token = tokens.next().ok_or_else(|| WireError::MissingCommand {
            protocol: protocol_token.to_owned(),
        })?;
        let command = Command::parse(protocol, command_token)?;

        Ok(Self::new(command, tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Message::bare(Command::List), "peer:list")]
    #[case(Message::new(Command::Pass, ["socket", "3"]), "fd:pass:socket:3")]
    #[case(Message::new(Command::List, ["1", "2", "5"]), "peer:list:1:2:5")]
    fn encodes_delimited_text(#[case] message: Message, #[case] expected: &str) {
        assert_eq!(message.encode().expect("encode"), expected);
    }

    #[rstest]
    #[case(Message::bare(Command::List))]
    #[case(Message::new(Command::Recv, ["log.txt", "12"]))]
    #[case(Message::new(Command::Load, [""]))]
    #[case(Message::new(Command::List, ["", "", "9"]))]
    fn decode_inverts_encode(#[case] message: Message) {
        let text = message.encode().expect("encode");
        assert_eq!(Message::decode(text.as_bytes()).expect("decode"), message);
    }

    #[test]
    fn decode_stops_at_nul_padding() {
        let mut frame = b"fd:load:pipe".to_vec();
        frame.resize(FRAME_LEN, 0);
        frame.extend_from_slice(b"trailing");
        let message = Message::decode(&frame).expect("decode");
        assert_eq!(message.command(), Command::Load);
        assert_eq!(message.arguments(), ["pipe"]);
    }

    #[rstest]
    #[case(b"bus:list".as_slice(), WireError::invalid_protocol("bus"))]
    #[case(b"peer:ls".as_slice(), WireError::invalid_command("peer", "ls"))]
    #[case(b"fd:list".as_slice(), WireError::invalid_command("fd", "list"))]
    #[case(b"peer".as_slice(), WireError::MissingCommand { protocol: "peer".to_owned() })]
    #[case(b"\0\0\0".as_slice(), WireError::Empty)]
    #[case(b"\xff\xfe".as_slice(), WireError::NotUtf8)]
    fn decode_reports_offending_token(#[case] frame: &[u8], #[case] expected: WireError) {
        assert_eq!(Message::decode(frame), Err(expected));
    }

    #[rstest]
    #[case("a:b")]
    #[case(":")]
    #[case("trailing:")]
    #[case("nul\0byte")]
    fn encode_rejects_reserved_characters(#[case] argument: &str) {
        let message = Message::new(Command::Load, [argument]);
        assert!(matches!(
            message.encode(),
            Err(WireError::ForbiddenDelimiter { argument: rejected }) if rejected == argument
        ));
    }

    #[test]
    fn encode_accepts_characters_adjacent_to_the_delimiter() {
        let message = Message::new(Command::Load, [";", "9", "a-b_c.d/e"]);
        assert_eq!(message.encode().expect("encode"), "fd:load:;:9:a-b_c.d/e");
    }

    #[test]
    fn encode_rejects_oversized_messages() {
        let message = Message::new(Command::Load, ["x".repeat(FRAME_LEN)]);
        assert!(matches!(
            message.encode(),
            Err(WireError::TooLong { max: FRAME_LEN, .. })
        ));
    }
}
