//! Closed registry of protocol and command names.
//!
//! Adding a command means adding a variant here and a row to the broker's
//! dispatch table; nothing in the reactor names commands directly.

use crate::WireError;

/// Protocol families understood on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Descriptor registration and transfer.
    Descriptor,
    /// Membership and identity.
    Peer,
}

const DESCRIPTOR_COMMANDS: &[Command] = &[
    Command::Load,
    Command::Pass,
    Command::Recv,
    Command::Release,
];

const PEER_COMMANDS: &[Command] = &[Command::Welcome, Command::List];

impl Protocol {
    /// Every known protocol.
    pub const ALL: [Self; 2] = [Self::Descriptor, Self::Peer];

    /// Resolves a protocol from its wire name.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidProtocol`] carrying the offending token
    /// when the name is not registered.
    pub fn parse(token: &str) -> Result<Self, WireError> {
        Self::ALL
            .into_iter()
            .find(|protocol| protocol.name() == token)
            .ok_or_else(|| WireError::invalid_protocol(token))
    }

    /// Wire name of the protocol.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Descriptor => "fd",
            Self::Peer => "peer",
        }
    }

    /// Commands belonging to this protocol.
    #[must_use]
    pub const fn commands(self) -> &'static [Command] {
        match self {
            Self::Descriptor => DESCRIPTOR_COMMANDS,
            Self::Peer => PEER_COMMANDS,
        }
    }
}

/// Commands carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `fd:load:<name>` with an attached descriptor.
    Load,
    /// `fd:pass:<name>[:<peer>]`.
    Pass,
    /// `fd:recv:<name>:<source>` with an attached descriptor, broker to client.
    Recv,
    /// `fd:release:<name>`.
    Release,
    /// `peer:welcome:<id>`, broker to client on accept.
    Welcome,
    /// `peer:list` request and `peer:list:<id>*` reply.
    List,
}

impl Command {
    /// Resolves a command name within `protocol`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidCommand`] when the name is not a command
    /// of that protocol.
    pub fn parse(protocol: Protocol, token: &str) -> Result<Self, WireError> {
        protocol
            .commands()
            .iter()
            .copied()
            .find(|command| command.name() == token)
            .ok_or_else(|| WireError::invalid_command(protocol.name(), token))
    }

    /// Wire name of the command.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Pass => "pass",
            Self::Recv => "recv",
            Self::Release => "release",
            Self::Welcome => "welcome",
            Self::List => "list",
        }
    }

    /// Protocol the command belongs to.
    #[must_use]
    pub const fn protocol(self) -> Protocol {
        match self {
            Self::Load | Self::Pass | Self::Recv | Self::Release => Protocol::Descriptor,
            Self::Welcome | Self::List => Protocol::Peer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_is_listed_under_its_protocol() {
        for protocol in Protocol::ALL {
            for command in protocol.commands() {
                assert_eq!(command.protocol(), protocol);
                assert_eq!(Command::parse(protocol, command.name()).ok(), Some(*command));
            }
        }
    }

    #[test]
    fn protocol_names_are_case_sensitive() {
        assert!(matches!(
            Protocol::parse("FD"),
            Err(WireError::InvalidProtocol { .. })
        ));
    }

    #[test]
    fn command_of_another_protocol_is_rejected() {
        let error = Command::parse(Protocol::Peer, "load").expect_err("load is not a peer command");
        assert!(matches!(
            error,
            WireError::InvalidCommand { protocol, token } if protocol == "peer" && token == "load"
        ));
    }
}
