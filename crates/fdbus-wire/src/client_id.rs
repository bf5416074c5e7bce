use std::fmt;
use std::str::FromStr;

use crate::WireError;

/// Broker-assigned identity of a connected client.
///
/// Identifiers increase monotonically for the lifetime of a broker and are
/// never reused, unlike the numeric value of the underlying socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = WireError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        token
            .parse::<u64>()
            .map(Self)
            .map_err(|_| WireError::invalid_client_id(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_identifiers() {
        assert_eq!("42".parse::<ClientId>().expect("parse"), ClientId::new(42));
    }

    #[test]
    fn rejects_non_numeric_identifiers() {
        let error = "peer-7".parse::<ClientId>().expect_err("should fail");
        assert!(matches!(error, WireError::InvalidClientId { token } if token == "peer-7"));
    }
}
