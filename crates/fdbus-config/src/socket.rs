use std::fmt;
use std::fs::DirBuilder;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Filesystem location of the broker's Unix domain socket.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SocketPath(Utf8PathBuf);

impl SocketPath {
    /// Wraps a filesystem path.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self(path.into())
    }

    /// Borrows the underlying path.
    #[must_use]
    pub fn as_path(&self) -> &Utf8Path {
        self.0.as_path()
    }

    /// Borrows the path as a standard library path for syscalls.
    #[must_use]
    pub fn as_std_path(&self) -> &std::path::Path {
        self.0.as_std_path()
    }

    /// Ensures the socket's parent directory exists with restrictive permissions.
    ///
    /// The socket file itself is never created or removed here; the broker
    /// refuses to bind over an existing file.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(parent) = self
            .0
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
        else {
            return Err(SocketPreparationError::MissingParent {
                path: self.0.clone(),
            });
        };

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        if let Err(source) = builder.create(parent.as_std_path())
            && source.kind() != std::io::ErrorKind::AlreadyExists
        {
            return Err(SocketPreparationError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            });
        }

        Ok(())
    }
}

impl fmt::Display for SocketPath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "unix://{}", self.0)
    }
}

impl FromStr for SocketPath {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let path = input.strip_prefix("unix://").unwrap_or(input);
        if path.is_empty() {
            return Err(SocketParseError::Empty(input.to_owned()));
        }
        Ok(Self::new(path))
    }
}

impl From<Utf8PathBuf> for SocketPath {
    fn from(path: Utf8PathBuf) -> Self {
        Self(path)
    }
}

impl AsRef<Utf8Path> for SocketPath {
    fn as_ref(&self) -> &Utf8Path {
        self.as_path()
    }
}

/// Errors encountered while parsing a [`SocketPath`] from text.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// The input named no path.
    #[error("missing Unix socket path in '{0}'")]
    Empty(String),
}

/// Errors raised when preparing socket directories.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// Parent directory is missing when creating a Unix socket path.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent {
        /// Path involved.
        path: Utf8PathBuf,
    },
    /// Failed to create or adjust socket directories.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_unix_scheme() {
        let path = SocketPath::new("/tmp/fdbus.sock");
        assert_eq!(path.to_string(), "unix:///tmp/fdbus.sock");
    }

    #[test]
    fn parse_accepts_scheme_and_bare_paths() {
        let with_scheme: SocketPath = "unix:///run/fdbus.sock".parse().expect("parse");
        let bare: SocketPath = "/run/fdbus.sock".parse().expect("parse");
        assert_eq!(with_scheme, bare);
    }

    #[test]
    fn parse_rejects_empty_path() {
        assert!("unix://".parse::<SocketPath>().is_err());
    }

    #[test]
    fn prepare_creates_missing_parent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let nested = dir.path().join("a").join("b").join("fdbusd.sock");
        let path = SocketPath::new(
            Utf8PathBuf::from_path_buf(nested).expect("utf8 temp path"),
        );
        path.prepare_filesystem().expect("prepare");
        assert!(path.as_std_path().parent().is_some_and(std::path::Path::is_dir));
        assert!(!path.as_std_path().exists(), "socket file must not be created");
    }

    #[test]
    fn prepare_rejects_bare_file_name() {
        let error = SocketPath::new("fdbusd.sock")
            .prepare_filesystem()
            .expect_err("bare name has no parent");
        assert!(matches!(error, SocketPreparationError::MissingParent { .. }));
    }
}
