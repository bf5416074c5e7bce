//! Creation of the broker's listening socket.
//!
//! Binding never replaces an existing file at the socket path: a stale
//! socket left by a crashed broker must be removed by the operator.

use std::fs;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixListener;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::socket::{
    AddressFamily, Backlog, SockFlag, SockType, UnixAddr, bind, listen, socket,
};
use tracing::warn;

use super::BROKER_TARGET;
use crate::BrokerError;

/// The listener must not leak into spawned children.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const SOCKET_FLAGS: SockFlag = SockFlag::SOCK_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
const SOCKET_FLAGS: SockFlag = SockFlag::empty();

/// Creates a stream socket and binds it to `path`.
pub(super) fn bind_socket(path: &Path) -> Result<OwnedFd, BrokerError> {
    let bind_error = |errno: Errno| BrokerError::Bind {
        path: path.display().to_string(),
        source: io::Error::from(errno),
    };
    let socket = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SOCKET_FLAGS,
        None,
    )
    .map_err(bind_error)?;
    let address = UnixAddr::new(path).map_err(bind_error)?;
    bind(socket.as_raw_fd(), &address).map_err(bind_error)?;
    Ok(socket)
}

/// Marks a bound socket as listening.
///
/// The socket file is removed again when listening fails so a failed start
/// leaves nothing behind.
pub(super) fn listen_on(
    socket: OwnedFd,
    path: &Path,
    backlog: i32,
) -> Result<UnixListener, BrokerError> {
    let listen_error = |errno: Errno| BrokerError::Listen {
        path: path.display().to_string(),
        source: io::Error::from(errno),
    };
    let outcome = Backlog::new(backlog)
        .map_err(listen_error)
        .and_then(|backlog| listen(&socket, backlog).map_err(listen_error));
    if let Err(error) = outcome {
        drop(socket);
        remove_socket_file(path);
        return Err(error);
    }
    Ok(UnixListener::from(socket))
}

fn remove_socket_file(path: &Path) {
    if let Err(error) = fs::remove_file(path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: BROKER_TARGET,
            error = %error,
            path = %path.display(),
            "failed to remove socket file after listen failure"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn bound_and_listening_socket_accepts_connections() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("listen.sock");
        let socket = bind_socket(&path).expect("bind");
        assert!(path.exists(), "bind should create the socket file");
        let listener = listen_on(socket, &path, 4).expect("listen");

        let _client = UnixStream::connect(&path).expect("connect");
        listener.accept().expect("accept");
    }

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    #[test]
    fn listening_socket_closes_on_exec() {
        use nix::fcntl::{FcntlArg, FdFlag, fcntl};

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("cloexec.sock");
        let socket = bind_socket(&path).expect("bind");
        let flags = fcntl(socket.as_raw_fd(), FcntlArg::F_GETFD).expect("get flags");
        assert!(FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC));
    }

    #[test]
    fn bind_refuses_to_replace_an_existing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("taken.sock");
        fs::write(&path, b"occupied").expect("create file");

        let error = bind_socket(&path).expect_err("bind over existing file");
        assert!(matches!(error, BrokerError::Bind { .. }));
        assert_eq!(fs::read(&path).expect("file intact"), b"occupied");
    }

    #[test]
    fn listen_failure_removes_the_socket_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("backlog.sock");
        let socket = bind_socket(&path).expect("bind");

        let error = listen_on(socket, &path, -100).expect_err("negative backlog");
        assert!(matches!(error, BrokerError::Listen { .. }));
        assert!(!path.exists());
    }
}
