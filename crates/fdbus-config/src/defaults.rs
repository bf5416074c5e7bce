use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::socket::SocketPath;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default bound on a single readiness wait, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default backlog handed to `listen`.
pub const DEFAULT_LISTEN_BACKLOG: i32 = 16;

const SOCKET_FILE_NAME: &str = "fdbusd.sock";

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Computes the default socket path for the broker.
///
/// Prefers `$XDG_RUNTIME_DIR/fdbus`; otherwise falls back to a per-user
/// directory beneath the system temporary directory.
#[must_use]
pub fn default_socket_path() -> SocketPath {
    let (mut base, apply_namespace) = runtime_base_directory()
        .map_or_else(|| (fallback_base_directory(), true), |dir| (dir, false));

    base.push("fdbus");
    if apply_namespace {
        base.push(user_namespace());
    }

    SocketPath::new(base.join(SOCKET_FILE_NAME))
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(not(unix))]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    None
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    // SAFETY: `geteuid` has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn user_namespace() -> String {
    "shared".to_owned()
}
