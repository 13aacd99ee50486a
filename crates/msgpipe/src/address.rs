//! Channel name resolution.
//!
//! A channel name maps to exactly one [`Endpoint`]. By default the endpoint
//! lives in the Linux abstract socket namespace, so nothing is left on disk
//! when a receiver goes away. A socket directory can be supplied instead for
//! endpoints that should be visible (and permission-checked) on the
//! filesystem.

use crate::config::ChannelConfig;
use std::fmt;
use std::path::{Path, PathBuf};

/// Platform endpoint identifier for a channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Abstract-namespace socket name, without the leading NUL.
    Abstract(String),
    /// Socket file on the filesystem.
    Path(PathBuf),
}

/// Resolve a channel name to its default (abstract namespace) endpoint.
pub fn format_name(name: &str) -> Endpoint {
    Endpoint::Abstract(format!("{}{}", ChannelConfig::ABSTRACT_PREFIX, name))
}

impl Endpoint {
    /// Resolve a channel name to a socket file inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>, name: &str) -> Self {
        let file = format!("{}.{}", name, ChannelConfig::SOCKET_FILE_EXTENSION);
        Endpoint::Path(dir.as_ref().join(file))
    }

    /// Resolve `name` against an optional socket directory.
    pub fn resolve(name: &str, socket_dir: Option<&Path>) -> Self {
        match socket_dir {
            Some(dir) => Self::in_dir(dir, name),
            None => format_name(name),
        }
    }

    /// Filesystem path of the socket, if the endpoint has one.
    pub fn socket_path(&self) -> Option<&Path> {
        match self {
            Endpoint::Abstract(_) => None,
            Endpoint::Path(path) => Some(path),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // `@` is the conventional rendering of the leading NUL (ss, netstat).
            Endpoint::Abstract(name) => write!(f, "@{}", name),
            Endpoint::Path(path) => write!(f, "{}", path.display()),
        }
    }
}
