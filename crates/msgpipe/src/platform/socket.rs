//! `SOCK_SEQPACKET` Unix-domain socket primitives.
//!
//! Seqpacket sockets are connection-oriented and preserve message boundaries:
//! each `send` is delivered to exactly one `recv`. A `recv` with a buffer that
//! is too small silently discards the tail of the message, so callers must
//! size the buffer with [`pending_message_len`] first.

use crate::address::Endpoint;
use crate::config::ChannelConfig;
use crate::error::{PipeError, Result};
use nix::errno::Errno;
use nix::sys::socket::{
    self, sockopt, AddressFamily, Backlog, MsgFlags, SockFlag, SockType, UnixAddr,
};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tracing::{debug, info, warn};

fn unix_addr(endpoint: &Endpoint) -> nix::Result<UnixAddr> {
    match endpoint {
        Endpoint::Abstract(name) => UnixAddr::new_abstract(name.as_bytes()),
        Endpoint::Path(path) => UnixAddr::new(path.as_path()),
    }
}

fn seqpacket_socket(flags: SockFlag) -> nix::Result<OwnedFd> {
    socket::socket(
        AddressFamily::Unix,
        SockType::SeqPacket,
        flags | SockFlag::SOCK_CLOEXEC,
        None,
    )
}

/// Bind and listen on `endpoint`.
///
/// The returned descriptor is non-blocking. A second bind of the same
/// endpoint fails with [`PipeError::BindConflict`]. For filesystem endpoints
/// a socket file left behind by a dead receiver is detected (nobody accepts
/// on it) and replaced.
pub fn listen(endpoint: &Endpoint) -> Result<OwnedFd> {
    let creation_failed = |errno: Errno| PipeError::CreationFailed {
        endpoint: endpoint.clone(),
        source: errno.into(),
    };

    let addr = unix_addr(endpoint).map_err(creation_failed)?;
    let fd = seqpacket_socket(SockFlag::SOCK_NONBLOCK).map_err(creation_failed)?;

    match socket::bind(fd.as_raw_fd(), &addr) {
        Ok(()) => {}
        Err(Errno::EADDRINUSE) if is_stale_socket_file(endpoint) => {
            warn!("Replacing stale socket file {}", endpoint);
            remove_socket_file(endpoint);
            socket::bind(fd.as_raw_fd(), &addr).map_err(creation_failed)?;
        }
        Err(Errno::EADDRINUSE) => {
            return Err(PipeError::BindConflict {
                endpoint: endpoint.clone(),
            });
        }
        Err(e) => return Err(creation_failed(e)),
    }

    let backlog = Backlog::new(ChannelConfig::LISTEN_BACKLOG).map_err(creation_failed)?;
    socket::listen(&fd, backlog).map_err(creation_failed)?;

    info!("Listening on {}", endpoint);
    Ok(fd)
}

/// A filesystem endpoint whose file exists but refuses connections.
fn is_stale_socket_file(endpoint: &Endpoint) -> bool {
    let Some(path) = endpoint.socket_path() else {
        return false;
    };
    if !path.exists() {
        return false;
    }
    matches!(connect(endpoint), Err(Errno::ECONNREFUSED))
}

/// Accept one pending peer connection.
///
/// The accepted descriptor is non-blocking and close-on-exec.
// SAFETY boundary: nix hands back a raw descriptor from accept4.
#[allow(unsafe_code)]
pub fn accept(listener: &OwnedFd) -> nix::Result<OwnedFd> {
    let raw = socket::accept4(
        listener.as_raw_fd(),
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
    )?;
    // SAFETY: accept4 succeeded, so `raw` is a freshly opened descriptor that
    // nothing else owns; wrapping it transfers sole ownership to the OwnedFd.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Full length of the next pending message without consuming it.
///
/// Returns `Ok(0)` when the peer has closed the connection.
pub fn pending_message_len(fd: &OwnedFd) -> nix::Result<usize> {
    let mut probe = [0u8; 0];
    socket::recv(
        fd.as_raw_fd(),
        &mut probe,
        MsgFlags::MSG_PEEK | MsgFlags::MSG_TRUNC | MsgFlags::MSG_DONTWAIT,
    )
}

/// Consume the next pending message into `buf`.
pub fn recv_message(fd: &OwnedFd, buf: &mut [u8]) -> nix::Result<usize> {
    socket::recv(fd.as_raw_fd(), buf, MsgFlags::MSG_DONTWAIT)
}

/// Open a blocking outbound connection to `endpoint`.
pub fn connect(endpoint: &Endpoint) -> nix::Result<OwnedFd> {
    let addr = unix_addr(endpoint)?;
    let fd = seqpacket_socket(SockFlag::empty())?;
    socket::connect(fd.as_raw_fd(), &addr)?;
    Ok(fd)
}

/// Write one message. Never raises `SIGPIPE`.
pub fn send_message(fd: &OwnedFd, buf: &[u8]) -> nix::Result<usize> {
    socket::send(fd.as_raw_fd(), buf, MsgFlags::MSG_NOSIGNAL)
}

pub fn set_send_buffer_size(fd: &OwnedFd, size: usize) -> nix::Result<()> {
    socket::setsockopt(fd, sockopt::SndBuf, &size)
}

/// Raise `SO_SNDBUF` so a message of `size` bytes fits, returning the
/// effective buffer size.
///
/// A seqpacket send fails with `EMSGSIZE` once the message exceeds the send
/// buffer. Unprivileged callers are capped at `net.core.wmem_max`; a caller
/// with `CAP_NET_ADMIN` is raised past it with `SO_SNDBUFFORCE`.
pub fn grow_send_buffer(fd: &OwnedFd, size: usize) -> nix::Result<usize> {
    socket::setsockopt(fd, sockopt::SndBuf, &size)?;
    let current = socket::getsockopt(fd, sockopt::SndBuf)?;
    if current >= size {
        return Ok(current);
    }

    match socket::setsockopt(fd, sockopt::SndBufForce, &size) {
        Ok(()) => socket::getsockopt(fd, sockopt::SndBuf),
        Err(Errno::EPERM) => {
            debug!("Send buffer capped at {} bytes (wanted {})", current, size);
            Ok(current)
        }
        Err(e) => Err(e),
    }
}

/// Remove the socket file behind a filesystem endpoint. No-op for abstract
/// endpoints.
pub fn remove_socket_file(endpoint: &Endpoint) {
    if let Some(path) = endpoint.socket_path() {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed socket file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove socket file {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::format_name;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unique_endpoint(tag: &str) -> Endpoint {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format_name(&format!("socket-test-{}-{}-{}", tag, std::process::id(), n))
    }

    #[test]
    fn test_listen_twice_is_bind_conflict() {
        let endpoint = unique_endpoint("conflict");
        let _first = listen(&endpoint).unwrap();

        let second = listen(&endpoint);
        assert!(matches!(second, Err(PipeError::BindConflict { .. })));
    }

    #[test]
    fn test_connect_without_listener_is_refused() {
        let endpoint = unique_endpoint("absent");
        assert_eq!(connect(&endpoint).err(), Some(Errno::ECONNREFUSED));
    }

    #[test]
    fn test_accept_with_nothing_pending_would_block() {
        let endpoint = unique_endpoint("idle");
        let listener = listen(&endpoint).unwrap();
        assert_eq!(accept(&listener).err(), Some(Errno::EAGAIN));
    }

    #[test]
    fn test_peek_reports_full_length_without_consuming() {
        let endpoint = unique_endpoint("peek");
        let listener = listen(&endpoint).unwrap();
        let client = connect(&endpoint).unwrap();
        let server = accept(&listener).unwrap();

        let payload = vec![7u8; 3000];
        assert_eq!(send_message(&client, &payload).unwrap(), 3000);

        assert_eq!(pending_message_len(&server).unwrap(), 3000);
        assert_eq!(pending_message_len(&server).unwrap(), 3000);

        let mut buf = vec![0u8; 3000];
        assert_eq!(recv_message(&server, &mut buf).unwrap(), 3000);
        assert_eq!(buf, payload);

        assert_eq!(pending_message_len(&server).err(), Some(Errno::EAGAIN));
    }

    #[test]
    fn test_message_boundaries_preserved() {
        let endpoint = unique_endpoint("bounds");
        let listener = listen(&endpoint).unwrap();
        let client = connect(&endpoint).unwrap();
        let server = accept(&listener).unwrap();

        send_message(&client, b"one").unwrap();
        send_message(&client, b"three").unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(recv_message(&server, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"one");
        assert_eq!(recv_message(&server, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"three");
    }

    #[test]
    fn test_closed_peer_reads_zero() {
        let endpoint = unique_endpoint("eof");
        let listener = listen(&endpoint).unwrap();
        let client = connect(&endpoint).unwrap();
        let server = accept(&listener).unwrap();

        drop(client);
        assert_eq!(pending_message_len(&server).unwrap(), 0);
    }

    #[test]
    fn test_stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::in_dir(dir.path(), "stale");

        let first = listen(&endpoint).unwrap();
        drop(first);
        assert!(endpoint.socket_path().unwrap().exists());

        let second = listen(&endpoint);
        assert!(second.is_ok());
    }

    #[test]
    fn test_live_socket_file_is_bind_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::in_dir(dir.path(), "live");

        let _first = listen(&endpoint).unwrap();
        assert!(matches!(
            listen(&endpoint),
            Err(PipeError::BindConflict { .. })
        ));
    }

    #[test]
    fn test_grow_send_buffer_fits_request() {
        let endpoint = unique_endpoint("sndbuf");
        let _listener = listen(&endpoint).unwrap();
        let client = connect(&endpoint).unwrap();

        let effective = grow_send_buffer(&client, 64 * 1024).unwrap();
        assert!(effective >= 64 * 1024);
        assert_eq!(socket::getsockopt(&client, sockopt::SndBuf).unwrap(), effective);
    }

    #[test]
    fn test_remove_socket_file_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        remove_socket_file(&Endpoint::in_dir(dir.path(), "never-created"));
        remove_socket_file(&format_name("abstract"));
    }
}
