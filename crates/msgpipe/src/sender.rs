//! Sending side of a channel.
//!
//! A [`Sender`] writes one message per call on the caller's thread. It
//! connects lazily: a receiver that is not up yet does not fail construction,
//! and a connection that went stale is re-opened exactly once per send before
//! the send is reported as failed.

use crate::address::Endpoint;
use crate::config::{ChannelConfig, SenderConfig};
use crate::error::{PipeError, Result};
use crate::platform;
use nix::errno::Errno;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use tracing::{debug, trace, warn};

/// Outbound connection to a named channel.
#[derive(Debug)]
pub struct Sender {
    endpoint: Endpoint,
    config: SenderConfig,
    handle: Option<OwnedFd>,
}

impl Sender {
    /// Create a sender for `name` and try to connect straight away.
    pub fn new(name: &str) -> Self {
        SenderBuilder::new(name).build()
    }

    pub fn builder(name: impl Into<String>) -> SenderBuilder {
        SenderBuilder::new(name)
    }

    fn with_config(endpoint: Endpoint, config: SenderConfig) -> Self {
        let mut sender = Self {
            endpoint,
            config,
            handle: None,
        };
        if let Err(e) = sender.connect() {
            debug!("Deferred connect to {}: {}", sender.endpoint, e);
        }
        sender
    }

    /// Send one message. Returns `false` if it could not be delivered to the
    /// transport after one reconnect attempt.
    pub fn send(&mut self, message: &[u8]) -> bool {
        match self.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Send to {} failed: {}", self.endpoint, e);
                false
            }
        }
    }

    /// Send one message, reporting why it failed.
    ///
    /// On success the kernel has accepted the whole message; seqpacket sends
    /// are all-or-nothing and nothing is buffered in user space. A message
    /// larger than the send buffer raises the buffer to fit, within the
    /// ceiling set by `net.core.wmem_max` unless the process holds
    /// `CAP_NET_ADMIN`.
    pub fn try_send(&mut self, message: &[u8]) -> Result<()> {
        if message.is_empty() {
            return Err(PipeError::EmptyMessage);
        }

        match self.write_sized(message) {
            Ok(()) => return Ok(()),
            Err(errno) if is_stale(errno) => {
                debug!("Connection to {} is stale ({}), reconnecting", self.endpoint, errno);
            }
            Err(errno) => return Err(self.write_failure(errno)),
        }

        self.connect().map_err(|errno| self.write_failure(errno))?;
        self.write_sized(message)
            .map_err(|errno| self.write_failure(errno))
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Write once, growing the send buffer and writing again if the message
    /// does not fit.
    fn write_sized(&mut self, message: &[u8]) -> std::result::Result<(), Errno> {
        match self.write_once(message) {
            Err(Errno::EMSGSIZE) => {
                self.grow_send_buffer(message.len())?;
                self.write_once(message)
            }
            result => result,
        }
    }

    fn write_once(&mut self, message: &[u8]) -> std::result::Result<(), Errno> {
        let Some(handle) = &self.handle else {
            return Err(Errno::EBADF);
        };

        match platform::send_message(handle, message) {
            Ok(written) if written == message.len() => {
                trace!("Sent {} byte message to {}", written, self.endpoint);
                Ok(())
            }
            // Seqpacket sends are atomic; a short count means the socket is
            // not behaving as a message-mode channel.
            Ok(_) => Err(Errno::EIO),
            Err(errno) => {
                if is_stale(errno) {
                    self.handle = None;
                }
                Err(errno)
            }
        }
    }

    fn grow_send_buffer(&self, message_len: usize) -> std::result::Result<(), Errno> {
        let Some(handle) = &self.handle else {
            return Err(Errno::EBADF);
        };

        let wanted = message_len.saturating_add(ChannelConfig::SEND_BUFFER_OVERHEAD);
        let effective = platform::grow_send_buffer(handle, wanted)?;
        debug!(
            "Raised send buffer on {} to {} bytes for a {} byte message",
            self.endpoint, effective, message_len
        );
        Ok(())
    }

    fn connect(&mut self) -> std::result::Result<(), Errno> {
        self.handle = None;
        let handle = platform::connect(&self.endpoint)?;

        if let Some(size) = self.config.send_buffer_size {
            if let Err(e) = platform::set_send_buffer_size(&handle, size) {
                warn!("Failed to set send buffer size on {}: {}", self.endpoint, e);
            }
        }

        debug!("Connected to {}", self.endpoint);
        self.handle = Some(handle);
        Ok(())
    }

    fn write_failure(&self, errno: Errno) -> PipeError {
        PipeError::WriteFailure {
            endpoint: self.endpoint.clone(),
            source: errno.into(),
        }
    }
}

/// Errors after which a fresh connection may succeed.
fn is_stale(errno: Errno) -> bool {
    matches!(
        errno,
        Errno::EBADF | Errno::EPIPE | Errno::ECONNRESET | Errno::ENOTCONN | Errno::ECONNREFUSED
    )
}

/// Builder for configuring a [`Sender`].
pub struct SenderBuilder {
    name: String,
    socket_dir: Option<PathBuf>,
    config: SenderConfig,
}

impl SenderBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            socket_dir: None,
            config: SenderConfig::default(),
        }
    }

    /// Connect to a socket file in `dir`; must match the receiver's setting.
    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    /// Request a kernel send buffer of `size` bytes up front. Without it the
    /// buffer starts at the kernel default and is raised on the first
    /// message that does not fit.
    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.config.send_buffer_size = Some(size);
        self
    }

    pub fn build(self) -> Sender {
        let endpoint = Endpoint::resolve(&self.name, self.socket_dir.as_deref());
        Sender::with_config(endpoint, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::format_name;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unique_name(tag: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("sender-unit-{}-{}-{}", tag, std::process::id(), n)
    }

    #[test]
    fn test_new_without_receiver_is_deferred() {
        let sender = Sender::new(&unique_name("deferred"));
        assert!(!sender.is_connected());
    }

    #[test]
    fn test_send_without_receiver_fails() {
        let mut sender = Sender::new(&unique_name("absent"));
        assert!(!sender.send(b"ping"));

        match sender.try_send(b"ping") {
            Err(PipeError::WriteFailure { source, .. }) => {
                assert_eq!(source.raw_os_error(), Some(Errno::ECONNREFUSED as i32));
            }
            other => panic!("Expected WriteFailure, got: {:?}", other),
        }
    }

    #[test]
    fn test_empty_message_rejected() {
        let mut sender = Sender::new(&unique_name("empty"));
        assert!(matches!(sender.try_send(b""), Err(PipeError::EmptyMessage)));
    }

    #[test]
    fn test_connects_when_listener_exists() {
        let name = unique_name("listening");
        let _listener = platform::listen(&format_name(&name)).unwrap();

        let mut sender = Sender::new(&name);
        assert!(sender.is_connected());
        assert!(sender.send(b"queued in backlog"));
    }

    #[test]
    fn test_oversized_message_raises_send_buffer() {
        let name = unique_name("oversized");
        let endpoint = format_name(&name);
        let listener = platform::listen(&endpoint).unwrap();

        let mut sender = Sender::builder(name.as_str())
            .send_buffer_size(4096)
            .build();
        let payload = vec![9u8; 32 * 1024];
        assert!(sender.try_send(&payload).is_ok());

        let peer = platform::accept(&listener).unwrap();
        let mut buf = vec![0u8; payload.len()];
        assert_eq!(platform::recv_message(&peer, &mut buf).unwrap(), payload.len());
        assert_eq!(buf, payload);
    }

    #[test]
    fn test_stale_errors() {
        assert!(is_stale(Errno::EPIPE));
        assert!(is_stale(Errno::ENOTCONN));
        assert!(!is_stale(Errno::EMSGSIZE));
    }

    #[test]
    fn test_builder_socket_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sender = Sender::builder("filesystem")
            .socket_dir(dir.path())
            .send_buffer_size(64 * 1024)
            .build();
        assert_eq!(
            sender.endpoint().socket_path(),
            Some(dir.path().join("filesystem.sock").as_path())
        );
        assert!(!sender.is_connected());
    }
}
