//! One connection's state machine.
//!
//! ```text
//!   Connecting ──accept──▶ Reading ──message──▶ Dispatching
//!       ▲   (listener handed       ▲                  │
//!       │    to a new instance)    └──finish_dispatch─┘
//!       └─ accept error: stays Connecting
//! ```
//!
//! A Connecting instance owns the listening socket. When a peer connects it
//! swaps the listener for the accepted socket and hands the listener back to
//! the pool, so exactly one instance ever owns it.

use crate::platform;
use nix::errno::Errno;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Connecting,
    Reading,
    Dispatching,
}

/// Result of driving an instance one step.
#[derive(Debug)]
pub enum Step {
    /// Readiness was spurious; the instance is unchanged.
    Idle,
    /// A peer connected. The instance is now Reading and the listening socket
    /// must be wrapped in a replacement Connecting instance.
    Connected { listener: OwnedFd },
    /// Accepting failed; the instance is still Connecting.
    AcceptFailed(Errno),
    /// A complete message is ready; the instance is Dispatching.
    Message { len: usize },
    /// The peer went away (`None`) or its socket failed.
    Disconnected(Option<Errno>),
}

pub struct Instance {
    handle: OwnedFd,
    buffer: Vec<u8>,
    state: InstanceState,
    pending: bool,
    message_len: usize,
}

impl Instance {
    /// Wrap a listening socket in a new Connecting instance.
    pub fn connecting(listener: OwnedFd, buffer_size: usize) -> Self {
        Self {
            handle: listener,
            buffer: vec![0; buffer_size],
            state: InstanceState::Connecting,
            pending: true,
            message_len: 0,
        }
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// True while the instance is armed and waiting on the OS.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Drive the instance one step after its handle became ready.
    pub fn advance(&mut self) -> Step {
        match self.state {
            InstanceState::Connecting => self.complete_connect(),
            InstanceState::Reading => self.complete_read(),
            // The message has not been handed off yet; nothing to read.
            InstanceState::Dispatching => Step::Idle,
        }
    }

    fn complete_connect(&mut self) -> Step {
        match platform::accept(&self.handle) {
            Ok(peer) => {
                let listener = std::mem::replace(&mut self.handle, peer);
                self.state = InstanceState::Reading;
                self.pending = true;
                Step::Connected { listener }
            }
            // The peer gave up between readiness and accept.
            Err(Errno::EAGAIN | Errno::EINTR | Errno::ECONNABORTED) => Step::Idle,
            Err(e) => Step::AcceptFailed(e),
        }
    }

    fn complete_read(&mut self) -> Step {
        let len = match platform::pending_message_len(&self.handle) {
            Ok(0) => return Step::Disconnected(None),
            Ok(len) => len,
            Err(Errno::EAGAIN | Errno::EINTR) => return Step::Idle,
            Err(e) => return Step::Disconnected(Some(e)),
        };

        if len > self.buffer.len() {
            debug!(
                "Growing receive buffer from {} to {} bytes ({} outstanding)",
                self.buffer.len(),
                len,
                len - self.buffer.len()
            );
            self.buffer.resize(len, 0);
        }

        match platform::recv_message(&self.handle, &mut self.buffer) {
            Ok(0) => Step::Disconnected(None),
            Ok(read) => {
                self.message_len = read;
                self.state = InstanceState::Dispatching;
                self.pending = false;
                Step::Message { len: read }
            }
            Err(Errno::EAGAIN | Errno::EINTR) => Step::Idle,
            Err(e) => Step::Disconnected(Some(e)),
        }
    }

    /// Accept a pending peer and close it straight away. The instance stays
    /// Connecting.
    pub fn reject_peer(&mut self) -> nix::Result<()> {
        platform::accept(&self.handle).map(drop)
    }

    /// The completed message. Empty unless the instance is Dispatching.
    pub fn message(&self) -> &[u8] {
        match self.state {
            InstanceState::Dispatching => &self.buffer[..self.message_len],
            _ => &[],
        }
    }

    /// Re-arm for the next message on the same connection.
    pub fn finish_dispatch(&mut self) {
        if self.state == InstanceState::Dispatching {
            self.state = InstanceState::Reading;
            self.pending = true;
            self.message_len = 0;
        }
    }
}

impl AsFd for Instance {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.handle.as_fd()
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("state", &self.state)
            .field("pending", &self.pending)
            .field("capacity", &self.buffer.len())
            .finish()
    }
}
