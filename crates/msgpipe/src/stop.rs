//! One-shot stop signal for the dispatch loop.
//!
//! The flag alone would leave the worker blocked in `poll(2)` until its
//! timeout expires, so setting it also writes a byte into a socket pair whose
//! read end sits in the worker's poll set.

use std::io::{ErrorKind, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// A stop signal shared between a receiver handle and its worker thread.
///
/// Cloning shares state. Once [`StopSignal::stop`] has been called every
/// clone observes it; the signal is never reset.
#[derive(Debug, Clone)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    stopped: AtomicBool,
    wake_rx: UnixStream,
    wake_tx: UnixStream,
}

impl StopSignal {
    pub fn new() -> std::io::Result<Self> {
        let (wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;

        Ok(Self {
            inner: Arc::new(Inner {
                stopped: AtomicBool::new(false),
                wake_rx,
                wake_tx,
            }),
        })
    }

    /// Request stop and wake the worker.
    ///
    /// Returns `false` if the signal had already been set.
    pub fn stop(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }

        match (&self.inner.wake_tx).write(&[1]) {
            Ok(_) => {}
            // A full socket buffer already guarantees a pending wakeup.
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => trace!("Stop wakeup write failed: {}", e),
        }
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Descriptor that becomes readable once the signal is set.
    pub fn wake_fd(&self) -> BorrowedFd<'_> {
        self.inner.wake_rx.as_fd()
    }
}
