//! Async adapter for tokio consumers.
//!
//! The dispatch loop runs on its own thread regardless; this only swaps the
//! callback for one that forwards each message into an unbounded channel.

use crate::error::Result;
use crate::receiver::Receiver;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

/// Messages dispatched by a [`Receiver`], in dispatch order.
///
/// The stream ends once the receiver is dropped, or once its callback is
/// replaced with [`Receiver::set_callback`].
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MessageStream {
    /// Wait for the next message. Returns `None` when the stream has ended
    /// and every buffered message has been taken.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take a buffered message without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// A callback that copies each message into `tx`.
fn forward_to(tx: mpsc::UnboundedSender<Bytes>) -> impl FnMut(&[u8]) + Send + 'static {
    move |message: &[u8]| {
        if tx.send(Bytes::copy_from_slice(message)).is_err() {
            trace!("Message stream dropped, discarding {} byte message", message.len());
        }
    }
}

impl Receiver {
    /// Bind `name` and deliver its messages through a [`MessageStream`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn run() -> msgpipe::Result<()> {
    /// let (_receiver, mut messages) = msgpipe::Receiver::channel("telemetry", 4096)?;
    /// while let Some(message) = messages.recv().await {
    ///     println!("{} bytes", message.len());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn channel(name: &str, buffer_size: usize) -> Result<(Receiver, MessageStream)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let receiver = Receiver::new(name, buffer_size, forward_to(tx))?;
        Ok((receiver, MessageStream { rx }))
    }
}
