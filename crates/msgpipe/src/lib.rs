//! msgpipe - Named, message-oriented local IPC channels.
//!
//! One process creates a [`Receiver`] on a channel name; any number of other
//! processes open a [`Sender`] on the same name and send discrete byte
//! messages. Message boundaries are kept by the transport (`SOCK_SEQPACKET`
//! Unix-domain sockets), so every `send` shows up as exactly one callback
//! invocation with the exact bytes sent.
//!
//! # Message size
//!
//! A seqpacket message must fit in the sender's socket send buffer. The
//! [`Sender`] raises its buffer to fit each oversized message. For an
//! unprivileged process the kernel caps the buffer at twice
//! `net.core.wmem_max` (about 416 KiB with the stock sysctl); processes with
//! `CAP_NET_ADMIN` are not bound by that ceiling. A message that still does
//! not fit fails with [`PipeError::WriteFailure`] carrying `EMSGSIZE`. The
//! receiver side has no size limit; its buffer grows to each message.
//!
//! The receiver runs a single dispatch thread that accepts peers, reads
//! messages and hands them to one callback. The callback can be replaced at
//! any time with [`Receiver::set_callback`].
//!
//! # Example
//!
//! ```rust,no_run
//! use msgpipe::{Receiver, Sender};
//!
//! let receiver = Receiver::new("example", 1024, |msg: &[u8]| {
//!     println!("got {} bytes", msg.len());
//! })?;
//!
//! let mut sender = Sender::new("example");
//! assert!(sender.send(b"ping"));
//!
//! receiver.set_callback(|msg: &[u8]| println!("{}", String::from_utf8_lossy(msg)));
//! # Ok::<(), msgpipe::PipeError>(())
//! ```

pub mod address;
pub mod config;
pub mod error;
pub mod platform;
pub mod receiver;
pub mod sender;
pub mod stop;
pub mod stream;

// Re-export commonly used types
pub use address::{format_name, Endpoint};
pub use config::{ChannelConfig, ReceiverConfig, SenderConfig};
pub use error::{PipeError, Result};
pub use receiver::{Callback, Receiver, ReceiverBuilder, StatsSnapshot};
pub use sender::{Sender, SenderBuilder};
pub use stream::MessageStream;
