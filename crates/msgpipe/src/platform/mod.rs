//! Platform abstraction layer.
//!
//! All OS socket calls live here so the receiver and sender only deal with
//! owned descriptors and `nix` error codes.
//!
//! # Supported Platforms
//!
//! - **Linux / Android**: Full support (`SOCK_SEQPACKET` + abstract namespace)
//! - **Other Unix**: Not supported; there is no message-mode local socket
//!   with the same semantics

#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("msgpipe requires Linux or Android (SOCK_SEQPACKET with MSG_TRUNC peeking)");

pub mod socket;

pub use socket::{
    accept, connect, grow_send_buffer, listen, pending_message_len, recv_message,
    remove_socket_file, send_message, set_send_buffer_size,
};
