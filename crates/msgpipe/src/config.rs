//! Centralized configuration for msgpipe channels.
//!
//! Constants live on [`ChannelConfig`]; per-receiver and per-sender tunables
//! are set through the builders and validated here.

use crate::error::{PipeError, Result};
use std::time::Duration;

/// Channel-wide constants.
pub struct ChannelConfig;

impl ChannelConfig {
    /// Smallest receive buffer an instance is created with.
    pub const MIN_BUFFER_SIZE: usize = 1024;
    /// Upper bound on how long the dispatch loop blocks between stop checks.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
    pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const LISTEN_BACKLOG: i32 = 128;
    /// Headroom added to a message's length when the sender raises its
    /// send buffer to fit it.
    pub const SEND_BUFFER_OVERHEAD: usize = 4096;
    /// Prefix for abstract-namespace endpoint names.
    pub const ABSTRACT_PREFIX: &'static str = "msgpipe/";
    pub const SOCKET_FILE_EXTENSION: &'static str = "sock";
    pub const WORKER_THREAD_PREFIX: &'static str = "msgpipe-";
}

/// Resolved receiver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    pub buffer_size: usize,
    pub poll_interval: Duration,
    /// Maximum number of live instances (connected peers plus the listening
    /// instance). `None` means unbounded.
    pub max_instances: Option<usize>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            buffer_size: ChannelConfig::MIN_BUFFER_SIZE,
            poll_interval: ChannelConfig::DEFAULT_POLL_INTERVAL,
            max_instances: None,
        }
    }
}

impl ReceiverConfig {
    /// Round an advisory buffer size up to the channel minimum.
    pub fn effective_buffer_size(requested: usize) -> usize {
        requested.max(ChannelConfig::MIN_BUFFER_SIZE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() || self.poll_interval > ChannelConfig::MAX_POLL_INTERVAL {
            return Err(PipeError::Config {
                message: format!(
                    "poll_interval must be in (0, {:?}], got {:?}",
                    ChannelConfig::MAX_POLL_INTERVAL,
                    self.poll_interval
                ),
            });
        }

        // One slot is always taken by the listening instance.
        if let Some(max) = self.max_instances {
            if max < 2 {
                return Err(PipeError::Config {
                    message: format!("max_instances must be at least 2, got {}", max),
                });
            }
        }

        Ok(())
    }

    /// Poll timeout in whole milliseconds, clamped to what `poll(2)` accepts.
    pub fn poll_timeout_ms(&self) -> u16 {
        let ms = self.poll_interval.as_millis().max(1);
        u16::try_from(ms).unwrap_or(u16::MAX)
    }
}

/// Resolved sender settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderConfig {
    /// Requested `SO_SNDBUF`; the kernel default when `None`.
    pub send_buffer_size: Option<usize>,
}
