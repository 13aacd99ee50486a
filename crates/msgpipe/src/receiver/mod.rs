//! Receiving side of a channel.
//!
//! A [`Receiver`] binds a named endpoint, accepts any number of peers and
//! hands every complete message to one replaceable callback. All socket work
//! happens on a dedicated thread; the handle only holds the callback slot, the
//! stop signal and the thread's join handle.
//!
//! # Thread Safety
//!
//! `set_callback` may be called from any thread while messages are being
//! dispatched. It blocks until an in-flight dispatch finishes, so it must not
//! be called from inside the callback.

pub mod callback;
pub mod instance;
pub mod pool;
pub mod stats;
mod worker;

pub use callback::{Callback, CallbackRegistry};
pub use stats::{ReceiverStats, StatsSnapshot};

use crate::address::Endpoint;
use crate::config::{ChannelConfig, ReceiverConfig};
use crate::error::{PipeError, Result};
use crate::stop::StopSignal;
use pool::InstancePool;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};
use worker::DispatchLoop;

/// Handle to a running receiver. Dropping it stops the dispatch loop and
/// releases the endpoint.
pub struct Receiver {
    name: String,
    endpoint: Endpoint,
    registry: CallbackRegistry,
    stats: ReceiverStats,
    stop: StopSignal,
    worker: Option<JoinHandle<()>>,
}

impl Receiver {
    /// Bind `name` and start dispatching to `callback`.
    ///
    /// `buffer_size` is advisory: it is rounded up to
    /// [`ChannelConfig::MIN_BUFFER_SIZE`] and grows per oversized message.
    pub fn new<F>(name: &str, buffer_size: usize, callback: F) -> Result<Self>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        Self::builder(name)
            .buffer_size(buffer_size)
            .callback(callback)
            .build()
    }

    pub fn builder(name: impl Into<String>) -> ReceiverBuilder {
        ReceiverBuilder::new(name)
    }

    /// Replace the message callback.
    ///
    /// Takes effect for every dispatch that starts after this returns.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.registry.set(Box::new(callback));
        debug!("Callback replaced on {}", self.endpoint);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the dispatch loop is still running.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Stop the dispatch loop and wait for it to release every instance.
    ///
    /// Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        self.stop.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Dispatch loop for {} panicked", self.endpoint);
            }
            info!("Receiver on {} shut down", self.endpoint);
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Builder for configuring a [`Receiver`].
///
/// # Example
///
/// ```rust,no_run
/// use msgpipe::Receiver;
/// use std::time::Duration;
///
/// let receiver = Receiver::builder("telemetry")
///     .buffer_size(4096)
///     .poll_interval(Duration::from_millis(5))
///     .callback(|msg: &[u8]| println!("{} bytes", msg.len()))
///     .build()?;
/// # Ok::<(), msgpipe::PipeError>(())
/// ```
pub struct ReceiverBuilder {
    name: String,
    config: ReceiverConfig,
    socket_dir: Option<PathBuf>,
    callback: Option<Callback>,
}

impl ReceiverBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ReceiverConfig::default(),
            socket_dir: None,
            callback: None,
        }
    }

    /// Initial receive buffer size per instance.
    ///
    /// Default: [`ChannelConfig::MIN_BUFFER_SIZE`]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Upper bound on how long the dispatch loop blocks before re-checking
    /// the stop signal.
    ///
    /// Default: [`ChannelConfig::DEFAULT_POLL_INTERVAL`]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Cap on live instances, the listening one included. Peers connecting
    /// beyond the cap are accepted and closed immediately.
    ///
    /// Default: unbounded
    pub fn max_instances(mut self, max: usize) -> Self {
        self.config.max_instances = Some(max);
        self
    }

    /// Bind a socket file in `dir` instead of an abstract-namespace name.
    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Bind the endpoint and start the dispatch loop.
    ///
    /// Fails with [`PipeError::BindConflict`] if another receiver already
    /// owns the endpoint and [`PipeError::CreationFailed`] if it cannot be
    /// created for any other reason.
    pub fn build(self) -> Result<Receiver> {
        self.config.validate()?;

        let endpoint = Endpoint::resolve(&self.name, self.socket_dir.as_deref());
        let pool = InstancePool::initialize(endpoint.clone(), &self.config)?;

        let stop = StopSignal::new().map_err(|e| PipeError::CreationFailed {
            endpoint: endpoint.clone(),
            source: e,
        })?;
        let callback = self
            .callback
            .unwrap_or_else(|| Box::new(|_: &[u8]| {}) as Callback);
        let registry = CallbackRegistry::new(callback);
        let stats = ReceiverStats::default();

        let dispatch = DispatchLoop::new(
            pool,
            registry.clone(),
            stop.clone(),
            stats.clone(),
            self.config.poll_timeout_ms(),
            self.config.poll_interval,
        );

        let worker = std::thread::Builder::new()
            .name(format!("{}{}", ChannelConfig::WORKER_THREAD_PREFIX, self.name))
            .spawn(move || dispatch.run())
            .map_err(|e| PipeError::CreationFailed {
                endpoint: endpoint.clone(),
                source: e,
            })?;

        info!("Receiver started on {}", endpoint);

        Ok(Receiver {
            name: self.name,
            endpoint,
            registry,
            stats,
            stop,
            worker: Some(worker),
        })
    }
}
