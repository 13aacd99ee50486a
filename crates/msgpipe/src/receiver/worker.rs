//! The dispatch loop.
//!
//! Runs on the receiver's dedicated thread and owns the instance pool. Each
//! iteration waits (bounded by the poll interval) for the stop signal or any
//! ready instance, then drives every ready instance one step. Messages are
//! dispatched synchronously, so a connection is only re-armed after the
//! callback for its previous message has returned.

use super::callback::{CallbackRegistry, Dispatch};
use super::instance::{InstanceState, Step};
use super::pool::{InstancePool, Wake};
use super::stats::ReceiverStats;
use crate::error::PipeError;
use crate::stop::StopSignal;
use nix::errno::Errno;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

pub(crate) struct DispatchLoop {
    pool: InstancePool,
    registry: CallbackRegistry,
    stop: StopSignal,
    stats: ReceiverStats,
    poll_timeout_ms: u16,
    backoff: Duration,
}

impl DispatchLoop {
    pub(crate) fn new(
        pool: InstancePool,
        registry: CallbackRegistry,
        stop: StopSignal,
        stats: ReceiverStats,
        poll_timeout_ms: u16,
        backoff: Duration,
    ) -> Self {
        stats.set_live_instances(pool.len());
        Self {
            pool,
            registry,
            stop,
            stats,
            poll_timeout_ms,
            backoff,
        }
    }

    /// Run until the stop signal is set, then release every instance.
    pub(crate) fn run(mut self) {
        debug!("Dispatch loop started on {}", self.pool.endpoint());

        while !self.stop.is_stopped() {
            match self.pool.wait(self.stop.wake_fd(), self.poll_timeout_ms) {
                Ok(Wake::TimedOut) => continue,
                Ok(Wake::Stopped) => break,
                Ok(Wake::Ready) => self.service_ready(),
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!("Readiness wait on {} failed: {}", self.pool.endpoint(), e);
                    std::thread::sleep(self.backoff);
                }
            }
        }

        self.pool.clear();
        self.stats.set_live_instances(0);
        info!("Dispatch loop stopped");
    }

    fn service_ready(&mut self) {
        // Highest index first: removing an instance never shifts an index we
        // have yet to visit, and replacements appended now wait for the next
        // iteration.
        for index in self.pool.ready_indices().into_iter().rev() {
            if self.stop.is_stopped() {
                return;
            }
            self.step(index);
        }
        self.stats.set_live_instances(self.pool.len());
    }

    fn step(&mut self, index: usize) {
        let has_capacity = self.pool.has_capacity();
        let max_instances = self.pool.max_instances();

        let Some(instance) = self.pool.get_mut(index) else {
            trace!("Instance {} no longer live, skipping", index);
            return;
        };

        if instance.state() == InstanceState::Connecting && !has_capacity {
            match instance.reject_peer() {
                Ok(()) => {
                    self.stats.record_rejected();
                    warn!(
                        "Rejecting peer on {}: at max capacity ({:?})",
                        self.pool.endpoint(),
                        max_instances
                    );
                }
                Err(Errno::EAGAIN | Errno::EINTR | Errno::ECONNABORTED) => {}
                Err(e) => self.handle_accept_error(e),
            }
            return;
        }

        let capacity_before = instance.capacity();
        match instance.advance() {
            Step::Idle => {}
            Step::Connected { listener } => {
                self.pool.add_instance(listener);
                self.stats.record_accepted();
                debug!(
                    "Peer connected on {} ({} instance(s))",
                    self.pool.endpoint(),
                    self.pool.len()
                );
            }
            Step::AcceptFailed(e) => self.handle_accept_error(e),
            Step::Message { len } => {
                if instance.capacity() > capacity_before {
                    self.stats.record_growth();
                }
                trace!("Dispatching {} byte message from instance {}", len, index);

                if self.registry.invoke(instance.message()) == Dispatch::Panicked {
                    self.stats.record_panic();
                    error!("Message callback panicked on a {} byte message", len);
                }
                self.stats.record_dispatched();
                instance.finish_dispatch();
            }
            Step::Disconnected(cause) => {
                self.pool.remove_instance(index);
                self.stats.record_lost();
                match cause {
                    None => debug!("Peer disconnected from {}", self.pool.endpoint()),
                    Some(errno) => {
                        let err = PipeError::ConnectionLost {
                            source: errno.into(),
                        };
                        debug!("{} on {}", err, self.pool.endpoint());
                    }
                }
            }
        }
    }

    /// The Connecting instance stays armed whatever the error. The listener
    /// is still readable afterwards, so every failure backs off one poll
    /// interval instead of spinning.
    fn handle_accept_error(&self, errno: Errno) {
        self.stats.record_accept_failure();
        match errno {
            Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM => {
                let err = PipeError::ResourceExhausted {
                    message: format!("accept on {} failed: {}", self.pool.endpoint(), errno),
                };
                warn!("{}", err);
            }
            _ => warn!("Accept on {} failed: {}", self.pool.endpoint(), errno),
        }
        std::thread::sleep(self.backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{format_name, Endpoint};
    use crate::config::ReceiverConfig;
    use crate::platform;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn unique_endpoint() -> Endpoint {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format_name(&format!("worker-test-{}-{}", std::process::id(), n))
    }

    struct Harness {
        dispatch: DispatchLoop,
        endpoint: Endpoint,
        log: Arc<Mutex<Vec<Vec<u8>>>>,
        stats: ReceiverStats,
    }

    fn harness(config: ReceiverConfig) -> Harness {
        let endpoint = unique_endpoint();
        let pool = InstancePool::initialize(endpoint.clone(), &config).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let registry = CallbackRegistry::new(Box::new(move |msg: &[u8]| {
            sink.lock().unwrap().push(msg.to_vec());
        }));
        let stats = ReceiverStats::default();
        let dispatch = DispatchLoop::new(
            pool,
            registry,
            StopSignal::new().unwrap(),
            stats.clone(),
            10,
            Duration::from_millis(1),
        );
        Harness {
            dispatch,
            endpoint,
            log,
            stats,
        }
    }

    /// Run loop iterations by hand until `done` holds or a second passes.
    fn pump(dispatch: &mut DispatchLoop, mut done: impl FnMut(&DispatchLoop) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(1);
        while !done(dispatch) && Instant::now() < deadline {
            if let Ok(Wake::Ready) = dispatch.pool.wait(dispatch.stop.wake_fd(), 10) {
                dispatch.service_ready();
            }
        }
    }

    #[test]
    fn test_connect_and_dispatch() {
        let mut h = harness(ReceiverConfig::default());
        let client = platform::connect(&h.endpoint).unwrap();
        platform::send_message(&client, b"ping").unwrap();

        let log = Arc::clone(&h.log);
        pump(&mut h.dispatch, |_| log.lock().unwrap().len() == 1);

        assert_eq!(*h.log.lock().unwrap(), vec![b"ping".to_vec()]);
        assert_eq!(h.dispatch.pool.len(), 2);
        assert_eq!(h.dispatch.pool.connecting_count(), 1);
        let snap = h.stats.snapshot();
        assert_eq!(snap.connections_accepted, 1);
        assert_eq!(snap.messages_dispatched, 1);
    }

    #[test]
    fn test_disconnect_removes_instance() {
        let mut h = harness(ReceiverConfig::default());
        let client = platform::connect(&h.endpoint).unwrap();
        pump(&mut h.dispatch, |d| d.pool.len() == 2);

        drop(client);
        pump(&mut h.dispatch, |d| d.pool.len() == 1);

        assert_eq!(h.dispatch.pool.len(), 1);
        assert_eq!(h.dispatch.pool.connecting_count(), 1);
        assert_eq!(h.stats.snapshot().connections_lost, 1);
    }

    #[test]
    fn test_over_capacity_peer_is_rejected() {
        let mut h = harness(ReceiverConfig {
            max_instances: Some(2),
            ..Default::default()
        });
        let _first = platform::connect(&h.endpoint).unwrap();
        pump(&mut h.dispatch, |d| d.pool.len() == 2);

        let _second = platform::connect(&h.endpoint).unwrap();
        let stats = h.stats.clone();
        pump(&mut h.dispatch, |_| stats.snapshot().connections_rejected == 1);

        assert_eq!(h.dispatch.pool.len(), 2);
        assert_eq!(h.dispatch.pool.connecting_count(), 1);
    }

    #[test]
    fn test_panicking_callback_keeps_connection() {
        let mut h = harness(ReceiverConfig::default());
        h.dispatch
            .registry
            .set(Box::new(|_: &[u8]| panic!("callback failure")));

        let client = platform::connect(&h.endpoint).unwrap();
        platform::send_message(&client, b"boom").unwrap();
        let stats = h.stats.clone();
        pump(&mut h.dispatch, |_| stats.snapshot().callback_panics == 1);

        assert_eq!(h.dispatch.pool.len(), 2);
        assert_eq!(h.stats.snapshot().connections_lost, 0);
    }

    #[test]
    fn test_accept_errors_back_off_and_keep_listener() {
        let mut h = harness(ReceiverConfig::default());
        h.dispatch.backoff = Duration::from_millis(20);

        for errno in [Errno::EMFILE, Errno::EPROTO] {
            let started = Instant::now();
            h.dispatch.handle_accept_error(errno);
            assert!(started.elapsed() >= Duration::from_millis(20));
        }

        assert_eq!(h.stats.snapshot().accept_failures, 2);
        assert_eq!(h.dispatch.pool.len(), 1);
        assert_eq!(h.dispatch.pool.connecting_count(), 1);

        // The listener still accepts once the failure clears.
        let client = platform::connect(&h.endpoint).unwrap();
        platform::send_message(&client, b"after failure").unwrap();
        let log = Arc::clone(&h.log);
        pump(&mut h.dispatch, |_| log.lock().unwrap().len() == 1);
        assert_eq!(*h.log.lock().unwrap(), vec![b"after failure".to_vec()]);
    }

    #[test]
    fn test_run_exits_on_stop_and_releases_endpoint() {
        let h = harness(ReceiverConfig::default());
        let stop = h.dispatch.stop.clone();
        let endpoint = h.endpoint.clone();
        let worker = std::thread::spawn(move || h.dispatch.run());

        stop.stop();
        worker.join().unwrap();

        assert_eq!(h.stats.snapshot().live_instances, 0);
        assert!(platform::listen(&endpoint).is_ok());
    }
}
