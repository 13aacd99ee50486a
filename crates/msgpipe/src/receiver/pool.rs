//! The set of live instances for one channel.
//!
//! `instances[i]` and `readiness[i]` always describe the same connection;
//! every mutation touches both vectors. The pool is owned by the dispatch
//! loop, so none of this needs locking.

use super::instance::{Instance, InstanceState};
use crate::address::Endpoint;
use crate::config::ReceiverConfig;
use crate::error::Result;
use crate::platform;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use tracing::debug;

/// Outcome of [`InstancePool::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    TimedOut,
    /// The stop signal's wake descriptor fired.
    Stopped,
    /// At least one instance is ready.
    Ready,
}

pub struct InstancePool {
    endpoint: Endpoint,
    buffer_size: usize,
    max_instances: Option<usize>,
    instances: Vec<Instance>,
    readiness: Vec<PollFlags>,
}

impl InstancePool {
    /// Bind the endpoint and create the first Connecting instance.
    ///
    /// Fails with a creation error if the endpoint cannot be bound.
    pub fn initialize(endpoint: Endpoint, config: &ReceiverConfig) -> Result<Self> {
        let listener = platform::listen(&endpoint)?;
        let buffer_size = ReceiverConfig::effective_buffer_size(config.buffer_size);

        let mut pool = Self {
            endpoint,
            buffer_size,
            max_instances: config.max_instances,
            instances: Vec::new(),
            readiness: Vec::new(),
        };
        pool.add_instance(listener);
        Ok(pool)
    }

    /// Append a new Connecting instance around `listener`. Returns its index.
    pub fn add_instance(&mut self, listener: OwnedFd) -> usize {
        self.instances
            .push(Instance::connecting(listener, self.buffer_size));
        self.readiness.push(PollFlags::empty());
        debug_assert_eq!(self.instances.len(), self.readiness.len());
        self.instances.len() - 1
    }

    /// Drop the instance at `index`, closing its handle.
    ///
    /// Returns `false` if `index` is out of range.
    pub fn remove_instance(&mut self, index: usize) -> bool {
        if index >= self.instances.len() {
            return false;
        }
        self.instances.remove(index);
        self.readiness.remove(index);
        debug_assert_eq!(self.instances.len(), self.readiness.len());
        true
    }

    /// Drop every instance. Teardown only.
    pub fn clear(&mut self) {
        if self.instances.is_empty() {
            return;
        }
        debug!("Releasing {} instance(s) on {}", self.instances.len(), self.endpoint);
        self.instances.clear();
        self.readiness.clear();
        platform::remove_socket_file(&self.endpoint);
    }

    /// Whether another peer can be admitted under `max_instances`.
    pub fn has_capacity(&self) -> bool {
        match self.max_instances {
            Some(max) => self.instances.len() < max,
            None => true,
        }
    }

    /// Block up to `timeout_ms` for readiness on the wake descriptor or any
    /// instance, recording per-instance readiness for [`ready_indices`].
    ///
    /// [`ready_indices`]: InstancePool::ready_indices
    pub fn wait(&mut self, wake: BorrowedFd<'_>, timeout_ms: u16) -> nix::Result<Wake> {
        let mut fds = Vec::with_capacity(self.instances.len() + 1);
        fds.push(PollFd::new(wake, PollFlags::POLLIN));
        fds.extend(
            self.instances
                .iter()
                .map(|instance| PollFd::new(instance.as_fd(), interest(instance.state()))),
        );

        let ready = poll(&mut fds, PollTimeout::from(timeout_ms))?;

        let stopped = fds[0].revents().is_some_and(|r| !r.is_empty());
        for (slot, fd) in self.readiness.iter_mut().zip(&fds[1..]) {
            *slot = fd.revents().unwrap_or_else(PollFlags::empty);
        }

        Ok(if stopped {
            Wake::Stopped
        } else if ready == 0 {
            Wake::TimedOut
        } else {
            Wake::Ready
        })
    }

    /// Indices the last [`wait`](InstancePool::wait) reported ready, in
    /// ascending order.
    pub fn ready_indices(&self) -> Vec<usize> {
        self.readiness
            .iter()
            .enumerate()
            .filter(|(_, flags)| !flags.is_empty())
            .map(|(index, _)| index)
            .collect()
    }

    /// The instance at `index`, if it is still live.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Instance> {
        self.instances.get_mut(index)
    }

    pub fn max_instances(&self) -> Option<usize> {
        self.max_instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn connecting_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|instance| instance.state() == InstanceState::Connecting)
            .count()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for InstancePool {
    fn drop(&mut self) {
        self.clear();
    }
}

fn interest(state: InstanceState) -> PollFlags {
    match state {
        InstanceState::Connecting | InstanceState::Reading => PollFlags::POLLIN,
        // Errors and hangups are still reported with an empty interest set.
        InstanceState::Dispatching => PollFlags::empty(),
    }
}
