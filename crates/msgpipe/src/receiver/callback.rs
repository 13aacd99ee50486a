//! The replaceable message handler.
//!
//! `set` and `invoke` share one mutex, so a callback is never swapped out
//! halfway through a message and two messages are never handled at once.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Message handler: receives one complete message per call.
pub type Callback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// The callback panicked; the panic was contained.
    Panicked,
}

/// Shared slot holding the active callback.
#[derive(Clone)]
pub struct CallbackRegistry {
    slot: Arc<Mutex<Callback>>,
}

impl CallbackRegistry {
    pub fn new(callback: Callback) -> Self {
        Self {
            slot: Arc::new(Mutex::new(callback)),
        }
    }

    /// Replace the active callback.
    ///
    /// Blocks while a dispatch is in progress. Must not be called from inside
    /// the callback itself.
    pub fn set(&self, callback: Callback) {
        *self.lock() = callback;
    }

    /// Run the active callback on `message`.
    pub fn invoke(&self, message: &[u8]) -> Dispatch {
        let mut guard = self.lock();
        let callback = &mut **guard;
        match panic::catch_unwind(AssertUnwindSafe(|| callback(message))) {
            Ok(()) => Dispatch::Delivered,
            Err(_) => Dispatch::Panicked,
        }
    }

    // A panic inside the callback is caught before the guard drops, but a
    // panicking `set` caller could still poison the lock.
    fn lock(&self) -> MutexGuard<'_, Callback> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry").finish_non_exhaustive()
    }
}
