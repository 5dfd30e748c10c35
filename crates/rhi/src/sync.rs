//! Host-side fence used by the software and test devices.
//!
//! [`HostFence`] is a monotonically increasing counter that a device worker
//! thread advances and that the frame thread waits on. It has the same
//! contract as a GPU timeline fence:
//!
//! - the completed value never decreases, stale signals are ignored
//! - a wait for a value that already completed returns without blocking
//! - once the fence is marked lost, waits return [`RhiError::DeviceLost`]
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use kiln_rhi::device::DeviceFence;
//! use kiln_rhi::sync::HostFence;
//!
//! let fence = Arc::new(HostFence::new(0));
//! let worker = {
//!     let fence = fence.clone();
//!     std::thread::spawn(move || fence.signal(1))
//! };
//! fence.wait_for_value(1).unwrap();
//! worker.join().unwrap();
//! assert_eq!(fence.completed_value().unwrap(), 1);
//! ```

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::device::{DeviceFence, FenceValue};
use crate::error::{RhiError, RhiResult};

#[derive(Debug)]
struct FenceState {
    completed: FenceValue,
    lost: bool,
}

/// CPU-side timeline fence.
///
/// # Thread Safety
///
/// All methods take `&self`; the fence is meant to be shared through `Arc`
/// between the thread that signals and the thread that waits.
#[derive(Debug)]
pub struct HostFence {
    state: Mutex<FenceState>,
    changed: Condvar,
}

impl HostFence {
    /// Creates a fence whose completed value starts at `initial_value`.
    pub fn new(initial_value: FenceValue) -> Self {
        Self {
            state: Mutex::new(FenceState {
                completed: initial_value,
                lost: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FenceState> {
        // The state is two plain fields, a panic while holding the lock cannot
        // leave it half-written.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advances the completed value to `value` and wakes waiters.
    ///
    /// Values at or below the current completed value are ignored.
    pub fn signal(&self, value: FenceValue) {
        let mut state = self.lock();
        if value > state.completed {
            state.completed = value;
            self.changed.notify_all();
        }
    }

    /// Puts the fence into the lost state and wakes every waiter.
    pub fn mark_lost(&self) {
        let mut state = self.lock();
        if !state.lost {
            state.lost = true;
            error!("Fence marked lost at value {}", state.completed);
            self.changed.notify_all();
        }
    }

    /// Returns `true` once [`mark_lost`](Self::mark_lost) has been called.
    pub fn is_lost(&self) -> bool {
        self.lock().lost
    }
}

impl Default for HostFence {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeviceFence for HostFence {
    fn completed_value(&self) -> RhiResult<FenceValue> {
        let state = self.lock();
        if state.lost {
            return Err(RhiError::DeviceLost);
        }
        Ok(state.completed)
    }

    fn wait_for_value(&self, value: FenceValue) -> RhiResult<()> {
        let mut state = self.lock();
        if state.completed < value && !state.lost {
            debug!(
                "Blocking on host fence: completed {}, waiting for {}",
                state.completed, value
            );
        }
        while state.completed < value {
            if state.lost {
                return Err(RhiError::DeviceLost);
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }
}
