//! Frame-slot submission and CPU/GPU throttling.
//!
//! This module provides [`SubmissionQueue`], which owns one command buffer per
//! frame slot and a single timeline fence shared by all slots. It handles:
//!
//! - Handing out a slot's command buffer only once the GPU is done with it
//! - Submitting slots in frame order with a fresh fence value each time
//! - Draining all outstanding work at shutdown
//!
//! # Overview
//!
//! Each slot remembers the fence value its last submission will signal. A
//! slot can be reused once the fence's completed value has reached it:
//!
//! ```text
//! frame:   0    1    2    3    4
//! slot:    0    1    0    1    0
//! signals: 1    2    3    4    5
//!                    ^ waits for 1
//!                         ^ waits for 2
//! ```
//!
//! With `frame_count` slots the CPU never runs more than `frame_count`
//! frames ahead of the GPU.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use kiln_rhi::headless::HeadlessDevice;
//! use kiln_renderer::submission::SubmissionQueue;
//!
//! # fn main() -> kiln_rhi::RhiResult<()> {
//! let device = Arc::new(HeadlessDevice::new(std::time::Duration::ZERO)?);
//! let mut queue = SubmissionQueue::new(device, 2)?;
//!
//! for frame in 0..4 {
//!     let slot = frame % 2;
//!     queue.wait_for_slot(slot)?;
//!     let _cmd = queue.begin_recording(slot)?;
//!     // record commands...
//!     queue.submit(slot)?;
//! }
//! queue.wait_for_drain()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, error, info};

use kiln_rhi::command::CommandRecorder;
use kiln_rhi::device::{DeviceFence, FenceValue, GraphicsDevice};
use kiln_rhi::{RhiError, RhiResult};

/// Whether a fence wait had to block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The value had already completed.
    Ready,
    /// The calling thread blocked until the value completed.
    Waited,
}

/// CPU-side view of a frame slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// No recording in progress and nothing known to be in flight.
    Idle,
    /// The slot's command buffer is open for recording.
    Recording,
    /// Submitted; the GPU may still be executing it.
    Submitted,
}

/// A device fence plus the last value the CPU scheduled on it.
pub struct FrameFence<F: DeviceFence> {
    fence: F,
    last_signaled: FenceValue,
}

impl<F: DeviceFence> FrameFence<F> {
    /// Wraps `fence`, whose completed value starts at `initial_value`.
    pub fn new(fence: F, initial_value: FenceValue) -> Self {
        Self {
            fence,
            last_signaled: initial_value,
        }
    }

    /// The device fence.
    #[inline]
    pub fn fence(&self) -> &F {
        &self.fence
    }

    /// The value the next scheduled signal will use.
    #[inline]
    pub fn next_value(&self) -> FenceValue {
        self.last_signaled + 1
    }

    /// The last value handed to the device.
    #[inline]
    pub fn last_signaled(&self) -> FenceValue {
        self.last_signaled
    }

    /// Records that `value` has been scheduled on the device.
    fn mark_signaled(&mut self, value: FenceValue) {
        debug_assert!(value > self.last_signaled);
        self.last_signaled = value;
    }

    /// The device's completed value.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DeviceLost`] if the device stopped reporting.
    #[inline]
    pub fn completed(&self) -> RhiResult<FenceValue> {
        self.fence.completed_value()
    }

    /// Whether `value` has completed.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DeviceLost`] if the device stopped reporting.
    #[inline]
    pub fn is_complete(&self, value: FenceValue) -> RhiResult<bool> {
        Ok(self.completed()? >= value)
    }

    /// Blocks until `value` has completed.
    ///
    /// Checks the completed value first and only asks the device to block
    /// when the value is still outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DeviceLost`] if the device is lost before or while
    /// waiting.
    pub fn wait(&self, value: FenceValue) -> RhiResult<WaitOutcome> {
        if self.is_complete(value)? {
            return Ok(WaitOutcome::Ready);
        }
        self.fence.wait_for_value(value)?;
        Ok(WaitOutcome::Waited)
    }
}

/// Per-slot command buffers and fence values over one device queue.
///
/// # Thread Safety
///
/// Owned by the frame thread. The device it submits to is shared through
/// `Arc` and may complete work on other threads.
pub struct SubmissionQueue<D: GraphicsDevice> {
    device: Arc<D>,
    fence: FrameFence<D::Fence>,
    command_buffers: Vec<D::CommandBuffer>,
    slot_values: Vec<FenceValue>,
    slot_states: Vec<SlotState>,
    last_submitted_slot: Option<usize>,
}

impl<D: GraphicsDevice> SubmissionQueue<D> {
    /// Creates a queue with `frame_count` slots.
    ///
    /// # Arguments
    ///
    /// * `device` - Device that executes submissions
    /// * `frame_count` - Number of frame slots, at least 1
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] if `frame_count` is zero, or the
    /// device's error if the fence or a command buffer cannot be created.
    pub fn new(device: Arc<D>, frame_count: usize) -> RhiResult<Self> {
        if frame_count == 0 {
            return Err(RhiError::InvalidState(
                "submission queue needs at least one frame slot".to_string(),
            ));
        }

        let fence = FrameFence::new(device.create_fence(0)?, 0);
        let command_buffers = (0..frame_count)
            .map(|_| device.create_command_buffer())
            .collect::<RhiResult<Vec<_>>>()?;

        info!(
            "Submission queue created on {} with {} frame slots",
            device.name(),
            frame_count
        );

        Ok(Self {
            device,
            fence,
            command_buffers,
            slot_values: vec![0; frame_count],
            slot_states: vec![SlotState::Idle; frame_count],
            last_submitted_slot: None,
        })
    }

    /// Waits until the GPU has finished the slot's previous submission.
    ///
    /// Returns [`WaitOutcome::Ready`] without blocking if it already has. A
    /// submitted slot becomes idle.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidSlot`] for an out-of-range slot, or
    /// [`RhiError::DeviceLost`] if the device is lost.
    pub fn wait_for_slot(&mut self, slot: usize) -> RhiResult<WaitOutcome> {
        self.check_slot(slot)?;
        let outcome = self.fence.wait(self.slot_values[slot])?;

        if self.slot_states[slot] == SlotState::Submitted {
            self.slot_states[slot] = SlotState::Idle;
        }
        Ok(outcome)
    }

    /// Resets and begins the slot's command buffer.
    ///
    /// # Errors
    ///
    /// - [`RhiError::SlotInFlight`] if the slot's last submission has not
    ///   completed; call [`wait_for_slot`](Self::wait_for_slot) first.
    /// - [`RhiError::InvalidState`] if the slot is already recording.
    /// - [`RhiError::InvalidSlot`] for an out-of-range slot.
    pub fn begin_recording(&mut self, slot: usize) -> RhiResult<&mut D::CommandBuffer> {
        self.check_slot(slot)?;
        if self.slot_states[slot] == SlotState::Recording {
            return Err(RhiError::InvalidState(format!(
                "frame slot {} is already recording",
                slot
            )));
        }

        let pending = self.slot_values[slot];
        let completed = self.fence.completed()?;
        if completed < pending {
            return Err(RhiError::SlotInFlight {
                slot,
                pending,
                completed,
            });
        }

        let command_buffer = &mut self.command_buffers[slot];
        command_buffer.reset()?;
        command_buffer.begin()?;
        self.slot_states[slot] = SlotState::Recording;
        Ok(command_buffer)
    }

    /// Closes the slot's command buffer and submits it.
    ///
    /// The submission signals the fence with a fresh value, which becomes the
    /// slot's pending value and is returned.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidState`] if the slot is not recording.
    /// - [`RhiError::OutOfOrderSubmission`] if the slot is not the one after
    ///   the previously submitted slot.
    /// - Any device error, returned unchanged. Nothing is retried.
    pub fn submit(&mut self, slot: usize) -> RhiResult<FenceValue> {
        self.check_slot(slot)?;
        if self.slot_states[slot] != SlotState::Recording {
            return Err(RhiError::InvalidState(format!(
                "frame slot {} submitted while {:?}",
                slot, self.slot_states[slot]
            )));
        }

        let expected = self.next_slot();
        if slot != expected {
            return Err(RhiError::OutOfOrderSubmission {
                expected,
                got: slot,
            });
        }

        let command_buffer = &mut self.command_buffers[slot];
        command_buffer.end()?;

        let value = self.fence.next_value();
        if let Err(e) = self.device.submit(command_buffer, self.fence.fence(), value) {
            error!("Submission of frame slot {} failed: {}", slot, e);
            self.slot_states[slot] = SlotState::Idle;
            return Err(e);
        }

        self.fence.mark_signaled(value);
        self.slot_values[slot] = value;
        self.slot_states[slot] = SlotState::Submitted;
        self.last_submitted_slot = Some(slot);
        debug!("Submitted frame slot {} signaling {}", slot, value);
        Ok(value)
    }

    /// Discards the slot's open recording without submitting it.
    ///
    /// The slot becomes idle and keeps its previous fence value. Does nothing
    /// if the slot is not recording.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidSlot`] for an out-of-range slot, or the
    /// backend's error if the buffer cannot be reset.
    pub fn cancel_recording(&mut self, slot: usize) -> RhiResult<()> {
        self.check_slot(slot)?;
        if self.slot_states[slot] != SlotState::Recording {
            return Ok(());
        }
        self.command_buffers[slot].reset()?;
        self.slot_states[slot] = SlotState::Idle;
        debug!("Cancelled recording of frame slot {}", slot);
        Ok(())
    }

    /// Blocks until every submission so far has completed.
    ///
    /// Schedules a fresh fence value behind all outstanding work and waits for
    /// it. Submitted slots become idle; a slot that is recording stays
    /// recording. Calling this again with nothing in flight is cheap and
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns the device's error if the signal cannot be scheduled or the
    /// device is lost while waiting.
    pub fn wait_for_drain(&mut self) -> RhiResult<()> {
        let value = self.fence.next_value();
        self.device.signal(self.fence.fence(), value)?;
        self.fence.mark_signaled(value);
        self.fence.wait(value)?;

        for state in &mut self.slot_states {
            if *state == SlotState::Submitted {
                *state = SlotState::Idle;
            }
        }
        debug!("Queue drained at fence value {}", value);
        Ok(())
    }

    /// CPU-side state of `slot`, `None` if out of range.
    #[inline]
    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slot_states.get(slot).copied()
    }

    /// Fence value the slot's last submission signals, `None` if out of range.
    #[inline]
    pub fn slot_fence_value(&self, slot: usize) -> Option<FenceValue> {
        self.slot_values.get(slot).copied()
    }

    /// The slot's command buffer, `None` if out of range.
    #[inline]
    pub fn command_buffer(&self, slot: usize) -> Option<&D::CommandBuffer> {
        self.command_buffers.get(slot)
    }

    /// The fence's completed value.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DeviceLost`] if the device stopped reporting.
    #[inline]
    pub fn completed_value(&self) -> RhiResult<FenceValue> {
        self.fence.completed()
    }

    /// Last fence value scheduled on the device.
    #[inline]
    pub fn last_signaled(&self) -> FenceValue {
        self.fence.last_signaled()
    }

    /// Slot the next submission must come from.
    #[inline]
    pub fn next_slot(&self) -> usize {
        self.last_submitted_slot
            .map_or(0, |previous| (previous + 1) % self.frame_count())
    }

    /// Number of frame slots.
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.command_buffers.len()
    }

    /// The device.
    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    fn check_slot(&self, slot: usize) -> RhiResult<()> {
        if slot >= self.frame_count() {
            return Err(RhiError::InvalidSlot {
                slot,
                frame_count: self.frame_count(),
            });
        }
        Ok(())
    }
}
