//! Per-frame loop over the submission queue.
//!
//! This module provides [`FrameOrchestrator`], which drives one frame at a
//! time through the [`SubmissionQueue`]:
//!
//! 1. Wait until the current slot's previous submission has completed
//! 2. Reset and begin the slot's command buffer
//! 3. Let the caller record the frame (barriers, clears, draw replay)
//! 4. Submit with the next fence value
//! 5. Advance to the next slot
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use kiln_rhi::command::{DrawRecorder, ResourceId, ResourceState};
//! use kiln_rhi::headless::HeadlessDevice;
//! use kiln_renderer::frame::FrameOrchestrator;
//!
//! # fn main() -> kiln_rhi::RhiResult<()> {
//! let device = Arc::new(HeadlessDevice::new(Duration::ZERO)?);
//! let mut frames = FrameOrchestrator::new(device, 2)?;
//!
//! for _ in 0..3 {
//!     let report = frames.render_frame(|frame| {
//!         let cmd = frame.command_buffer();
//!         cmd.transition(ResourceId(0), ResourceState::Present, ResourceState::RenderTarget);
//!         cmd.transition(ResourceId(0), ResourceState::RenderTarget, ResourceState::Present);
//!         Ok(())
//!     })?;
//!     assert!(report.fence_value > 0);
//! }
//! frames.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use kiln_rhi::RhiResult;
use kiln_rhi::device::{FenceValue, GraphicsDevice};

use crate::submission::{SubmissionQueue, WaitOutcome};

/// The frame being recorded, handed to the closure of
/// [`FrameOrchestrator::render_frame`].
pub struct FrameContext<'a, D: GraphicsDevice> {
    command_buffer: &'a mut D::CommandBuffer,
    slot: usize,
    frame_number: u64,
}

impl<D: GraphicsDevice> FrameContext<'_, D> {
    /// The slot's command buffer, in the recording state.
    #[inline]
    pub fn command_buffer(&mut self) -> &mut D::CommandBuffer {
        self.command_buffer
    }

    /// Frame slot being recorded.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Number of frames submitted before this one.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

/// Summary of one submitted frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_number: u64,
    pub slot: usize,
    /// Fence value the frame's submission signals.
    pub fence_value: FenceValue,
    /// Whether the CPU blocked waiting for the slot.
    pub waited: bool,
    /// Time spent in the slot wait.
    pub wait_time: Duration,
}

/// Drives frames through a [`SubmissionQueue`] in slot order.
///
/// # Thread Safety
///
/// Not thread-safe. Owned by the thread that renders.
pub struct FrameOrchestrator<D: GraphicsDevice> {
    queue: SubmissionQueue<D>,
    current_slot: usize,
    frame_number: u64,
}

impl<D: GraphicsDevice> FrameOrchestrator<D> {
    /// Creates an orchestrator with `frame_count` slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the submission queue cannot be created.
    pub fn new(device: Arc<D>, frame_count: usize) -> RhiResult<Self> {
        Ok(Self::from_queue(SubmissionQueue::new(device, frame_count)?))
    }

    /// Wraps an existing queue, continuing from the slot after its last
    /// submission. The frame counter starts at zero.
    pub fn from_queue(queue: SubmissionQueue<D>) -> Self {
        Self {
            current_slot: queue.next_slot(),
            queue,
            frame_number: 0,
        }
    }

    /// Records and submits one frame.
    ///
    /// `record` runs with the current slot's command buffer open. If it fails
    /// the recording is discarded, nothing is submitted and the slot does not
    /// advance.
    ///
    /// # Errors
    ///
    /// Returns the first error from waiting, recording or submitting. Device
    /// errors are fatal; callers should stop rendering and call
    /// [`shutdown`](Self::shutdown).
    pub fn render_frame<F>(&mut self, record: F) -> RhiResult<FrameReport>
    where
        F: FnOnce(&mut FrameContext<'_, D>) -> RhiResult<()>,
    {
        let slot = self.current_slot;

        let wait_start = Instant::now();
        let outcome = self.queue.wait_for_slot(slot)?;
        let wait_time = wait_start.elapsed();

        let command_buffer = self.queue.begin_recording(slot)?;
        let mut frame = FrameContext {
            command_buffer,
            slot,
            frame_number: self.frame_number,
        };

        if let Err(e) = record(&mut frame) {
            error!("Recording frame {} failed: {}", self.frame_number, e);
            self.queue.cancel_recording(slot)?;
            return Err(e);
        }

        let fence_value = self.queue.submit(slot)?;
        let report = FrameReport {
            frame_number: self.frame_number,
            slot,
            fence_value,
            waited: outcome == WaitOutcome::Waited,
            wait_time,
        };

        if report.waited {
            debug!(
                "Frame {} waited {:?} for slot {}",
                self.frame_number, wait_time, slot
            );
        }

        self.current_slot = (slot + 1) % self.queue.frame_count();
        self.frame_number += 1;
        Ok(report)
    }

    /// Waits for all submitted frames to finish on the GPU.
    ///
    /// Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is lost while draining.
    pub fn shutdown(&mut self) -> RhiResult<()> {
        self.queue.wait_for_drain()?;
        info!("Frame loop drained after {} frames", self.frame_number);
        Ok(())
    }

    /// Slot the next frame records into.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Number of frames submitted.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// The underlying queue.
    #[inline]
    pub fn queue(&self) -> &SubmissionQueue<D> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_rhi::RhiError;
    use kiln_rhi::command::{DrawIndexed, DrawRecorder, RecordedCommand};
    use kiln_rhi::testing::FakeDevice;

    use crate::submission::SlotState;

    #[test]
    fn test_slots_rotate() {
        let device = Arc::new(FakeDevice::auto_completing());
        let mut frames = FrameOrchestrator::new(device, 3).unwrap();

        let slots: Vec<usize> = (0..7)
            .map(|_| frames.render_frame(|_| Ok(())).unwrap().slot)
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(frames.frame_number(), 7);
        assert_eq!(frames.current_slot(), 1);
    }

    #[test]
    fn test_report_carries_fence_value() {
        let device = Arc::new(FakeDevice::auto_completing());
        let mut frames = FrameOrchestrator::new(device.clone(), 2).unwrap();

        let report = frames
            .render_frame(|frame| {
                assert_eq!(frame.slot(), 0);
                assert_eq!(frame.frame_number(), 0);
                frame.command_buffer().draw_indexed(DrawIndexed::new(3));
                Ok(())
            })
            .unwrap();

        assert_eq!(report.fence_value, 1);
        assert!(!report.waited);

        let submissions = device.submissions();
        assert_eq!(
            submissions[0].commands,
            Some(vec![RecordedCommand::DrawIndexed(DrawIndexed::new(3))])
        );
    }

    #[test]
    fn test_record_failure_discards_frame() {
        let device = Arc::new(FakeDevice::auto_completing());
        let mut frames = FrameOrchestrator::new(device.clone(), 2).unwrap();

        let err = frames
            .render_frame(|_| Err(RhiError::InvalidHandle("missing mesh".to_string())))
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidHandle(_)));
        assert_eq!(device.submit_count(), 0);
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.queue().slot_state(0), Some(SlotState::Idle));

        // The next frame reuses the same slot.
        let report = frames.render_frame(|_| Ok(())).unwrap();
        assert_eq!(report.slot, 0);
        assert_eq!(report.frame_number, 0);
    }

    #[test]
    fn test_submit_failure_stops_frame() {
        let device = Arc::new(FakeDevice::auto_completing());
        let mut frames = FrameOrchestrator::new(device.clone(), 2).unwrap();

        device.fail_next_submit();
        let err = frames.render_frame(|_| Ok(())).unwrap_err();
        assert!(err.is_device_fatal());
        assert_eq!(frames.frame_number(), 0);
    }

    #[test]
    fn test_from_used_queue_continues_slot_order() {
        let device = Arc::new(FakeDevice::auto_completing());
        let mut queue = SubmissionQueue::new(device, 3).unwrap();
        queue.begin_recording(0).unwrap();
        queue.submit(0).unwrap();

        let mut frames = FrameOrchestrator::from_queue(queue);
        assert_eq!(frames.current_slot(), 1);

        let report = frames.render_frame(|_| Ok(())).unwrap();
        assert_eq!(report.slot, 1);
        assert_eq!(report.fence_value, 2);
        assert_eq!(frames.current_slot(), 2);
    }

    #[test]
    fn test_shutdown_twice() {
        let device = Arc::new(FakeDevice::auto_completing());
        let mut frames = FrameOrchestrator::new(device, 2).unwrap();
        frames.render_frame(|_| Ok(())).unwrap();

        frames.shutdown().unwrap();
        frames.shutdown().unwrap();
        assert_eq!(frames.queue().completed_value().unwrap(), 3);
    }
}
