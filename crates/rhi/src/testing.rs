//! Test double for [`GraphicsDevice`].
//!
//! [`FakeDevice`] never completes work on its own unless built with
//! [`FakeDevice::auto_completing`]. Tests advance the fence explicitly with
//! [`complete_through`](FakeDevice::complete_through), which makes blocking
//! behavior observable, and can inject a failed submission or a lost device.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::command::{RecordedCommand, RecordingCommandBuffer, RecordingState};
use crate::descriptor::{DescriptorHeapDesc, HostDescriptorHeap};
use crate::device::{FenceValue, GraphicsDevice};
use crate::error::{RhiError, RhiResult};
use crate::sync::HostFence;

/// One call to `submit` or `signal` seen by the fake device.
#[derive(Clone, Debug, PartialEq)]
pub struct FakeSubmission {
    /// Fence value the call scheduled.
    pub signal_value: FenceValue,
    /// Recorded commands, `None` for a bare signal.
    pub commands: Option<Vec<RecordedCommand>>,
}

/// Manually driven graphics device for tests.
#[derive(Default)]
pub struct FakeDevice {
    fences: Mutex<Vec<Arc<HostFence>>>,
    submissions: Mutex<Vec<FakeSubmission>>,
    highest_scheduled: AtomicU64,
    fail_next_submit: AtomicBool,
    lost: AtomicBool,
    auto_complete: bool,
    next_heap_offset: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeDevice {
    /// A device whose fences only advance through
    /// [`complete_through`](Self::complete_through).
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that completes every submission immediately.
    pub fn auto_completing() -> Self {
        Self {
            auto_complete: true,
            ..Self::default()
        }
    }

    /// Marks all work up to `value` complete on every fence.
    pub fn complete_through(&self, value: FenceValue) {
        for fence in lock(&self.fences).iter() {
            fence.signal(value);
        }
    }

    /// Completes everything scheduled so far.
    pub fn complete_all(&self) {
        self.complete_through(self.highest_scheduled());
    }

    /// Highest fence value passed to `submit` or `signal`.
    pub fn highest_scheduled(&self) -> FenceValue {
        self.highest_scheduled.load(Ordering::SeqCst)
    }

    /// Makes the next `submit` fail with [`RhiError::SubmissionFailed`].
    pub fn fail_next_submit(&self) {
        self.fail_next_submit.store(true, Ordering::SeqCst);
    }

    /// Simulates device removal: fences report loss, submissions fail.
    pub fn lose_device(&self) {
        self.lost.store(true, Ordering::SeqCst);
        for fence in lock(&self.fences).iter() {
            fence.mark_lost();
        }
    }

    /// Every `submit` and `signal` call so far, in order.
    pub fn submissions(&self) -> Vec<FakeSubmission> {
        lock(&self.submissions).clone()
    }

    /// Number of `submit` calls that carried a command buffer.
    pub fn submit_count(&self) -> usize {
        lock(&self.submissions)
            .iter()
            .filter(|s| s.commands.is_some())
            .count()
    }

    fn schedule(&self, fence: &Arc<HostFence>, submission: FakeSubmission) -> RhiResult<()> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(RhiError::DeviceLost);
        }

        let value = submission.signal_value;
        self.highest_scheduled.fetch_max(value, Ordering::SeqCst);
        lock(&self.submissions).push(submission);

        if self.auto_complete {
            fence.signal(value);
        }
        Ok(())
    }
}

impl GraphicsDevice for FakeDevice {
    type Fence = Arc<HostFence>;
    type CommandBuffer = RecordingCommandBuffer;
    type DescriptorHeap = HostDescriptorHeap;

    fn name(&self) -> &str {
        "fake"
    }

    fn create_fence(&self, initial_value: FenceValue) -> RhiResult<Self::Fence> {
        let fence = Arc::new(HostFence::new(initial_value));
        lock(&self.fences).push(fence.clone());
        Ok(fence)
    }

    fn create_command_buffer(&self) -> RhiResult<Self::CommandBuffer> {
        Ok(RecordingCommandBuffer::new())
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> RhiResult<Self::DescriptorHeap> {
        desc.validate()?;
        let offset = self
            .next_heap_offset
            .fetch_add(desc.capacity as u64 * 64, Ordering::Relaxed);
        Ok(HostDescriptorHeap::new(*desc, 0x1000 + offset, 0x10_0000 + offset, 64))
    }

    fn submit(
        &self,
        command_buffer: &Self::CommandBuffer,
        fence: &Self::Fence,
        signal_value: FenceValue,
    ) -> RhiResult<()> {
        if self.fail_next_submit.swap(false, Ordering::SeqCst) {
            debug!("Fake device rejecting submission of value {}", signal_value);
            return Err(RhiError::SubmissionFailed(
                "injected submission failure".to_string(),
            ));
        }
        if command_buffer.state() != RecordingState::Executable {
            return Err(RhiError::InvalidState(format!(
                "submitted command buffer is {:?}",
                command_buffer.state()
            )));
        }

        self.schedule(
            fence,
            FakeSubmission {
                signal_value,
                commands: Some(command_buffer.commands().to_vec()),
            },
        )
    }

    fn signal(&self, fence: &Self::Fence, value: FenceValue) -> RhiResult<()> {
        self.schedule(
            fence,
            FakeSubmission {
                signal_value: value,
                commands: None,
            },
        )
    }
}
