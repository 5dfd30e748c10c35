//! Software device that executes submissions on a worker thread.
//!
//! [`HeadlessDevice`] stands in for a GPU queue: `submit` hands the job to a
//! worker over a channel, the worker sleeps for the configured latency to
//! simulate execution, then signals the fence. Jobs run strictly in
//! submission order, so fence values complete in order.
//!
//! Command buffers are [`RecordingCommandBuffer`]s and heaps are
//! [`HostDescriptorHeap`]s with non-overlapping synthetic address ranges.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use kiln_rhi::command::CommandRecorder;
//! use kiln_rhi::device::{DeviceFence, GraphicsDevice};
//! use kiln_rhi::headless::HeadlessDevice;
//!
//! # fn main() -> Result<(), kiln_rhi::RhiError> {
//! let device = HeadlessDevice::new(Duration::from_millis(1))?;
//! let fence = device.create_fence(0)?;
//! let mut cmd = device.create_command_buffer()?;
//! cmd.begin()?;
//! cmd.end()?;
//!
//! device.submit(&cmd, &fence, 1)?;
//! fence.wait_for_value(1)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kiln_core::config::HeadlessConfig;
use tracing::{debug, info, trace, warn};

use crate::command::{RecordingCommandBuffer, RecordingState};
use crate::descriptor::{DescriptorHeapDesc, HostDescriptorHeap};
use crate::device::{FenceValue, GraphicsDevice};
use crate::error::{RhiError, RhiResult};
use crate::sync::HostFence;

/// Size of one resource-view entry in headless heaps.
pub const HEADLESS_DESCRIPTOR_SIZE: u64 = 32;

const CPU_HEAP_BASE: u64 = 0x0001_0000;
const GPU_HEAP_BASE: u64 = 0x8000_0000_0000;

struct Job {
    fence: Arc<HostFence>,
    value: FenceValue,
    /// `None` for a bare signal.
    command_count: Option<usize>,
}

/// Software graphics device.
pub struct HeadlessDevice {
    name: String,
    latency: Duration,
    jobs: Option<flume::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    next_heap_offset: AtomicU64,
    submitted: AtomicU64,
}

impl HeadlessDevice {
    /// Starts a device whose submissions take `latency` to execute.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Initialization`] if the worker thread cannot be
    /// spawned.
    pub fn new(latency: Duration) -> RhiResult<Self> {
        let (sender, receiver) = flume::unbounded::<Job>();

        let worker = thread::Builder::new()
            .name("kiln-headless-queue".into())
            .spawn(move || run_queue(receiver, latency))
            .map_err(|e| RhiError::Initialization(format!("headless queue thread: {e}")))?;

        info!("Headless device started (simulated latency {:?})", latency);

        Ok(Self {
            name: "headless".to_string(),
            latency,
            jobs: Some(sender),
            worker: Some(worker),
            next_heap_offset: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
        })
    }

    /// Starts a device from configuration.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn from_config(config: &HeadlessConfig) -> RhiResult<Self> {
        Self::new(Duration::from_millis(config.gpu_latency_ms))
    }

    /// Simulated execution time per submission.
    #[inline]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Number of command buffers submitted so far.
    #[inline]
    pub fn submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    fn enqueue(&self, job: Job) -> RhiResult<()> {
        let sender = self.jobs.as_ref().ok_or(RhiError::DeviceLost)?;
        sender.send(job).map_err(|_| {
            warn!("Headless queue worker is gone");
            RhiError::DeviceLost
        })
    }
}

fn run_queue(receiver: flume::Receiver<Job>, latency: Duration) {
    debug!("Headless queue worker running");

    while let Ok(job) = receiver.recv() {
        if let Some(command_count) = job.command_count {
            if !latency.is_zero() {
                thread::sleep(latency);
            }
            trace!(
                "Executed {} commands, signaling {}",
                command_count, job.value
            );
        }
        job.fence.signal(job.value);
    }

    debug!("Headless queue worker stopped");
}

impl GraphicsDevice for HeadlessDevice {
    type Fence = Arc<HostFence>;
    type CommandBuffer = RecordingCommandBuffer;
    type DescriptorHeap = HostDescriptorHeap;

    fn name(&self) -> &str {
        &self.name
    }

    fn create_fence(&self, initial_value: FenceValue) -> RhiResult<Self::Fence> {
        debug!("Created host fence at {}", initial_value);
        Ok(Arc::new(HostFence::new(initial_value)))
    }

    fn create_command_buffer(&self) -> RhiResult<Self::CommandBuffer> {
        Ok(RecordingCommandBuffer::new())
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> RhiResult<Self::DescriptorHeap> {
        desc.validate()?;

        let size = desc.capacity as u64 * HEADLESS_DESCRIPTOR_SIZE;
        let offset = self.next_heap_offset.fetch_add(size, Ordering::Relaxed);
        debug!(
            "Created {} heap: {} entries at offset {:#x}",
            desc.kind, desc.capacity, offset
        );

        Ok(HostDescriptorHeap::new(
            *desc,
            CPU_HEAP_BASE + offset,
            GPU_HEAP_BASE + offset,
            HEADLESS_DESCRIPTOR_SIZE,
        ))
    }

    fn submit(
        &self,
        command_buffer: &Self::CommandBuffer,
        fence: &Self::Fence,
        signal_value: FenceValue,
    ) -> RhiResult<()> {
        if command_buffer.state() != RecordingState::Executable {
            return Err(RhiError::InvalidState(format!(
                "submitted command buffer is {:?}, expected Executable",
                command_buffer.state()
            )));
        }

        self.enqueue(Job {
            fence: fence.clone(),
            value: signal_value,
            command_count: Some(command_buffer.commands().len()),
        })?;
        self.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn signal(&self, fence: &Self::Fence, value: FenceValue) -> RhiResult<()> {
        self.enqueue(Job {
            fence: fence.clone(),
            value,
            command_count: None,
        })
    }
}

impl Drop for HeadlessDevice {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish queued jobs and exit.
        self.jobs.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Headless queue worker panicked");
        }
        info!("Headless device stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRecorder;
    use crate::descriptor::{DescriptorHeap, ResourceViewKind};
    use crate::device::DeviceFence;

    fn closed_buffer(device: &HeadlessDevice) -> RecordingCommandBuffer {
        let mut cmd = device.create_command_buffer().unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();
        cmd
    }

    #[test]
    fn test_submissions_complete_in_order() {
        let device = HeadlessDevice::new(Duration::from_millis(1)).unwrap();
        let fence = device.create_fence(0).unwrap();
        let cmd = closed_buffer(&device);

        for value in 1..=5 {
            device.submit(&cmd, &fence, value).unwrap();
        }
        fence.wait_for_value(5).unwrap();

        assert_eq!(fence.completed_value().unwrap(), 5);
        assert_eq!(device.submitted_count(), 5);
    }

    #[test]
    fn test_submit_requires_closed_buffer() {
        let device = HeadlessDevice::new(Duration::ZERO).unwrap();
        let fence = device.create_fence(0).unwrap();
        let mut cmd = device.create_command_buffer().unwrap();
        cmd.begin().unwrap();

        assert!(matches!(
            device.submit(&cmd, &fence, 1),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_signal_without_work() {
        let device = HeadlessDevice::new(Duration::ZERO).unwrap();
        let fence = device.create_fence(3).unwrap();
        device.signal(&fence, 4).unwrap();
        fence.wait_for_value(4).unwrap();
        assert_eq!(device.submitted_count(), 0);
    }

    #[test]
    fn test_drop_finishes_queued_work() {
        let device = HeadlessDevice::new(Duration::from_millis(2)).unwrap();
        let fence = device.create_fence(0).unwrap();
        let cmd = closed_buffer(&device);
        device.submit(&cmd, &fence, 1).unwrap();
        device.submit(&cmd, &fence, 2).unwrap();

        drop(device);
        assert_eq!(fence.completed_value().unwrap(), 2);
    }

    #[test]
    fn test_heaps_do_not_overlap() {
        let device = HeadlessDevice::new(Duration::ZERO).unwrap();
        let a = device
            .create_descriptor_heap(&DescriptorHeapDesc::new(ResourceViewKind::ShaderResource, 4))
            .unwrap();
        let b = device
            .create_descriptor_heap(&DescriptorHeapDesc::new(ResourceViewKind::Sampler, 4))
            .unwrap();

        let a_end = a.cpu_start().offset(4 * HEADLESS_DESCRIPTOR_SIZE);
        assert!(b.cpu_start() >= a_end);
    }

    #[test]
    fn test_headless_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HeadlessDevice>();
    }
}
