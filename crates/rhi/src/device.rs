//! Graphics device abstraction.
//!
//! The submission core never constructs a device; it is handed one that
//! implements [`GraphicsDevice`]. A device creates the three kinds of objects
//! the core needs and executes submitted work:
//!
//! - a timeline fence ([`DeviceFence`]) whose completed value the device advances
//! - command buffers ([`CommandRecorder`])
//! - resource-view heaps ([`DescriptorHeap`])
//!
//! # Overview
//!
//! ```text
//! CPU                                   device queue
//! ---                                   ------------
//! record slot 0 -> submit(cmd, fence, 1) -> runs, fence = 1
//! record slot 1 -> submit(cmd, fence, 2) -> runs, fence = 2
//! wait_for_value(1)  <------------------  (returns once fence >= 1)
//! record slot 0 ...
//! ```
//!
//! Implementations live in [`crate::headless`], [`crate::vulkan`] (feature
//! `vulkan`) and [`crate::testing`] (feature `testing`).

use std::sync::Arc;

use crate::command::CommandRecorder;
use crate::descriptor::{DescriptorHeap, DescriptorHeapDesc};
use crate::error::RhiResult;

/// A value on a device timeline fence. Only ever increases.
pub type FenceValue = u64;

/// A device-tracked monotonic counter.
pub trait DeviceFence: Send + Sync {
    /// The last value the device has reported complete.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DeviceLost`](crate::RhiError::DeviceLost) when the
    /// device can no longer report progress.
    fn completed_value(&self) -> RhiResult<FenceValue>;

    /// Blocks the calling thread until the completed value reaches `value`.
    ///
    /// Returns immediately if it already has.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is lost while waiting.
    fn wait_for_value(&self, value: FenceValue) -> RhiResult<()>;
}

impl<T: DeviceFence + ?Sized> DeviceFence for Arc<T> {
    #[inline]
    fn completed_value(&self) -> RhiResult<FenceValue> {
        (**self).completed_value()
    }

    #[inline]
    fn wait_for_value(&self, value: FenceValue) -> RhiResult<()> {
        (**self).wait_for_value(value)
    }
}

/// A device that can execute recorded command buffers.
///
/// # Thread Safety
///
/// Devices are shared through `Arc` between the frame thread and any thread
/// that records command buffers. `submit` and `signal` must be called in
/// frame order; the trait does not reorder work.
pub trait GraphicsDevice: Send + Sync + 'static {
    /// Timeline fence type.
    type Fence: DeviceFence;
    /// Command buffer type.
    type CommandBuffer: CommandRecorder;
    /// Resource-view heap type.
    type DescriptorHeap: DescriptorHeap;

    /// Human-readable device name for logging.
    fn name(&self) -> &str;

    /// Creates a fence whose completed value starts at `initial_value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot create the fence.
    fn create_fence(&self, initial_value: FenceValue) -> RhiResult<Self::Fence>;

    /// Creates a command buffer in the initial (not recording) state.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    fn create_command_buffer(&self) -> RhiResult<Self::CommandBuffer>;

    /// Creates a resource-view heap.
    ///
    /// # Errors
    ///
    /// Returns an error if the heap cannot be allocated or the description
    /// asks for a shader-visible heap of a kind that cannot be one.
    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> RhiResult<Self::DescriptorHeap>;

    /// Executes a closed command buffer and schedules `fence` to reach
    /// `signal_value` once it has finished.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the frame; the caller must not retry.
    fn submit(
        &self,
        command_buffer: &Self::CommandBuffer,
        fence: &Self::Fence,
        signal_value: FenceValue,
    ) -> RhiResult<()>;

    /// Schedules `fence` to reach `value` after all previously submitted work,
    /// without executing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is lost.
    fn signal(&self, fence: &Self::Fence, value: FenceValue) -> RhiResult<()>;
}
