//! Vulkan command buffers.
//!
//! Each [`VulkanCommandBuffer`] allocates from its own command pool, so
//! buffers for different frame slots can be recorded on different threads.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::command::{CommandRecorder, RecordingState};
use crate::error::{RhiError, RhiResult};

use super::device::DeviceShared;

/// A primary command buffer with a dedicated pool.
pub struct VulkanCommandBuffer {
    shared: Arc<DeviceShared>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    state: RecordingState,
}

impl VulkanCommandBuffer {
    pub(crate) fn new(shared: Arc<DeviceShared>) -> RhiResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(shared.physical.graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { shared.device.create_command_pool(&pool_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = match unsafe { shared.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { shared.device.destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };

        debug!(
            "Command buffer allocated for queue family {}",
            shared.physical.graphics_family
        );

        Ok(Self {
            shared,
            pool,
            buffer,
            state: RecordingState::Initial,
        })
    }

    /// Returns the Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> RecordingState {
        self.state
    }
}

impl CommandRecorder for VulkanCommandBuffer {
    fn reset(&mut self) -> RhiResult<()> {
        unsafe {
            self.shared
                .device
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        self.state = RecordingState::Initial;
        Ok(())
    }

    fn begin(&mut self) -> RhiResult<()> {
        if self.state != RecordingState::Initial {
            return Err(RhiError::InvalidState(format!(
                "begin() on a command buffer in state {:?}",
                self.state
            )));
        }

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.shared
                .device
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        self.state = RecordingState::Recording;
        Ok(())
    }

    fn end(&mut self) -> RhiResult<()> {
        if self.state != RecordingState::Recording {
            return Err(RhiError::InvalidState(format!(
                "end() on a command buffer in state {:?}",
                self.state
            )));
        }

        unsafe { self.shared.device.end_command_buffer(self.buffer)? };
        self.state = RecordingState::Executable;
        Ok(())
    }

    #[inline]
    fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }
}

impl Drop for VulkanCommandBuffer {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees the buffer allocated from it.
            self.shared.device.destroy_command_pool(self.pool, None);
        }
        debug!("Destroyed command buffer");
    }
}

// Safety: the buffer and pool are only touched through &mut self or on drop.
unsafe impl Send for VulkanCommandBuffer {}
