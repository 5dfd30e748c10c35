//! Vulkan logical device and the [`GraphicsDevice`] implementation.
//!
//! # Overview
//!
//! [`VulkanDevice`] owns the instance, the logical device, one graphics queue
//! and the gpu-allocator [`Allocator`]. Everything it creates (fences,
//! command buffers, heaps) keeps the shared device state alive through an
//! `Arc`, so objects may be dropped in any order relative to the device.
//!
//! Submission signals a timeline semaphore in the same `vkQueueSubmit` that
//! executes the command buffer; a bare signal is an empty submit.
//!
//! # Example
//!
//! ```no_run
//! use kiln_rhi::device::{DeviceFence, GraphicsDevice};
//! use kiln_rhi::vulkan::VulkanDevice;
//!
//! # fn main() -> Result<(), kiln_rhi::RhiError> {
//! let device = VulkanDevice::new(false)?;
//! let fence = device.create_fence(0)?;
//! device.signal(&fence, 1)?;
//! fence.wait_for_value(1)?;
//! # Ok(())
//! # }
//! ```

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use kiln_core::config::VulkanConfig;
use tracing::{debug, error, info};

use crate::command::RecordingState;
use crate::descriptor::DescriptorHeapDesc;
use crate::device::{FenceValue, GraphicsDevice};
use crate::error::{RhiError, RhiResult};

use super::command::VulkanCommandBuffer;
use super::descriptor::VulkanDescriptorHeap;
use super::instance::Instance;
use super::physical_device::{PhysicalDeviceInfo, select_physical_device};
use super::queue_error;
use super::sync::TimelineFence;

/// Device state shared by every object the device creates.
pub(crate) struct DeviceShared {
    /// Vulkan logical device handle.
    pub(crate) device: ash::Device,
    /// Selected GPU.
    pub(crate) physical: PhysicalDeviceInfo,
    /// The graphics queue; submissions must be externally synchronized.
    queue: Mutex<vk::Queue>,
    /// GPU memory allocator, dropped before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    /// Destroyed after the device.
    _instance: Instance,
}

impl DeviceShared {
    pub(crate) fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self) -> MutexGuard<'_, vk::Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send + Sync, the queue and allocator are behind
// mutexes, and PhysicalDeviceInfo only holds plain data and handles.
unsafe impl Send for DeviceShared {}
unsafe impl Sync for DeviceShared {}

/// Vulkan implementation of [`GraphicsDevice`].
pub struct VulkanDevice {
    shared: Arc<DeviceShared>,
    name: String,
}

impl VulkanDevice {
    /// Creates an instance, picks a GPU and creates the logical device.
    ///
    /// The device enables the `timelineSemaphore` and `bufferDeviceAddress`
    /// Vulkan 1.2 features and retrieves one graphics queue.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Vulkan loader is missing
    /// - No GPU meets the requirements
    /// - Device or allocator creation fails
    pub fn new(enable_validation: bool) -> RhiResult<Self> {
        let instance = Instance::new(enable_validation)?;
        let physical = select_physical_device(instance.handle())?;

        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(physical.graphics_family)
            .queue_priorities(&queue_priorities)];

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .buffer_device_address(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .push_next(&mut features_1_2);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical.device, &create_info, None)?
        };
        info!("Logical device created on '{}'", physical.device_name());

        let queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };
        debug!(
            "Graphics queue retrieved from family {}",
            physical.graphics_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical.device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };
        info!("GPU memory allocator initialized");

        let name = physical.device_name().to_string();
        Ok(Self {
            shared: Arc::new(DeviceShared {
                device,
                physical,
                queue: Mutex::new(queue),
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
                _instance: instance,
            }),
            name,
        })
    }

    /// Creates a device from configuration.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn from_config(config: &VulkanConfig) -> RhiResult<Self> {
        Self::new(config.validation)
    }

    /// Returns the selected GPU.
    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.shared.physical
    }

    /// Waits for the device to become idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.shared.device.device_wait_idle() }.map_err(queue_error)
    }

    fn queue_submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        fence: &TimelineFence,
        value: FenceValue,
    ) -> RhiResult<()> {
        let signal_semaphores = [fence.handle()];
        let signal_values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        let queue = self.shared.queue();
        unsafe {
            self.shared
                .device
                .queue_submit(*queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| {
            error!("vkQueueSubmit failed for fence value {}: {:?}", value, e);
            queue_error(e)
        })
    }
}

impl GraphicsDevice for VulkanDevice {
    type Fence = TimelineFence;
    type CommandBuffer = VulkanCommandBuffer;
    type DescriptorHeap = VulkanDescriptorHeap;

    fn name(&self) -> &str {
        &self.name
    }

    fn create_fence(&self, initial_value: FenceValue) -> RhiResult<Self::Fence> {
        TimelineFence::new(self.shared.clone(), initial_value)
    }

    fn create_command_buffer(&self) -> RhiResult<Self::CommandBuffer> {
        VulkanCommandBuffer::new(self.shared.clone())
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> RhiResult<Self::DescriptorHeap> {
        VulkanDescriptorHeap::new(self.shared.clone(), desc)
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
        self.queue_submit(&[command_buffer.handle()], fence, signal_value)
    }

    fn signal(&self, fence: &Self::Fence, value: FenceValue) -> RhiResult<()> {
        self.queue_submit(&[], fence, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRecorder;
    use crate::device::DeviceFence;

    #[test]
    fn test_vulkan_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanDevice>();
    }

    #[test]
    #[ignore = "requires a Vulkan 1.2 GPU"]
    fn test_submit_and_wait() {
        let device = VulkanDevice::new(false).unwrap();
        let fence = device.create_fence(0).unwrap();
        let mut cmd = device.create_command_buffer().unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();

        device.submit(&cmd, &fence, 1).unwrap();
        device.signal(&fence, 2).unwrap();
        fence.wait_for_value(2).unwrap();
        assert!(fence.completed_value().unwrap() >= 2);
    }
}
