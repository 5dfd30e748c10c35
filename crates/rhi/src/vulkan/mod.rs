//! Vulkan backend.
//!
//! Runs without a window: the instance enables no surface extensions and the
//! device exposes a single graphics queue. Fences are timeline semaphores,
//! which give the monotonic completed-value contract directly.
//!
//! - [`instance`] - instance creation and validation messages
//! - [`physical_device`] - GPU selection
//! - [`device`] - [`VulkanDevice`], the [`GraphicsDevice`](crate::device::GraphicsDevice) implementation
//! - [`sync`] - [`TimelineFence`]
//! - [`command`] - [`VulkanCommandBuffer`]
//! - [`descriptor`] - [`VulkanDescriptorHeap`]

pub mod command;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod sync;

pub use command::VulkanCommandBuffer;
pub use descriptor::VulkanDescriptorHeap;
pub use device::VulkanDevice;
pub use instance::Instance;
pub use physical_device::{PhysicalDeviceInfo, select_physical_device};
pub use sync::TimelineFence;

use ash::vk;

use crate::error::RhiError;

/// Maps a Vulkan result from a queue operation, singling out device loss.
pub(crate) fn queue_error(result: vk::Result) -> RhiError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
        other => RhiError::VulkanError(other),
    }
}
