//! Timeline-semaphore fence.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::{DeviceFence, FenceValue};
use crate::error::RhiResult;

use super::device::DeviceShared;
use super::queue_error;

/// A Vulkan timeline semaphore used as a [`DeviceFence`].
///
/// The GPU advances the counter as submissions finish; the host reads it with
/// `vkGetSemaphoreCounterValue` and blocks with `vkWaitSemaphores`.
pub struct TimelineFence {
    shared: Arc<DeviceShared>,
    semaphore: vk::Semaphore,
}

impl TimelineFence {
    pub(crate) fn new(shared: Arc<DeviceShared>, initial_value: FenceValue) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { shared.device.create_semaphore(&create_info, None)? };
        debug!("Created timeline semaphore at {}", initial_value);

        Ok(Self { shared, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl DeviceFence for TimelineFence {
    fn completed_value(&self) -> RhiResult<FenceValue> {
        unsafe { self.shared.device.get_semaphore_counter_value(self.semaphore) }
            .map_err(queue_error)
    }

    fn wait_for_value(&self, value: FenceValue) -> RhiResult<()> {
        if self.completed_value()? >= value {
            return Ok(());
        }

        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        unsafe { self.shared.device.wait_semaphores(&wait_info, u64::MAX) }.map_err(queue_error)
    }
}

impl Drop for TimelineFence {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed timeline semaphore");
    }
}
