//! Resource-view heap backed by a host-visible Vulkan buffer.
//!
//! Entries are fixed-size records in one buffer. The CPU address is the
//! mapped pointer, the GPU address comes from `vkGetBufferDeviceAddress`.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::descriptor::{CpuDescriptor, DescriptorHeap, DescriptorHeapDesc, GpuDescriptor};
use crate::error::{RhiError, RhiResult};

use super::device::DeviceShared;

/// Minimum size of one heap entry in bytes.
const MIN_ENTRY_SIZE: u64 = 64;

/// A [`DescriptorHeap`] living in a `CpuToGpu` buffer.
pub struct VulkanDescriptorHeap {
    shared: Arc<DeviceShared>,
    desc: DescriptorHeapDesc,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    cpu_start: CpuDescriptor,
    gpu_start: Option<GpuDescriptor>,
    increment: u64,
}

impl VulkanDescriptorHeap {
    pub(crate) fn new(shared: Arc<DeviceShared>, desc: &DescriptorHeapDesc) -> RhiResult<Self> {
        desc.validate()?;

        let alignment = shared
            .physical
            .properties
            .limits
            .min_storage_buffer_offset_alignment;
        let increment = MIN_ENTRY_SIZE.next_multiple_of(alignment.max(1));
        let size = increment * desc.capacity as u64;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { shared.device.create_buffer(&buffer_info, None)? };

        let requirements = unsafe { shared.device.get_buffer_memory_requirements(buffer) };
        let allocation = shared.allocator().allocate(&AllocationCreateDesc {
            name: "resource view heap",
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { shared.device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let memory = unsafe { allocation.memory() };
        let offset = allocation.offset();
        let mapped = allocation.mapped_ptr();

        // From here on Drop releases the buffer and allocation.
        let mut heap = Self {
            shared,
            desc: *desc,
            buffer,
            allocation: Some(allocation),
            cpu_start: CpuDescriptor(mapped.map_or(0, |ptr| ptr.as_ptr() as u64)),
            gpu_start: None,
            increment,
        };

        unsafe { heap.shared.device.bind_buffer_memory(buffer, memory, offset)? };

        if mapped.is_none() {
            return Err(RhiError::InvalidHandle(
                "heap memory is not mapped".to_string(),
            ));
        }

        if desc.shader_visible {
            let address_info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
            let address = unsafe { heap.shared.device.get_buffer_device_address(&address_info) };
            heap.gpu_start = Some(GpuDescriptor(address));
        }

        debug!(
            "Created {} heap: {} entries of {} bytes",
            desc.kind, desc.capacity, increment
        );

        Ok(heap)
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }
}

impl DescriptorHeap for VulkanDescriptorHeap {
    #[inline]
    fn desc(&self) -> &DescriptorHeapDesc {
        &self.desc
    }

    #[inline]
    fn cpu_start(&self) -> CpuDescriptor {
        self.cpu_start
    }

    #[inline]
    fn gpu_start(&self) -> Option<GpuDescriptor> {
        self.gpu_start
    }

    #[inline]
    fn increment_size(&self) -> u64 {
        self.increment
    }
}

impl Drop for VulkanDescriptorHeap {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.shared.allocator().free(allocation)
        {
            error!("Failed to free heap allocation: {:?}", e);
        }

        unsafe {
            self.shared.device.destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} heap", self.desc.kind);
    }
}

// Safety: the mapped pointer is only exposed as an address; the allocation is
// freed through the device's locked allocator.
unsafe impl Send for VulkanDescriptorHeap {}
