//! Resource-view heaps and the slot pool that hands out their entries.
//!
//! # Overview
//!
//! A [`DescriptorHeap`] is a fixed array of equally sized resource-view
//! entries created by the device. [`ResourceViewSlotPool`] owns one heap and
//! lends out its slots:
//!
//! - [`alloc`](ResourceViewSlotPool::alloc) scans from a rotating cursor for
//!   the first free slot and returns `None` when the pool is full. Running out
//!   is a capacity-planning signal for the caller, not an error.
//! - [`free`](ResourceViewSlotPool::free) takes the caller's handle out of its
//!   `Option`, so freeing the same variable twice is a no-op.
//! - Handles carry a generation. A copy kept after its slot was freed is
//!   rejected by [`view`](ResourceViewSlotPool::view) and `free` with
//!   [`RhiError::StaleHandle`].
//!
//! The pool is driven from the frame-preparation thread and takes `&mut self`
//! for every mutation; share it across threads only behind a lock.
//!
//! # Example
//!
//! ```
//! use kiln_rhi::descriptor::{
//!     DescriptorHeapDesc, HostDescriptorHeap, ResourceViewKind, ResourceViewSlotPool,
//! };
//!
//! # fn main() -> Result<(), kiln_rhi::RhiError> {
//! let desc = DescriptorHeapDesc::new(ResourceViewKind::ShaderResource, 128);
//! let heap = HostDescriptorHeap::new(desc, 0x1000, 0x8000_0000, 32);
//! let mut pool = ResourceViewSlotPool::new(heap);
//!
//! let mut handle = pool.alloc();
//! let view = pool.view(handle.unwrap())?;
//! assert!(view.gpu.is_some());
//!
//! pool.free(&mut handle)?;
//! assert!(handle.is_none());
//! # Ok(())
//! # }
//! ```

use std::fmt;

use tracing::debug;

use crate::error::{RhiError, RhiResult};

/// CPU-side address of a resource-view entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptor(pub u64);

impl CpuDescriptor {
    /// The address `bytes` past this one.
    #[inline]
    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

/// GPU-side address of a resource-view entry or buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptor(pub u64);

impl GpuDescriptor {
    /// The address `bytes` past this one.
    #[inline]
    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

/// The kind of view a heap stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceViewKind {
    /// Constant-buffer, shader-resource and unordered-access views.
    ShaderResource,
    /// Samplers.
    Sampler,
    /// Render-target views.
    RenderTarget,
    /// Depth-stencil views.
    DepthStencil,
}

impl ResourceViewKind {
    /// Every kind, in declaration order.
    pub const ALL: [ResourceViewKind; 4] = [
        ResourceViewKind::ShaderResource,
        ResourceViewKind::Sampler,
        ResourceViewKind::RenderTarget,
        ResourceViewKind::DepthStencil,
    ];

    /// Only shader-resource and sampler heaps can be bound for shader access.
    #[inline]
    pub fn can_be_shader_visible(self) -> bool {
        matches!(
            self,
            ResourceViewKind::ShaderResource | ResourceViewKind::Sampler
        )
    }
}

impl fmt::Display for ResourceViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceViewKind::ShaderResource => "shader-resource",
            ResourceViewKind::Sampler => "sampler",
            ResourceViewKind::RenderTarget => "render-target",
            ResourceViewKind::DepthStencil => "depth-stencil",
        };
        f.write_str(name)
    }
}

/// Parameters for creating a [`DescriptorHeap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorHeapDesc {
    /// Kind of view stored in the heap.
    pub kind: ResourceViewKind,
    /// Number of entries.
    pub capacity: u32,
    /// Whether shaders can address the heap.
    pub shader_visible: bool,
}

impl DescriptorHeapDesc {
    /// A heap of `capacity` entries, shader-visible when the kind allows it.
    pub fn new(kind: ResourceViewKind, capacity: u32) -> Self {
        Self {
            kind,
            capacity,
            shader_visible: kind.can_be_shader_visible(),
        }
    }

    /// Overrides shader visibility.
    pub fn shader_visible(mut self, shader_visible: bool) -> Self {
        self.shader_visible = shader_visible;
        self
    }

    /// Checks the description before a device creates the heap.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] for an empty heap or a shader-visible
    /// heap of a kind that cannot be one.
    pub fn validate(&self) -> RhiResult<()> {
        if self.capacity == 0 {
            return Err(RhiError::InvalidState(format!(
                "{} heap must have at least one entry",
                self.kind
            )));
        }
        if self.shader_visible && !self.kind.can_be_shader_visible() {
            return Err(RhiError::InvalidState(format!(
                "{} heaps cannot be shader-visible",
                self.kind
            )));
        }
        Ok(())
    }
}

/// A device heap of resource-view entries.
pub trait DescriptorHeap: Send {
    /// The description the heap was created from.
    fn desc(&self) -> &DescriptorHeapDesc;

    /// CPU address of entry 0.
    fn cpu_start(&self) -> CpuDescriptor;

    /// GPU address of entry 0, for shader-visible heaps.
    fn gpu_start(&self) -> Option<GpuDescriptor>;

    /// Distance in bytes between consecutive entries.
    fn increment_size(&self) -> u64;
}

/// Heap living in host memory, with synthetic addresses.
///
/// Used by the software and test devices.
#[derive(Debug)]
pub struct HostDescriptorHeap {
    desc: DescriptorHeapDesc,
    cpu_start: CpuDescriptor,
    gpu_start: Option<GpuDescriptor>,
    increment: u64,
}

impl HostDescriptorHeap {
    /// Creates a heap whose entries start at the given base addresses.
    ///
    /// `gpu_base` is ignored unless the description is shader-visible.
    pub fn new(desc: DescriptorHeapDesc, cpu_base: u64, gpu_base: u64, increment: u64) -> Self {
        Self {
            desc,
            cpu_start: CpuDescriptor(cpu_base),
            gpu_start: desc.shader_visible.then_some(GpuDescriptor(gpu_base)),
            increment,
        }
    }
}

impl DescriptorHeap for HostDescriptorHeap {
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

/// Non-owning, generation-checked reference to a pool slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceViewHandle {
    kind: ResourceViewKind,
    index: u32,
    generation: u32,
}

impl ResourceViewHandle {
    /// Kind of the pool that issued the handle.
    #[inline]
    pub fn kind(&self) -> ResourceViewKind {
        self.kind
    }

    /// Slot index. Stable for the handle's active lifetime.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Resolved addresses of a live slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceView {
    /// CPU address, used to write the view.
    pub cpu: CpuDescriptor,
    /// GPU address, present only for shader-visible heaps.
    pub gpu: Option<GpuDescriptor>,
    /// Slot index in the heap.
    pub slot: u32,
}

#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    generation: u32,
    active: bool,
}

/// Fixed-capacity ring allocator over one [`DescriptorHeap`].
///
/// # Thread Safety
///
/// Not internally synchronized. Every mutation takes `&mut self`.
pub struct ResourceViewSlotPool<H: DescriptorHeap> {
    heap: H,
    slots: Vec<Slot>,
    next_index: usize,
    active_count: usize,
}

impl<H: DescriptorHeap> ResourceViewSlotPool<H> {
    /// Creates a pool with one inactive slot per heap entry.
    pub fn new(heap: H) -> Self {
        let desc = *heap.desc();
        debug!(
            "Created {} view pool: {} slots, shader-visible: {}",
            desc.kind, desc.capacity, desc.shader_visible
        );

        Self {
            heap,
            slots: vec![Slot::default(); desc.capacity as usize],
            next_index: 0,
            active_count: 0,
        }
    }

    /// Marks the next free slot active and returns a handle to it.
    ///
    /// Scanning starts at the slot after the most recent allocation and wraps
    /// around. Returns `None` when every slot is active.
    pub fn alloc(&mut self) -> Option<ResourceViewHandle> {
        let capacity = self.slots.len();
        if self.active_count >= capacity {
            debug!("{} view pool exhausted ({} slots)", self.kind(), capacity);
            return None;
        }

        for offset in 0..capacity {
            let index = (self.next_index + offset) % capacity;
            let slot = &mut self.slots[index];
            if slot.active {
                continue;
            }

            slot.active = true;
            self.next_index = (index + 1) % capacity;
            self.active_count += 1;

            return Some(ResourceViewHandle {
                kind: self.heap.desc().kind,
                index: index as u32,
                generation: slot.generation,
            });
        }

        None
    }

    /// Returns the slot behind `handle` to the pool and clears `handle`.
    ///
    /// Freeing `None` does nothing. The handle is taken even when the call
    /// fails.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidHandle`] if the handle belongs to a pool of another
    ///   kind or its index is out of range
    /// - [`RhiError::StaleHandle`] if the slot was already freed
    pub fn free(&mut self, handle: &mut Option<ResourceViewHandle>) -> RhiResult<()> {
        let Some(handle) = handle.take() else {
            return Ok(());
        };

        let index = self.check(handle)?;
        let slot = &mut self.slots[index];
        slot.active = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.active_count -= 1;
        Ok(())
    }

    /// Returns every slot to the pool.
    ///
    /// All outstanding handles become stale.
    pub fn free_all(&mut self) {
        for slot in self.slots.iter_mut().filter(|slot| slot.active) {
            slot.active = false;
            slot.generation = slot.generation.wrapping_add(1);
        }
        if self.active_count > 0 {
            debug!(
                "Released {} {} views",
                self.active_count,
                self.heap.desc().kind
            );
        }
        self.active_count = 0;
        self.next_index = 0;
    }

    /// Resolves the addresses of a live handle.
    ///
    /// # Errors
    ///
    /// Same as [`free`](Self::free).
    pub fn view(&self, handle: ResourceViewHandle) -> RhiResult<ResourceView> {
        let index = self.check(handle)?;
        let byte_offset = self.heap.increment_size() * index as u64;
        let gpu = if self.heap.desc().shader_visible {
            self.heap.gpu_start().map(|start| start.offset(byte_offset))
        } else {
            None
        };

        Ok(ResourceView {
            cpu: self.heap.cpu_start().offset(byte_offset),
            gpu,
            slot: handle.index,
        })
    }

    /// Whether `handle` still refers to an active slot of this pool.
    pub fn is_live(&self, handle: ResourceViewHandle) -> bool {
        self.check(handle).is_ok()
    }

    fn check(&self, handle: ResourceViewHandle) -> RhiResult<usize> {
        let kind = self.heap.desc().kind;
        if handle.kind != kind {
            return Err(RhiError::InvalidHandle(format!(
                "{} handle passed to a {} pool",
                handle.kind, kind
            )));
        }

        let index = handle.index as usize;
        let Some(slot) = self.slots.get(index) else {
            return Err(RhiError::InvalidHandle(format!(
                "slot {} out of range for {} pool of {} slots",
                index,
                kind,
                self.slots.len()
            )));
        };

        if !slot.active || slot.generation != handle.generation {
            return Err(RhiError::StaleHandle {
                index: handle.index,
                generation: handle.generation,
            });
        }

        Ok(index)
    }

    /// Kind of view this pool hands out.
    #[inline]
    pub fn kind(&self) -> ResourceViewKind {
        self.heap.desc().kind
    }

    /// The underlying heap.
    #[inline]
    pub fn heap(&self) -> &H {
        &self.heap
    }

    /// Total number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently lent out.
    #[inline]
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Number of slots available to [`alloc`](Self::alloc).
    #[inline]
    pub fn free_count(&self) -> usize {
        self.slots.len() - self.active_count
    }
}

impl<H: DescriptorHeap> fmt::Debug for ResourceViewSlotPool<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceViewSlotPool")
            .field("kind", &self.kind())
            .field("capacity", &self.capacity())
            .field("active", &self.active_count)
            .field("next_index", &self.next_index)
            .finish()
    }
}
