//! Explicitly owned renderer state.
//!
//! [`GraphicsContext`] bundles everything a frame needs from the device: the
//! frame loop, one resource-view pool per view kind and the configuration
//! they were sized from. It is created once and passed to whatever records
//! frames; nothing in the renderer reaches for global state.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use kiln_core::RendererConfig;
//! use kiln_rhi::descriptor::ResourceViewKind;
//! use kiln_rhi::headless::HeadlessDevice;
//! use kiln_renderer::GraphicsContext;
//!
//! # fn main() -> kiln_rhi::RhiResult<()> {
//! let device = Arc::new(HeadlessDevice::new(Duration::ZERO)?);
//! let mut context = GraphicsContext::new(device, &RendererConfig::default())?;
//!
//! let mut rtv = context.alloc_view(ResourceViewKind::RenderTarget);
//! assert!(rtv.is_some());
//! context.free_view(&mut rtv)?;
//! assert!(rtv.is_none());
//!
//! context.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{error, info};

use kiln_core::RendererConfig;
use kiln_rhi::descriptor::{
    DescriptorHeapDesc, ResourceView, ResourceViewHandle, ResourceViewKind, ResourceViewSlotPool,
};
use kiln_rhi::device::{FenceValue, GraphicsDevice};
use kiln_rhi::{RhiError, RhiResult};

use crate::frame::FrameOrchestrator;
use crate::sorter::RenderQueueSorter;

/// Device, frame loop and resource-view pools.
///
/// Dropping the context drains outstanding GPU work first unless nothing was
/// scheduled since the last [`shutdown`](Self::shutdown). Call `shutdown` to
/// observe drain errors instead of having them logged.
pub struct GraphicsContext<D: GraphicsDevice> {
    device: Arc<D>,
    frames: FrameOrchestrator<D>,
    pools: Vec<ResourceViewSlotPool<D::DescriptorHeap>>,
    config: RendererConfig,
    /// Last fence value scheduled when the queue was last drained.
    drained_through: Option<FenceValue>,
}

impl<D: GraphicsDevice> GraphicsContext<D> {
    /// Creates the frame loop and view pools described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] if `config` fails validation, or the
    /// device's error if a heap, fence or command buffer cannot be created.
    pub fn new(device: Arc<D>, config: &RendererConfig) -> RhiResult<Self> {
        config
            .validate()
            .map_err(|e| RhiError::InvalidState(format!("renderer configuration: {}", e)))?;

        let pools = ResourceViewKind::ALL
            .iter()
            .map(|&kind| {
                let desc = heap_desc(config, kind);
                device
                    .create_descriptor_heap(&desc)
                    .map(ResourceViewSlotPool::new)
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let frames = FrameOrchestrator::new(device.clone(), config.frames_in_flight)?;

        info!(
            "Graphics context ready on {} ({} frames in flight)",
            device.name(),
            config.frames_in_flight
        );

        Ok(Self {
            device,
            frames,
            pools,
            config: config.clone(),
            drained_through: None,
        })
    }

    /// Takes a free slot from the pool for `kind`.
    ///
    /// Returns `None` when the pool is exhausted.
    pub fn alloc_view(&mut self, kind: ResourceViewKind) -> Option<ResourceViewHandle> {
        self.pool_mut(kind).alloc()
    }

    /// Returns a slot to its pool and clears `handle`.
    ///
    /// Freeing `None` does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::StaleHandle`] if the slot was already freed or
    /// reused, and leaves `handle` cleared either way.
    pub fn free_view(&mut self, handle: &mut Option<ResourceViewHandle>) -> RhiResult<()> {
        match *handle {
            Some(live) => self.pool_mut(live.kind()).free(handle),
            None => Ok(()),
        }
    }

    /// Resolves the addresses of a live slot.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::StaleHandle`] if the slot was freed or reused.
    pub fn view(&self, handle: ResourceViewHandle) -> RhiResult<ResourceView> {
        self.pool(handle.kind()).view(handle)
    }

    /// The pool for `kind`.
    #[inline]
    pub fn pool(&self, kind: ResourceViewKind) -> &ResourceViewSlotPool<D::DescriptorHeap> {
        &self.pools[kind as usize]
    }

    #[inline]
    fn pool_mut(&mut self, kind: ResourceViewKind) -> &mut ResourceViewSlotPool<D::DescriptorHeap> {
        &mut self.pools[kind as usize]
    }

    /// The frame loop.
    #[inline]
    pub fn frames(&self) -> &FrameOrchestrator<D> {
        &self.frames
    }

    /// The frame loop, for rendering.
    #[inline]
    pub fn frames_mut(&mut self) -> &mut FrameOrchestrator<D> {
        &mut self.frames
    }

    /// The device.
    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// The configuration the context was built from.
    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// An empty draw sorter using the configured distance unit.
    pub fn new_sorter(&self) -> RenderQueueSorter {
        RenderQueueSorter::new(self.config.distance_unit)
    }

    /// Waits for all submitted work to finish.
    ///
    /// Can be called more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is lost while draining.
    pub fn shutdown(&mut self) -> RhiResult<()> {
        self.frames.shutdown()?;
        self.drained_through = Some(self.frames.queue().last_signaled());
        Ok(())
    }
}

impl<D: GraphicsDevice> Drop for GraphicsContext<D> {
    fn drop(&mut self) {
        if self.drained_through == Some(self.frames.queue().last_signaled()) {
            return;
        }
        if let Err(e) = self.frames.shutdown() {
            error!("Failed to drain GPU work while dropping graphics context: {}", e);
        }
    }
}

fn heap_desc(config: &RendererConfig, kind: ResourceViewKind) -> DescriptorHeapDesc {
    let budget = &config.resource_views;
    match kind {
        ResourceViewKind::ShaderResource => DescriptorHeapDesc::new(kind, budget.shader_resources),
        ResourceViewKind::Sampler => DescriptorHeapDesc::new(kind, budget.samplers)
            .shader_visible(config.shader_visible_samplers),
        ResourceViewKind::RenderTarget => DescriptorHeapDesc::new(kind, budget.render_targets),
        ResourceViewKind::DepthStencil => DescriptorHeapDesc::new(kind, budget.depth_stencils),
    }
}
