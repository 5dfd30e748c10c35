//! Vulkan smoke run.
//!
//! Drives empty frames through a real GPU queue so the timeline-semaphore
//! fences and resource-view pools are exercised against a driver. Draw
//! replay stays on the headless path; the Vulkan command buffer only
//! records lifecycle.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use kiln_core::RendererConfig;
use kiln_renderer::GraphicsContext;
use kiln_rhi::descriptor::ResourceViewKind;
use kiln_rhi::vulkan::VulkanDevice;

/// Totals from a smoke run.
#[derive(Debug, Default)]
pub struct SmokeSummary {
    pub frames: u64,
    pub waited_frames: u64,
    pub views_recycled: usize,
    pub completed_value: u64,
}

/// Submits `frame_count` empty frames on the first suitable GPU.
///
/// # Errors
///
/// Returns an error if no Vulkan device can be created or a frame fails.
pub fn run(config: &RendererConfig, frame_count: u64) -> Result<SmokeSummary> {
    let device = Arc::new(
        VulkanDevice::from_config(&config.vulkan).context("failed to create Vulkan device")?,
    );
    info!(
        "Smoke run on '{}' ({})",
        device.physical_device().device_name(),
        device.physical_device().device_type_name()
    );

    let mut context = GraphicsContext::new(device.clone(), config)?;
    let mut summary = SmokeSummary::default();
    let mut view = context.alloc_view(ResourceViewKind::ShaderResource);

    for frame in 0..frame_count {
        let report = context.frames_mut().render_frame(|_| Ok(()))?;
        if report.waited {
            summary.waited_frames += 1;
        }

        // Recycle one view per frame; the slot comes back with a new generation.
        context.free_view(&mut view)?;
        view = context.alloc_view(ResourceViewKind::ShaderResource);
        if view.is_none() {
            warn!("Shader-resource pool exhausted on frame {}", frame);
        } else {
            summary.views_recycled += 1;
        }
        summary.frames += 1;
    }

    context.shutdown()?;
    context.shutdown()?;
    context.free_view(&mut view)?;

    summary.completed_value = context.frames().queue().completed_value()?;
    device.wait_idle()?;
    Ok(summary)
}
