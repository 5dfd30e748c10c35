//! kiln - frame submission demo
//!
//! Runs the headless demo scene through the submission core, or a smoke run
//! of empty frames on a Vulkan device.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use kiln_core::RendererConfig;
use kiln_renderer::GraphicsContext;
use kiln_rhi::headless::HeadlessDevice;

mod demo;
#[cfg(feature = "vulkan")]
mod smoke;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
/// Device the frames are submitted to.
enum Backend {
    #[default]
    /// Software device with simulated GPU latency.
    Headless,
    /// First suitable Vulkan GPU.
    Vulkan,
}

#[derive(clap::Parser, Debug)]
#[command(about = "Frame submission and draw batching demo", long_about = None)]
struct CliArgs {
    /// RON configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of frames to render.
    #[arg(short, long, default_value_t = 240)]
    frames: u64,

    /// Number of objects in the demo scene.
    #[arg(short, long, default_value_t = 64)]
    objects: usize,

    /// Device to submit to.
    #[arg(short, long, default_value = "headless")]
    backend: Backend,
}

fn main() -> Result<()> {
    kiln_core::init_logging();
    let args = CliArgs::parse();

    let config = match &args.config {
        Some(path) => RendererConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => RendererConfig::default(),
    };
    info!(
        "Starting kiln: {} frames, {} frames in flight, {:?} backend",
        args.frames, config.frames_in_flight, args.backend
    );

    match args.backend {
        Backend::Headless => run_headless(&config, &args),
        Backend::Vulkan => run_vulkan(&config, &args),
    }
}

fn run_headless(config: &RendererConfig, args: &CliArgs) -> Result<()> {
    let device = Arc::new(HeadlessDevice::from_config(&config.headless)?);
    let mut context = GraphicsContext::new(device.clone(), config)?;

    let summary = demo::run(&mut context, args.frames, args.objects)?;
    info!(
        "Rendered {} frames: {} draws, {} culled, {} rejected, {} pipeline binds",
        summary.frames, summary.drawn, summary.culled, summary.rejected, summary.pipeline_binds
    );
    info!(
        "{} pipelines built, {} draws skipped on failed pipelines, {} respawns",
        summary.pipelines_built, summary.pipeline_failures, summary.respawns
    );
    info!(
        "Waited on {} frames (longest {:?}); average frame {:?}, longest {:?}",
        summary.waited_frames, summary.longest_wait, summary.average_frame, summary.longest_frame
    );
    info!("Device executed {} submissions", device.submitted_count());
    Ok(())
}

#[cfg(feature = "vulkan")]
fn run_vulkan(config: &RendererConfig, args: &CliArgs) -> Result<()> {
    let summary = smoke::run(config, args.frames)?;
    info!(
        "Vulkan smoke run: {} frames, {} waited, {} views recycled, fence at {}",
        summary.frames, summary.waited_frames, summary.views_recycled, summary.completed_value
    );
    Ok(())
}

#[cfg(not(feature = "vulkan"))]
fn run_vulkan(_config: &RendererConfig, _args: &CliArgs) -> Result<()> {
    anyhow::bail!("kiln was built without the `vulkan` feature")
}
