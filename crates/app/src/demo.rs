//! Headless demo scene.
//!
//! A ring of spinning cubes viewed by an orbiting camera. Each frame the
//! scene culls, sorts and replays its draws into the frame's command buffer,
//! between the back-buffer barriers and clears. Objects are periodically
//! despawned and respawned so their shader-resource views churn through the
//! pool, and a few deliberately malformed draws exercise the sorter's
//! rejection path.

use std::collections::VecDeque;
use std::f32::consts::TAU;
use std::time::Duration;

use anyhow::{Context, Result};
use glam::{Quat, Vec3};
use tracing::{debug, info, warn};

use kiln_core::Timer;
use kiln_renderer::pipeline::{
    MaterialFlags, MeshFlags, PipelineDesc, PipelineFactory, PipelineKey, PipelineObject,
};
use kiln_renderer::sorter::{GeometryHandle, MaterialHandle, TransformHandle};
use kiln_renderer::{
    DrawBindings, DrawRequest, GraphicsContext, PipelineCache, PipelineError, RenderQueue,
    RenderQueueSorter, ReplayStats,
};
use kiln_rhi::command::{DrawIndexed, DrawRecorder, PipelineId, ResourceId, ResourceState};
use kiln_rhi::descriptor::{CpuDescriptor, GpuDescriptor, ResourceViewHandle, ResourceViewKind};
use kiln_rhi::{RhiError, RhiResult};
use kiln_rhi::headless::HeadlessDevice;
use kiln_scene::{Aabb, Camera, Transform};

/// Frames between respawns.
const RESPAWN_INTERVAL: u64 = 10;
/// Frames between malformed draw submissions.
const MALFORMED_INTERVAL: u64 = 7;
/// Indices in a cube.
const CUBE_INDEX_COUNT: u32 = 36;
/// Size of one object's constant block.
const OBJECT_CONSTANT_SIZE: u64 = 256;
const OBJECT_CONSTANT_BASE: u64 = 0x4000_0000;
const CAMERA_CONSTANT_ADDRESS: u64 = 0x3000_0000;
const CLEAR_COLOR: [f32; 4] = [0.392, 0.584, 0.929, 1.0];

/// Totals reported at the end of a run.
#[derive(Debug, Default)]
pub struct DemoSummary {
    pub frames: u64,
    pub drawn: usize,
    pub culled: usize,
    pub rejected: usize,
    pub pipeline_binds: usize,
    pub pipeline_failures: usize,
    pub respawns: usize,
    pub waited_frames: u64,
    pub longest_wait: Duration,
    pub average_frame: Duration,
    pub longest_frame: Duration,
    pub pipelines_built: usize,
}

struct HeadlessPipeline(PipelineId);

impl PipelineObject for HeadlessPipeline {
    fn id(&self) -> PipelineId {
        self.0
    }
}

/// Accepts any key whose vertex layout carries positions.
struct HeadlessPipelineFactory;

impl PipelineFactory for HeadlessPipelineFactory {
    type Pipeline = HeadlessPipeline;

    fn create(&self, key: PipelineKey, desc: &PipelineDesc) -> Result<HeadlessPipeline, PipelineError> {
        if !key.mesh_flags().contains(MeshFlags::POSITION) {
            return Err(PipelineError::BuildFailed {
                key,
                reason: "vertex layout has no position attribute".to_string(),
            });
        }
        debug!(
            "Building pipeline {}: stride {}, {:?}, {:?}, {:?}",
            key, desc.vertex_stride, desc.pixel_stage, desc.cull_mode, desc.fill_mode
        );
        Ok(HeadlessPipeline(PipelineId(key.raw())))
    }
}

struct SceneObject {
    transform: Transform,
    local_bounds: Aabb,
    spin: f32,
    queue: RenderQueue,
    pipeline_key: PipelineKey,
    texture_view: Option<ResourceViewHandle>,
}

/// Resolved per-frame addresses the draw bindings read.
struct DemoBindings {
    material_tables: Vec<Option<GpuDescriptor>>,
}

impl DrawBindings for DemoBindings {
    fn bind_pass<R: DrawRecorder>(&self, recorder: &mut R) -> RhiResult<()> {
        recorder.set_constant_buffer(2, GpuDescriptor(CAMERA_CONSTANT_ADDRESS));
        Ok(())
    }

    fn bind_transform<R: DrawRecorder>(&self, recorder: &mut R, transform: TransformHandle) -> RhiResult<()> {
        let address = OBJECT_CONSTANT_BASE + transform.0 as u64 * OBJECT_CONSTANT_SIZE;
        recorder.set_constant_buffer(0, GpuDescriptor(address));
        Ok(())
    }

    fn bind_material<R: DrawRecorder>(&self, recorder: &mut R, material: MaterialHandle) -> RhiResult<()> {
        let table = self
            .material_tables
            .get(material.0 as usize)
            .copied()
            .flatten()
            .ok_or_else(|| RhiError::InvalidHandle(format!("material {} has no texture view", material.0)))?;
        recorder.set_descriptor_table(1, table);
        Ok(())
    }

    fn draw_geometry<R: DrawRecorder>(&self, recorder: &mut R, _geometry: GeometryHandle) -> RhiResult<()> {
        recorder.draw_indexed(DrawIndexed::new(CUBE_INDEX_COUNT));
        Ok(())
    }
}

/// Object `index` of `count`: placement, queue class and pipeline.
fn spawn_object(index: usize, count: usize) -> SceneObject {
    let angle = index as f32 / count.max(1) as f32 * TAU;
    let ring = 4.0 + (index % 3) as f32 * 3.0;
    let position = Vec3::new(ring * angle.cos(), (index % 4) as f32 - 1.5, ring * angle.sin());

    let material = match index % 5 {
        0 => MaterialFlags::HAS_TEXTURE,
        1 => MaterialFlags::HAS_TEXTURE | MaterialFlags::NO_CULLING,
        2 => MaterialFlags::WIREFRAME,
        _ => MaterialFlags::empty(),
    };
    // One object in eleven carries a mesh without positions.
    let mesh = if index % 11 == 10 {
        MeshFlags::NORMAL | MeshFlags::UV
    } else {
        MeshFlags::REQUIRED
    };

    SceneObject {
        transform: Transform::from_position(position)
            .with_rotation(Quat::from_rotation_y(angle))
            .with_uniform_scale(0.5 + (index % 3) as f32 * 0.25),
        local_bounds: Aabb::from_center_half_extents(Vec3::ZERO, Vec3::ONE),
        spin: 0.5 + (index % 7) as f32 * 0.2,
        queue: if index % 6 == 5 {
            RenderQueue::Transparent
        } else {
            RenderQueue::Opaque
        },
        pipeline_key: PipelineKey::new(mesh, material),
        texture_view: None,
    }
}

/// Scene state that lives across frames.
struct DemoScene {
    objects: Vec<SceneObject>,
    object_count: usize,
    /// Render-target view per frame slot, with its resolved address.
    back_buffers: Vec<(ResourceViewHandle, CpuDescriptor)>,
    depth_view: ResourceViewHandle,
    pipelines: PipelineCache<HeadlessPipelineFactory>,
    sorter: RenderQueueSorter,
    camera: Camera,
    timer: Timer,
    /// Texture views of despawned objects, tagged with the frame they were
    /// retired on.
    retired: VecDeque<(u64, ResourceViewHandle)>,
    summary: DemoSummary,
}

impl DemoScene {
    fn new(context: &mut GraphicsContext<HeadlessDevice>, object_count: usize) -> Result<Self> {
        let mut objects: Vec<SceneObject> = (0..object_count)
            .map(|i| spawn_object(i, object_count))
            .collect();
        for object in &mut objects {
            object.texture_view = context.alloc_view(ResourceViewKind::ShaderResource);
        }

        let back_buffers = (0..context.config().frames_in_flight)
            .map(|_| {
                let rtv = context
                    .alloc_view(ResourceViewKind::RenderTarget)
                    .context("render-target pool exhausted")?;
                Ok((rtv, context.view(rtv)?.cpu))
            })
            .collect::<Result<Vec<_>>>()?;
        let depth_view = context
            .alloc_view(ResourceViewKind::DepthStencil)
            .context("depth-stencil pool exhausted")?;

        let mut pipelines = PipelineCache::new(HeadlessPipelineFactory);
        for object in &objects {
            pipelines.prepare(object.pipeline_key);
        }

        Ok(Self {
            objects,
            object_count,
            back_buffers,
            depth_view,
            pipelines,
            sorter: context.new_sorter(),
            camera: Camera::new(),
            timer: Timer::new(),
            retired: VecDeque::new(),
            summary: DemoSummary::default(),
        })
    }

    /// Frees views retired long enough ago that no in-flight frame can
    /// still reference them.
    fn release_retired(&mut self, context: &mut GraphicsContext<HeadlessDevice>, frame: u64) -> Result<()> {
        let frames_in_flight = context.config().frames_in_flight as u64;
        while let Some(&(retired_at, handle)) = self.retired.front() {
            if frame < retired_at + frames_in_flight {
                break;
            }
            self.retired.pop_front();
            context.free_view(&mut Some(handle))?;
        }
        Ok(())
    }

    fn respawn(&mut self, context: &mut GraphicsContext<HeadlessDevice>, frame: u64) {
        if frame == 0 || frame % RESPAWN_INTERVAL != 0 || self.objects.is_empty() {
            return;
        }

        let index = (frame / RESPAWN_INTERVAL) as usize % self.objects.len();
        if let Some(handle) = self.objects[index].texture_view.take() {
            self.retired.push_back((frame, handle));
        }
        self.objects[index] = spawn_object(index, self.object_count);
        self.objects[index].texture_view = context.alloc_view(ResourceViewKind::ShaderResource);
        self.summary.respawns += 1;
        debug!("Respawned object {} on frame {}", index, frame);
    }

    fn collect_draws(&mut self, frame: u64, dt: f32) {
        for (index, object) in self.objects.iter_mut().enumerate() {
            object.transform.rotate_y(object.spin * dt);

            let accepted = self.sorter.add(DrawRequest {
                queue: object.queue,
                pipeline_key: object.pipeline_key,
                camera_distance: self.camera.view_depth(object.transform.position),
                world_bounds: object.transform.transform_bounds(&object.local_bounds),
                transform: Some(TransformHandle(index as u32)),
                geometry: Some(GeometryHandle(index as u32)),
                material: object.texture_view.map(|_| MaterialHandle(index as u32)),
            });
            if !accepted {
                self.summary.rejected += 1;
            }
        }

        if frame % MALFORMED_INTERVAL == 0 {
            let accepted = self.sorter.add(DrawRequest {
                queue: RenderQueue::Opaque,
                pipeline_key: PipelineKey::new(MeshFlags::REQUIRED, MaterialFlags::empty()),
                camera_distance: 1.0,
                world_bounds: Aabb::from_center_half_extents(Vec3::ZERO, Vec3::ONE),
                transform: Some(TransformHandle(0)),
                geometry: None,
                material: Some(MaterialHandle(0)),
            });
            if !accepted {
                self.summary.rejected += 1;
            }
        }
    }

    fn render(&mut self, context: &mut GraphicsContext<HeadlessDevice>, frame: u64) -> Result<()> {
        let dt = self.timer.tick().as_secs_f32().min(0.1);
        self.pipelines.poll();
        self.release_retired(context, frame)?;
        self.respawn(context, frame);

        self.camera.orbit(Vec3::ZERO, 18.0, 6.0, frame as f32 * 0.02);
        self.collect_draws(frame, dt);
        self.sorter.cull(&self.camera.frustum());
        self.sorter.sort();

        let bindings = DemoBindings {
            material_tables: self
                .objects
                .iter()
                .map(|object| {
                    object
                        .texture_view
                        .and_then(|handle| context.view(handle).ok())
                        .and_then(|view| view.gpu)
                })
                .collect(),
        };
        let depth_cpu = context.view(self.depth_view)?.cpu;

        let Self {
            back_buffers,
            pipelines,
            sorter,
            ..
        } = self;
        let mut stats = ReplayStats::default();
        let report = context.frames_mut().render_frame(|frame| {
            let back_buffer = ResourceId(frame.slot() as u64);
            let (_, color_view) = back_buffers[frame.slot()];
            let cmd = frame.command_buffer();
            cmd.transition(back_buffer, ResourceState::Present, ResourceState::RenderTarget);
            cmd.clear_render_target(color_view, CLEAR_COLOR);
            cmd.clear_depth(depth_cpu, 1.0);

            stats = sorter.replay(&mut *cmd, pipelines, &bindings)?;

            cmd.transition(back_buffer, ResourceState::RenderTarget, ResourceState::Present);
            Ok(())
        })?;

        let summary = &mut self.summary;
        summary.drawn += stats.drawn;
        summary.culled += stats.culled;
        summary.pipeline_binds += stats.pipeline_binds;
        summary.pipeline_failures += stats.pipeline_failures;
        if report.waited {
            summary.waited_frames += 1;
            summary.longest_wait = summary.longest_wait.max(report.wait_time);
        }
        summary.frames += 1;
        Ok(())
    }

    /// Returns every view the scene holds. The queue must be drained.
    fn teardown(mut self, context: &mut GraphicsContext<HeadlessDevice>) -> Result<DemoSummary> {
        for (_, handle) in self.retired.drain(..) {
            context.free_view(&mut Some(handle))?;
        }
        for object in &mut self.objects {
            context.free_view(&mut object.texture_view)?;
        }
        for (handle, _) in self.back_buffers.drain(..) {
            context.free_view(&mut Some(handle))?;
        }
        context.free_view(&mut Some(self.depth_view))?;

        self.summary.average_frame = self.timer.average_frame_time();
        self.summary.longest_frame = self.timer.longest_frame();
        self.summary.pipelines_built = self.pipelines.builds_started();
        Ok(self.summary)
    }
}

/// Runs the demo for `frame_count` frames over `object_count` objects.
///
/// The queue is drained twice before returning, whether or not a frame
/// failed.
///
/// # Errors
///
/// Returns the first device, submission or binding error.
pub fn run(
    context: &mut GraphicsContext<HeadlessDevice>,
    frame_count: u64,
    object_count: usize,
) -> Result<DemoSummary> {
    let mut scene = DemoScene::new(context, object_count)?;

    let mut failure = None;
    for frame in 0..frame_count {
        if let Err(e) = scene.render(context, frame) {
            warn!("Stopping after {} frames: {:#}", scene.summary.frames, e);
            failure = Some(e);
            break;
        }
    }

    // The second drain finds nothing outstanding and returns at once.
    context.shutdown()?;
    context.shutdown()?;

    if let Some(e) = failure {
        return Err(e);
    }

    let summary = scene.teardown(context)?;
    info!(
        "Shader-resource views in use after teardown: {}",
        context.pool(ResourceViewKind::ShaderResource).active_count()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::RendererConfig;
    use std::sync::Arc;

    fn context() -> GraphicsContext<HeadlessDevice> {
        let device = Arc::new(HeadlessDevice::new(Duration::ZERO).unwrap());
        GraphicsContext::new(device, &RendererConfig::default()).unwrap()
    }

    #[test]
    fn test_demo_runs_and_releases_views() {
        let mut context = context();
        let summary = run(&mut context, 30, 24).unwrap();

        assert_eq!(summary.frames, 30);
        assert!(summary.drawn > 0);
        assert_eq!(summary.respawns, 2);
        // Frames 0, 7, 14, 21, 28 each add one malformed draw.
        assert_eq!(summary.rejected, 5);
        // Objects 10 and 21 use a mesh without positions.
        assert!(summary.pipeline_failures > 0);
        for kind in ResourceViewKind::ALL {
            assert_eq!(context.pool(kind).active_count(), 0);
        }
        assert_eq!(context.frames().frame_number(), 30);
    }

    #[test]
    fn test_spawn_is_deterministic() {
        let a = spawn_object(3, 10);
        let b = spawn_object(3, 10);
        assert_eq!(a.pipeline_key, b.pipeline_key);
        assert_eq!(a.transform, b.transform);
        assert_eq!(a.queue, b.queue);
    }

    #[test]
    fn test_factory_rejects_positionless_layout() {
        let factory = HeadlessPipelineFactory;
        let key = PipelineKey::new(MeshFlags::NORMAL | MeshFlags::UV, MaterialFlags::empty());
        assert!(factory.create(key, &PipelineDesc::from_key(key)).is_err());

        let key = PipelineKey::new(MeshFlags::REQUIRED, MaterialFlags::WIREFRAME);
        let pipeline = factory.create(key, &PipelineDesc::from_key(key)).unwrap();
        assert_eq!(pipeline.id(), PipelineId(key.raw()));
    }
}
