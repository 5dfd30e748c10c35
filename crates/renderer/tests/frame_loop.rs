//! End-to-end frame loop tests over the software and fake devices.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use glam::Vec3;

use kiln_core::RendererConfig;
use kiln_rhi::command::{
    DrawIndexed, DrawRecorder, PipelineId, RecordedCommand, ResourceId, ResourceState,
};
use kiln_rhi::descriptor::{GpuDescriptor, ResourceViewKind};
use kiln_rhi::device::GraphicsDevice;
use kiln_rhi::headless::HeadlessDevice;
use kiln_rhi::testing::FakeDevice;
use kiln_rhi::RhiResult;
use kiln_renderer::pipeline::{
    MaterialFlags, MeshFlags, PipelineDesc, PipelineObject, PipelineState,
};
use kiln_renderer::sorter::{GeometryHandle, MaterialHandle, TransformHandle};
use kiln_renderer::{
    DrawBindings, DrawRequest, GraphicsContext, PipelineCache, PipelineError, PipelineFactory,
    PipelineKey, RenderQueue,
};
use kiln_scene::{Aabb, Camera, Transform};

struct TestPipeline(PipelineId);

impl PipelineObject for TestPipeline {
    fn id(&self) -> PipelineId {
        self.0
    }
}

struct TestFactory;

impl PipelineFactory for TestFactory {
    type Pipeline = TestPipeline;

    fn create(&self, key: PipelineKey, _desc: &PipelineDesc) -> Result<TestPipeline, PipelineError> {
        Ok(TestPipeline(PipelineId(key.raw())))
    }
}

struct TestBindings;

impl DrawBindings for TestBindings {
    fn bind_transform<R: DrawRecorder>(&self, recorder: &mut R, transform: TransformHandle) -> RhiResult<()> {
        recorder.set_constant_buffer(0, GpuDescriptor(transform.0 as u64 * 256));
        Ok(())
    }

    fn bind_material<R: DrawRecorder>(&self, recorder: &mut R, material: MaterialHandle) -> RhiResult<()> {
        recorder.set_descriptor_table(1, GpuDescriptor(material.0 as u64 * 64));
        Ok(())
    }

    fn draw_geometry<R: DrawRecorder>(&self, recorder: &mut R, geometry: GeometryHandle) -> RhiResult<()> {
        recorder.draw_indexed(DrawIndexed::new(36 + geometry.0));
        Ok(())
    }
}

fn object_request(camera: &Camera, index: u32, position: Vec3, key: PipelineKey) -> DrawRequest {
    let local = Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(0.5));
    let transform = Transform::from_position(position);
    DrawRequest {
        queue: RenderQueue::Opaque,
        pipeline_key: key,
        camera_distance: camera.view_depth(position),
        world_bounds: transform.transform_bounds(&local),
        transform: Some(TransformHandle(index)),
        geometry: Some(GeometryHandle(index)),
        material: Some(MaterialHandle(index)),
    }
}

fn small_config(frames_in_flight: usize) -> RendererConfig {
    let mut config = RendererConfig::default();
    config.frames_in_flight = frames_in_flight;
    config.resource_views.shader_resources = 16;
    config
}

#[test]
fn test_cpu_waits_when_all_slots_in_flight() {
    let device = Arc::new(FakeDevice::new());
    let mut context = GraphicsContext::new(device.clone(), &small_config(2)).unwrap();

    let first = context.frames_mut().render_frame(|_| Ok(())).unwrap();
    let second = context.frames_mut().render_frame(|_| Ok(())).unwrap();
    assert!(!first.waited);
    assert!(!second.waited);

    let completer = {
        let device = device.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            device.complete_through(1);
        })
    };

    let third = context.frames_mut().render_frame(|_| Ok(())).unwrap();
    completer.join().unwrap();

    assert!(third.waited);
    assert_eq!(third.slot, 0);
    assert_eq!(third.fence_value, 3);
    // Slot 1 is still waiting on value 2.
    assert_eq!(context.frames().queue().completed_value().unwrap(), 1);

    let completer = {
        let device = device.clone();
        thread::spawn(move || {
            while device.highest_scheduled() < 4 {
                thread::yield_now();
            }
            device.complete_all();
        })
    };
    context.shutdown().unwrap();
    completer.join().unwrap();
}

#[test]
fn test_in_flight_frames_never_exceed_slot_count() {
    let device = Arc::new(HeadlessDevice::new(Duration::from_millis(2)).unwrap());
    let mut context = GraphicsContext::new(device.clone(), &small_config(3)).unwrap();

    for _ in 0..12 {
        let report = context.frames_mut().render_frame(|_| Ok(())).unwrap();
        let completed = context.frames().queue().completed_value().unwrap();
        assert!(report.fence_value - completed <= 3);
    }

    context.shutdown().unwrap();
    context.shutdown().unwrap();
    assert_eq!(device.submitted_count(), 12);
    assert_eq!(context.frames().queue().completed_value().unwrap(), 14);
}

#[test]
fn test_sorted_frame_replay() {
    let device = Arc::new(FakeDevice::auto_completing());
    let mut context = GraphicsContext::new(device.clone(), &small_config(2)).unwrap();
    let mut pipelines = PipelineCache::new(TestFactory);
    let mut sorter = context.new_sorter();

    let rtv = context.alloc_view(ResourceViewKind::RenderTarget).unwrap();
    let dsv = context.alloc_view(ResourceViewKind::DepthStencil).unwrap();
    let rtv_cpu = context.view(rtv).unwrap().cpu;
    let dsv_cpu = context.view(dsv).unwrap().cpu;

    let camera = Camera::perspective(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 1.0, 1.0, 0.1, 100.0);
    let plain = PipelineKey::new(MeshFlags::REQUIRED, MaterialFlags::empty());
    let textured = PipelineKey::new(MeshFlags::REQUIRED, MaterialFlags::HAS_TEXTURE);

    pipelines.prepare(textured);

    sorter.add(object_request(&camera, 0, Vec3::new(0.0, 0.0, -2.0), textured));
    sorter.add(object_request(&camera, 1, Vec3::new(0.5, 0.0, 5.0), plain));
    sorter.add(object_request(&camera, 2, Vec3::new(-0.5, 0.0, -2.4), plain));
    sorter.add(object_request(&camera, 3, Vec3::new(0.0, 0.0, 40.0), plain));
    let mut malformed = object_request(&camera, 4, Vec3::ZERO, plain);
    malformed.material = None;
    assert!(!sorter.add(malformed));

    assert_eq!(sorter.cull(&camera.frustum()), 1);
    sorter.sort();

    let report = context
        .frames_mut()
        .render_frame(|frame| {
            let cmd = frame.command_buffer();
            cmd.transition(ResourceId(0), ResourceState::Present, ResourceState::RenderTarget);
            cmd.clear_render_target(rtv_cpu, [0.1, 0.1, 0.1, 1.0]);
            cmd.clear_depth(dsv_cpu, 1.0);

            let stats = sorter.replay(&mut *cmd, &mut pipelines, &TestBindings)?;
            assert_eq!(stats.drawn, 3);
            assert_eq!(stats.culled, 1);
            assert_eq!(stats.pipeline_binds, 2);

            cmd.transition(ResourceId(0), ResourceState::RenderTarget, ResourceState::Present);
            Ok(())
        })
        .unwrap();

    assert_eq!(report.fence_value, 1);
    assert!(sorter.is_empty());
    assert_eq!(pipelines.state(textured), Some(PipelineState::Ready));

    let commands = device.submissions()[0].commands.clone().unwrap();
    assert_eq!(
        commands.first(),
        Some(&RecordedCommand::Transition {
            resource: ResourceId(0),
            before: ResourceState::Present,
            after: ResourceState::RenderTarget,
        })
    );
    assert_eq!(
        commands.last(),
        Some(&RecordedCommand::Transition {
            resource: ResourceId(0),
            before: ResourceState::RenderTarget,
            after: ResourceState::Present,
        })
    );

    // Object 1 is nearest, then 0 and 2 share a distance bucket and group by key.
    let draws: Vec<u32> = commands
        .iter()
        .filter_map(|cmd| match cmd {
            RecordedCommand::DrawIndexed(draw) => Some(draw.index_count - 36),
            _ => None,
        })
        .collect();
    assert_eq!(draws, vec![1, 2, 0]);

    context.shutdown().unwrap();
}

#[test]
fn test_view_churn_across_frames() {
    let device = Arc::new(FakeDevice::auto_completing());
    let mut context = GraphicsContext::new(device.clone(), &small_config(2)).unwrap();

    let mut live: Vec<Option<_>> = (0..16)
        .map(|_| context.alloc_view(ResourceViewKind::ShaderResource))
        .collect();
    assert!(live.iter().all(Option::is_some));
    assert!(context.alloc_view(ResourceViewKind::ShaderResource).is_none());

    for frame in 0..8 {
        context.frames_mut().render_frame(|_| Ok(())).unwrap();

        let victim = frame * 2 % live.len();
        context.free_view(&mut live[victim]).unwrap();
        live[victim] = context.alloc_view(ResourceViewKind::ShaderResource);
        assert!(live[victim].is_some());
    }

    assert_eq!(context.pool(ResourceViewKind::ShaderResource).active_count(), 16);
    for handle in live.iter().flatten() {
        assert!(context.view(*handle).is_ok());
    }
    assert_eq!(device.name(), "fake");
}
