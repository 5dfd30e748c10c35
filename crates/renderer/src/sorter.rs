//! Draw collection, culling, ordering and replay.
//!
//! [`RenderQueueSorter`] collects one [`DrawItem`] per visible mesh each
//! frame, culls them against the camera frustum, sorts them and records them
//! into a command buffer with as few pipeline switches as the order allows.
//!
//! # Ordering
//!
//! Items are ordered by queue class first (`Opaque < Transparent < Overlay`),
//! then within a class:
//!
//! | Class         | Keys                                                   |
//! |---------------|--------------------------------------------------------|
//! | `Opaque`      | quantized distance, pipeline key, exact distance       |
//! | `Transparent` | exact distance, far to near                            |
//! | `Overlay`     | submission order                                       |
//!
//! Quantizing opaque distances into buckets of `distance_unit` keeps rough
//! front-to-back order while letting draws inside one bucket group by
//! pipeline. The sort is stable, so equal items keep submission order.
//!
//! # Example
//!
//! ```
//! use kiln_renderer::pipeline::{MaterialFlags, MeshFlags, PipelineKey};
//! use kiln_renderer::sorter::{
//!     DrawRequest, GeometryHandle, MaterialHandle, RenderQueue, RenderQueueSorter,
//!     TransformHandle,
//! };
//! use kiln_scene::Aabb;
//!
//! let mut sorter = RenderQueueSorter::new(1.0);
//! for (i, distance) in [12.3, 12.7, 5.1].into_iter().enumerate() {
//!     sorter.add(DrawRequest {
//!         queue: RenderQueue::Opaque,
//!         pipeline_key: PipelineKey::new(MeshFlags::REQUIRED, MaterialFlags::empty()),
//!         camera_distance: distance,
//!         world_bounds: Aabb::EMPTY,
//!         transform: Some(TransformHandle(i as u32)),
//!         geometry: Some(GeometryHandle(0)),
//!         material: Some(MaterialHandle(0)),
//!     });
//! }
//! sorter.sort();
//!
//! let order: Vec<f32> = sorter.items().iter().map(|item| item.camera_distance).collect();
//! assert_eq!(order, vec![5.1, 12.3, 12.7]);
//! ```

use std::cmp::Ordering;

use tracing::{trace, warn};

use kiln_rhi::RhiResult;
use kiln_rhi::command::{DrawRecorder, PipelineId};
use kiln_scene::{Aabb, Frustum};

use crate::pipeline::{PipelineCache, PipelineFactory, PipelineKey, PipelineObject};

/// Render queue class. Classes are drawn in declaration order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderQueue {
    #[default]
    Opaque,
    Transparent,
    Overlay,
}

/// Scene-side handle to an object's transform constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransformHandle(pub u32);

/// Scene-side handle to a mesh's vertex and index data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometryHandle(pub u32);

/// Scene-side handle to a material's constants and textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub u32);

/// One draw as submitted by the scene.
///
/// A request with any missing handle is rejected by
/// [`RenderQueueSorter::add`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawRequest {
    pub queue: RenderQueue,
    pub pipeline_key: PipelineKey,
    /// Distance from the camera along its view axis.
    pub camera_distance: f32,
    /// World-space bounds used for culling.
    pub world_bounds: Aabb,
    pub transform: Option<TransformHandle>,
    pub geometry: Option<GeometryHandle>,
    pub material: Option<MaterialHandle>,
}

/// A validated draw in the sorter's list.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawItem {
    pub queue: RenderQueue,
    pub pipeline_key: PipelineKey,
    pub camera_distance: f32,
    /// `camera_distance / distance_unit`, floored and clamped to `u32`.
    pub quantized_distance: u32,
    pub transform: TransformHandle,
    pub geometry: GeometryHandle,
    pub material: MaterialHandle,
    pub world_bounds: Aabb,
    /// Cleared by [`RenderQueueSorter::cull`].
    pub visible: bool,
}

/// Records the scene-side bindings of a draw.
///
/// The sorter only knows handles; the scene resolves them into constant
/// buffer addresses, descriptor tables and index ranges.
pub trait DrawBindings {
    /// Binds per-pass constants (camera) after a pipeline change.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass constants cannot be resolved.
    fn bind_pass<R: DrawRecorder>(&self, recorder: &mut R) -> RhiResult<()> {
        let _ = recorder;
        Ok(())
    }

    /// Binds the object's transform constants.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle no longer resolves.
    fn bind_transform<R: DrawRecorder>(&self, recorder: &mut R, transform: TransformHandle) -> RhiResult<()>;

    /// Binds the material's constants and textures.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle no longer resolves.
    fn bind_material<R: DrawRecorder>(&self, recorder: &mut R, material: MaterialHandle) -> RhiResult<()>;

    /// Records the draw of the mesh.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle no longer resolves.
    fn draw_geometry<R: DrawRecorder>(&self, recorder: &mut R, geometry: GeometryHandle) -> RhiResult<()>;
}

/// What one replay recorded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Items drawn.
    pub drawn: usize,
    /// Items skipped because they were culled.
    pub culled: usize,
    /// Pipeline binds recorded.
    pub pipeline_binds: usize,
    /// Items skipped because their pipeline failed to build.
    pub pipeline_failures: usize,
}

/// Per-frame draw list.
///
/// Not internally synchronized; each frame thread owns its sorter.
#[derive(Debug)]
pub struct RenderQueueSorter {
    items: Vec<DrawItem>,
    distance_unit: f32,
}

impl RenderQueueSorter {
    /// Creates an empty sorter.
    ///
    /// `distance_unit` is the bucket size for opaque front-to-back ordering.
    /// A unit that is not finite and positive falls back to `1.0`.
    pub fn new(distance_unit: f32) -> Self {
        let distance_unit = if distance_unit.is_finite() && distance_unit > 0.0 {
            distance_unit
        } else {
            warn!("Invalid distance unit {}, using 1.0", distance_unit);
            1.0
        };
        Self {
            items: Vec::new(),
            distance_unit,
        }
    }

    /// Adds a draw.
    ///
    /// Returns `false` and drops the request if its transform, geometry or
    /// material handle is missing.
    pub fn add(&mut self, request: DrawRequest) -> bool {
        let (Some(transform), Some(geometry), Some(material)) =
            (request.transform, request.geometry, request.material)
        else {
            return false;
        };

        let quantized_distance = self.quantize(request.camera_distance);
        self.items.push(DrawItem {
            queue: request.queue,
            pipeline_key: request.pipeline_key,
            camera_distance: request.camera_distance,
            quantized_distance,
            transform,
            geometry,
            material,
            world_bounds: request.world_bounds,
            visible: true,
        });
        true
    }

    /// Marks items outside `frustum` invisible and returns how many were
    /// newly culled.
    ///
    /// Culled items stay in the list; [`replay`](Self::replay) skips them.
    pub fn cull(&mut self, frustum: &Frustum) -> usize {
        let mut culled = 0;
        for item in self.items.iter_mut().filter(|item| item.visible) {
            if !frustum.intersects(&item.world_bounds) {
                item.visible = false;
                culled += 1;
            }
        }
        culled
    }

    /// Sorts the list into draw order.
    pub fn sort(&mut self) {
        self.items.sort_by(compare_items);
    }

    /// Records every visible item into `recorder`, then clears the list.
    ///
    /// A pipeline is bound only when an item's key differs from the last bound
    /// key. Items whose pipeline failed to build are skipped and counted; the
    /// cache logs the failure once per key.
    ///
    /// # Arguments
    ///
    /// * `recorder` - Command buffer in the recording state
    /// * `pipelines` - Cache that resolves keys to built pipelines
    /// * `bindings` - Scene hook that records per-draw bindings
    ///
    /// # Errors
    ///
    /// Returns the first error from `bindings`. The list is cleared either way.
    pub fn replay<R, F, B>(
        &mut self,
        recorder: &mut R,
        pipelines: &mut PipelineCache<F>,
        bindings: &B,
    ) -> RhiResult<ReplayStats>
    where
        R: DrawRecorder,
        F: PipelineFactory,
        B: DrawBindings,
    {
        let result = self.record(recorder, pipelines, bindings);
        self.items.clear();
        result
    }

    fn record<R, F, B>(
        &self,
        recorder: &mut R,
        pipelines: &mut PipelineCache<F>,
        bindings: &B,
    ) -> RhiResult<ReplayStats>
    where
        R: DrawRecorder,
        F: PipelineFactory,
        B: DrawBindings,
    {
        let mut stats = ReplayStats::default();
        let mut bound_key = None;

        for item in &self.items {
            if !item.visible {
                stats.culled += 1;
                continue;
            }

            if bound_key != Some(item.pipeline_key) {
                match pipelines.resolve(item.pipeline_key) {
                    Ok(pipeline) => recorder.set_pipeline(pipeline.id()),
                    Err(_) => {
                        stats.pipeline_failures += 1;
                        continue;
                    }
                }
                bound_key = Some(item.pipeline_key);
                stats.pipeline_binds += 1;
                bindings.bind_pass(recorder)?;
            }

            bindings.bind_transform(recorder, item.transform)?;
            bindings.bind_material(recorder, item.material)?;
            bindings.draw_geometry(recorder, item.geometry)?;
            stats.drawn += 1;
        }

        trace!(
            "Replayed {} draws with {} pipeline binds",
            stats.drawn, stats.pipeline_binds
        );
        Ok(stats)
    }

    /// Records a depth-only pass over the visible opaque items.
    ///
    /// Binds `depth_pipeline` once, then each item's transform and geometry.
    /// The list is left intact for the main [`replay`](Self::replay). Call
    /// after [`sort`](Self::sort) so the pass runs front to back.
    ///
    /// Returns the number of items drawn.
    ///
    /// # Errors
    ///
    /// Returns the first error from `bindings`.
    pub fn replay_depth_prepass<R, B>(
        &self,
        recorder: &mut R,
        depth_pipeline: PipelineId,
        bindings: &B,
    ) -> RhiResult<usize>
    where
        R: DrawRecorder,
        B: DrawBindings,
    {
        let mut drawn = 0;
        for item in self
            .items
            .iter()
            .filter(|item| item.visible && item.queue == RenderQueue::Opaque)
        {
            if drawn == 0 {
                recorder.set_pipeline(depth_pipeline);
            }
            bindings.bind_transform(recorder, item.transform)?;
            bindings.draw_geometry(recorder, item.geometry)?;
            drawn += 1;
        }
        Ok(drawn)
    }

    /// Number of items, visible or not.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The items in their current order.
    #[inline]
    pub fn items(&self) -> &[DrawItem] {
        &self.items
    }

    /// Bucket size for opaque distance quantization.
    #[inline]
    pub fn distance_unit(&self) -> f32 {
        self.distance_unit
    }

    /// Removes every item without recording.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn quantize(&self, distance: f32) -> u32 {
        // Float-to-int `as` saturates; NaN and negative distances become 0.
        (distance / self.distance_unit).floor() as u32
    }
}

fn compare_items(a: &DrawItem, b: &DrawItem) -> Ordering {
    a.queue.cmp(&b.queue).then_with(|| match a.queue {
        RenderQueue::Opaque => a
            .quantized_distance
            .cmp(&b.quantized_distance)
            .then(a.pipeline_key.cmp(&b.pipeline_key))
            .then(a.camera_distance.total_cmp(&b.camera_distance)),
        RenderQueue::Transparent => b.camera_distance.total_cmp(&a.camera_distance),
        RenderQueue::Overlay => Ordering::Equal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use kiln_rhi::command::{
        CommandRecorder, DrawIndexed, RecordedCommand, RecordingCommandBuffer,
    };
    use kiln_rhi::descriptor::GpuDescriptor;
    use kiln_rhi::{RhiError, RhiResult};
    use kiln_scene::Camera;

    use crate::error::PipelineError;
    use crate::pipeline::{FillMode, MaterialFlags, MeshFlags, PipelineDesc};

    struct IdPipeline(PipelineId);

    impl PipelineObject for IdPipeline {
        fn id(&self) -> PipelineId {
            self.0
        }
    }

    /// Builds every key except wireframe ones.
    struct NoWireframe;

    impl PipelineFactory for NoWireframe {
        type Pipeline = IdPipeline;

        fn create(&self, key: PipelineKey, desc: &PipelineDesc) -> Result<IdPipeline, PipelineError> {
            if desc.fill_mode == FillMode::Wireframe {
                return Err(PipelineError::BuildFailed {
                    key,
                    reason: "wireframe unsupported".to_string(),
                });
            }
            Ok(IdPipeline(PipelineId(key.raw())))
        }
    }

    struct Bindings {
        stale_material: Option<MaterialHandle>,
    }

    impl DrawBindings for Bindings {
        fn bind_pass<R: DrawRecorder>(&self, recorder: &mut R) -> RhiResult<()> {
            recorder.set_constant_buffer(2, GpuDescriptor(0xCA00));
            Ok(())
        }

        fn bind_transform<R: DrawRecorder>(&self, recorder: &mut R, transform: TransformHandle) -> RhiResult<()> {
            recorder.set_constant_buffer(0, GpuDescriptor(0x1000 + transform.0 as u64 * 256));
            Ok(())
        }

        fn bind_material<R: DrawRecorder>(&self, recorder: &mut R, material: MaterialHandle) -> RhiResult<()> {
            if self.stale_material == Some(material) {
                return Err(RhiError::StaleHandle {
                    index: material.0,
                    generation: 0,
                });
            }
            recorder.set_descriptor_table(1, GpuDescriptor(0x8000 + material.0 as u64 * 64));
            Ok(())
        }

        fn draw_geometry<R: DrawRecorder>(&self, recorder: &mut R, geometry: GeometryHandle) -> RhiResult<()> {
            recorder.draw_indexed(DrawIndexed::new(geometry.0 * 3));
            Ok(())
        }
    }

    const BINDINGS: Bindings = Bindings {
        stale_material: None,
    };

    fn plain_key() -> PipelineKey {
        PipelineKey::new(MeshFlags::REQUIRED, MaterialFlags::empty())
    }

    fn textured_key() -> PipelineKey {
        PipelineKey::new(MeshFlags::REQUIRED, MaterialFlags::HAS_TEXTURE)
    }

    fn request(queue: RenderQueue, key: PipelineKey, distance: f32, id: u32) -> DrawRequest {
        DrawRequest {
            queue,
            pipeline_key: key,
            camera_distance: distance,
            world_bounds: Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(0.5)),
            transform: Some(TransformHandle(id)),
            geometry: Some(GeometryHandle(id + 1)),
            material: Some(MaterialHandle(id)),
        }
    }

    fn recording() -> RecordingCommandBuffer {
        let mut cmd = RecordingCommandBuffer::new();
        cmd.begin().unwrap();
        cmd
    }

    fn distances(sorter: &RenderQueueSorter) -> Vec<f32> {
        sorter.items().iter().map(|item| item.camera_distance).collect()
    }

    #[test]
    fn test_add_rejects_missing_handles() {
        let mut sorter = RenderQueueSorter::new(1.0);

        let mut missing = request(RenderQueue::Opaque, plain_key(), 1.0, 0);
        missing.transform = None;
        assert!(!sorter.add(missing));

        let mut missing = request(RenderQueue::Opaque, plain_key(), 1.0, 0);
        missing.geometry = None;
        assert!(!sorter.add(missing));

        let mut missing = request(RenderQueue::Opaque, plain_key(), 1.0, 0);
        missing.material = None;
        assert!(!sorter.add(missing));

        assert!(sorter.is_empty());
        assert!(sorter.add(request(RenderQueue::Opaque, plain_key(), 1.0, 0)));
        assert_eq!(sorter.len(), 1);
    }

    #[test]
    fn test_quantization() {
        let mut sorter = RenderQueueSorter::new(2.0);
        for distance in [5.0, 3.9, -4.0, f32::NAN, 1e12] {
            sorter.add(request(RenderQueue::Opaque, plain_key(), distance, 0));
        }
        let buckets: Vec<u32> = sorter.items().iter().map(|item| item.quantized_distance).collect();
        assert_eq!(buckets, vec![2, 1, 0, 0, u32::MAX]);
    }

    #[test]
    fn test_invalid_unit_falls_back() {
        assert_eq!(RenderQueueSorter::new(0.0).distance_unit(), 1.0);
        assert_eq!(RenderQueueSorter::new(f32::INFINITY).distance_unit(), 1.0);
        assert_eq!(RenderQueueSorter::new(0.25).distance_unit(), 0.25);
    }

    #[test]
    fn test_opaque_front_to_back() {
        let mut sorter = RenderQueueSorter::new(1.0);
        for (i, distance) in [12.3, 12.7, 5.1].into_iter().enumerate() {
            sorter.add(request(RenderQueue::Opaque, plain_key(), distance, i as u32));
        }
        sorter.sort();
        assert_eq!(distances(&sorter), vec![5.1, 12.3, 12.7]);
    }

    #[test]
    fn test_opaque_groups_by_key_within_bucket() {
        let mut sorter = RenderQueueSorter::new(1.0);
        sorter.add(request(RenderQueue::Opaque, textured_key(), 3.1, 0));
        sorter.add(request(RenderQueue::Opaque, plain_key(), 3.9, 1));
        sorter.add(request(RenderQueue::Opaque, textured_key(), 3.2, 2));
        sorter.add(request(RenderQueue::Opaque, plain_key(), 3.5, 3));
        sorter.sort();

        let keys: Vec<PipelineKey> = sorter.items().iter().map(|item| item.pipeline_key).collect();
        assert_eq!(keys, vec![plain_key(), plain_key(), textured_key(), textured_key()]);
        assert_eq!(distances(&sorter), vec![3.5, 3.9, 3.1, 3.2]);
    }

    #[test]
    fn test_transparent_back_to_front() {
        let mut sorter = RenderQueueSorter::new(1.0);
        for (i, distance) in [1.0, 9.0, 4.0].into_iter().enumerate() {
            sorter.add(request(RenderQueue::Transparent, plain_key(), distance, i as u32));
        }
        sorter.sort();
        assert_eq!(distances(&sorter), vec![9.0, 4.0, 1.0]);
    }

    #[test]
    fn test_queue_class_precedes_distance() {
        let mut sorter = RenderQueueSorter::new(1.0);
        sorter.add(request(RenderQueue::Overlay, plain_key(), 0.5, 0));
        sorter.add(request(RenderQueue::Transparent, plain_key(), 0.5, 1));
        sorter.add(request(RenderQueue::Opaque, plain_key(), 100.0, 2));
        sorter.sort();

        let queues: Vec<RenderQueue> = sorter.items().iter().map(|item| item.queue).collect();
        assert_eq!(
            queues,
            vec![RenderQueue::Opaque, RenderQueue::Transparent, RenderQueue::Overlay]
        );
    }

    #[test]
    fn test_overlay_keeps_submission_order() {
        let mut sorter = RenderQueueSorter::new(1.0);
        for (i, distance) in [3.0, 1.0, 2.0].into_iter().enumerate() {
            sorter.add(request(RenderQueue::Overlay, textured_key(), distance, i as u32));
        }
        sorter.sort();
        assert_eq!(distances(&sorter), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_cull_marks_outside_items() {
        let camera = Camera::new();
        let frustum = camera.frustum();
        let mut sorter = RenderQueueSorter::new(1.0);

        let inside = request(RenderQueue::Opaque, plain_key(), 5.0, 0);
        let mut behind = request(RenderQueue::Opaque, plain_key(), -5.0, 1);
        behind.world_bounds = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, 20.0), Vec3::ONE);
        sorter.add(inside);
        sorter.add(behind);

        assert_eq!(sorter.cull(&frustum), 1);
        assert_eq!(sorter.cull(&frustum), 0);
        assert_eq!(sorter.len(), 2);
        assert!(sorter.items()[0].visible);
        assert!(!sorter.items()[1].visible);
    }

    #[test]
    fn test_replay_minimizes_pipeline_binds() {
        let mut sorter = RenderQueueSorter::new(10.0);
        let keys = [textured_key(), plain_key(), textured_key(), plain_key()];
        for (i, key) in keys.into_iter().enumerate() {
            sorter.add(request(RenderQueue::Opaque, key, 1.0 + i as f32, i as u32));
        }
        sorter.sort();

        let mut cmd = recording();
        let mut pipelines = PipelineCache::new(NoWireframe);
        let stats = sorter.replay(&mut cmd, &mut pipelines, &BINDINGS).unwrap();

        assert_eq!(stats.drawn, 4);
        assert_eq!(stats.pipeline_binds, 2);
        assert_eq!(
            cmd.pipeline_binds(),
            vec![PipelineId(plain_key().raw()), PipelineId(textured_key().raw())]
        );
        assert_eq!(cmd.draw_count(), 4);
        assert!(sorter.is_empty());
    }

    #[test]
    fn test_replay_binding_order() {
        let mut sorter = RenderQueueSorter::new(1.0);
        sorter.add(request(RenderQueue::Opaque, plain_key(), 2.0, 4));

        let mut cmd = recording();
        let mut pipelines = PipelineCache::new(NoWireframe);
        sorter.replay(&mut cmd, &mut pipelines, &BINDINGS).unwrap();

        assert_eq!(
            cmd.commands(),
            &[
                RecordedCommand::SetPipeline(PipelineId(plain_key().raw())),
                RecordedCommand::SetConstantBuffer {
                    root_slot: 2,
                    address: GpuDescriptor(0xCA00)
                },
                RecordedCommand::SetConstantBuffer {
                    root_slot: 0,
                    address: GpuDescriptor(0x1000 + 4 * 256)
                },
                RecordedCommand::SetDescriptorTable {
                    root_slot: 1,
                    table: GpuDescriptor(0x8000 + 4 * 64)
                },
                RecordedCommand::DrawIndexed(DrawIndexed::new(15)),
            ]
        );
    }

    #[test]
    fn test_replay_skips_culled_and_failed() {
        let wireframe = PipelineKey::new(MeshFlags::REQUIRED, MaterialFlags::WIREFRAME);
        let mut sorter = RenderQueueSorter::new(1.0);
        sorter.add(request(RenderQueue::Opaque, plain_key(), 1.0, 0));
        sorter.add(request(RenderQueue::Opaque, wireframe, 2.0, 1));
        sorter.add(request(RenderQueue::Opaque, wireframe, 2.5, 2));
        sorter.add(request(RenderQueue::Opaque, plain_key(), 3.0, 3));
        let mut hidden = request(RenderQueue::Opaque, plain_key(), 4.0, 4);
        hidden.world_bounds = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, 50.0), Vec3::ONE);
        sorter.add(hidden);

        sorter.cull(&Camera::new().frustum());
        sorter.sort();

        let mut cmd = recording();
        let mut pipelines = PipelineCache::new(NoWireframe);
        let stats = sorter.replay(&mut cmd, &mut pipelines, &BINDINGS).unwrap();

        assert_eq!(
            stats,
            ReplayStats {
                drawn: 2,
                culled: 1,
                pipeline_binds: 1,
                pipeline_failures: 2,
            }
        );
        // The plain pipeline stays bound across the skipped items.
        assert_eq!(cmd.pipeline_binds(), vec![PipelineId(plain_key().raw())]);
        // The failed key was built once and memoized.
        assert_eq!(pipelines.builds_started(), 2);
    }

    #[test]
    fn test_replay_error_still_clears() {
        let mut sorter = RenderQueueSorter::new(1.0);
        sorter.add(request(RenderQueue::Opaque, plain_key(), 1.0, 0));
        sorter.add(request(RenderQueue::Opaque, plain_key(), 2.0, 1));

        let bindings = Bindings {
            stale_material: Some(MaterialHandle(1)),
        };
        let mut cmd = recording();
        let mut pipelines = PipelineCache::new(NoWireframe);
        let err = sorter.replay(&mut cmd, &mut pipelines, &bindings).unwrap_err();

        assert!(matches!(err, RhiError::StaleHandle { index: 1, .. }));
        assert!(sorter.is_empty());
        assert_eq!(cmd.draw_count(), 1);
    }

    #[test]
    fn test_replay_empty_records_nothing() {
        let mut sorter = RenderQueueSorter::new(1.0);
        let mut cmd = recording();
        let mut pipelines = PipelineCache::new(NoWireframe);
        let stats = sorter.replay(&mut cmd, &mut pipelines, &BINDINGS).unwrap();

        assert_eq!(stats, ReplayStats::default());
        assert!(cmd.commands().is_empty());
        assert!(pipelines.is_empty());
    }

    #[test]
    fn test_depth_prepass_draws_visible_opaque() {
        let mut sorter = RenderQueueSorter::new(1.0);
        sorter.add(request(RenderQueue::Opaque, plain_key(), 1.0, 0));
        sorter.add(request(RenderQueue::Opaque, textured_key(), 2.0, 1));
        sorter.add(request(RenderQueue::Transparent, plain_key(), 3.0, 2));
        sorter.sort();

        let mut cmd = recording();
        let drawn = sorter
            .replay_depth_prepass(&mut cmd, PipelineId(99), &BINDINGS)
            .unwrap();

        assert_eq!(drawn, 2);
        assert_eq!(cmd.pipeline_binds(), vec![PipelineId(99)]);
        assert_eq!(cmd.draw_count(), 2);
        assert_eq!(sorter.len(), 3);
    }
}
