//! Pipeline keys, descriptions and the pipeline cache.
//!
//! A draw's pipeline is identified by a [`PipelineKey`], which packs the mesh's
//! vertex attributes and the material's render flags into one `u64`:
//!
//! ```text
//!  63            32 31             0
//! +----------------+----------------+
//! |   MeshFlags    | MaterialFlags  |
//! +----------------+----------------+
//! ```
//!
//! Sorting by key groups draws that share a pipeline, so the replay loop only
//! rebinds when the key changes.
//!
//! # Overview
//!
//! [`PipelineDesc::from_key`] derives the concrete configuration (vertex
//! layout, cull mode, fill mode, pixel stage) from a key. A [`PipelineFactory`]
//! turns that description into a backend pipeline object. [`PipelineCache`]
//! memoizes the result per key and can build ahead of time on background
//! threads.
//!
//! # Example
//!
//! ```
//! use kiln_renderer::pipeline::{MaterialFlags, MeshFlags, PipelineKey};
//!
//! let key = PipelineKey::new(MeshFlags::REQUIRED, MaterialFlags::HAS_TEXTURE);
//! assert_eq!(key.mesh_flags(), MeshFlags::REQUIRED);
//! assert_eq!(key.material_flags(), MaterialFlags::HAS_TEXTURE);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bitflags::bitflags;
use tracing::{debug, warn};

use kiln_rhi::command::PipelineId;

use crate::error::PipelineError;

bitflags! {
    /// Vertex attributes a mesh provides.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct MeshFlags: u32 {
        const POSITION = 1;
        const NORMAL = 1 << 1;
        const UV = 1 << 2;
        /// Every attribute the standard lit pipeline reads.
        const REQUIRED = Self::POSITION.bits() | Self::NORMAL.bits() | Self::UV.bits();
    }
}

bitflags! {
    /// Material render flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct MaterialFlags: u32 {
        const HAS_TEXTURE = 1;
        const NO_CULLING = 1 << 1;
        const WIREFRAME = 1 << 2;
    }
}

/// Packed mesh and material flags identifying one pipeline configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineKey(u64);

impl PipelineKey {
    /// Packs `mesh` into the high 32 bits and `material` into the low 32 bits.
    #[inline]
    pub const fn new(mesh: MeshFlags, material: MaterialFlags) -> Self {
        Self(((mesh.bits() as u64) << 32) | material.bits() as u64)
    }

    /// Wraps an already packed value.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The packed value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Mesh flags, including bits this version does not name.
    #[inline]
    pub const fn mesh_flags(self) -> MeshFlags {
        MeshFlags::from_bits_retain((self.0 >> 32) as u32)
    }

    /// Material flags, including bits this version does not name.
    #[inline]
    pub const fn material_flags(self) -> MaterialFlags {
        MaterialFlags::from_bits_retain(self.0 as u32)
    }
}

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Face culling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Back,
}

/// Polygon fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
}

/// Which pixel stage a pipeline runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelStage {
    /// Lit, untextured.
    Lit,
    /// Lit, sampling the material's base color texture.
    LitTextured,
}

/// Data type of one vertex attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    /// Size in bytes.
    #[inline]
    pub const fn size(self) -> u32 {
        match self {
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }
}

/// One attribute of the interleaved vertex layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Which mesh attribute this is.
    pub semantic: MeshFlags,
    /// Shader input location.
    pub location: u32,
    pub format: VertexFormat,
    /// Byte offset inside the vertex.
    pub offset: u32,
}

/// Concrete pipeline configuration derived from a [`PipelineKey`].
///
/// Derivation is a pure function of the key: equal keys always produce equal
/// descriptions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineDesc {
    pub key: PipelineKey,
    /// Interleaved attributes in shader location order.
    pub vertex_attributes: Vec<VertexAttribute>,
    /// Bytes per vertex.
    pub vertex_stride: u32,
    pub pixel_stage: PixelStage,
    pub cull_mode: CullMode,
    pub fill_mode: FillMode,
}

impl PipelineDesc {
    /// Derives the description for `key`.
    ///
    /// - Vertex attributes are appended in position, normal, UV order for
    ///   each mesh flag present; positions are four-component.
    /// - `HAS_TEXTURE` selects the textured pixel stage.
    /// - `NO_CULLING` disables back-face culling.
    /// - `WIREFRAME` switches to wireframe fill.
    pub fn from_key(key: PipelineKey) -> Self {
        let mesh = key.mesh_flags();
        let material = key.material_flags();

        let mut vertex_attributes = Vec::with_capacity(3);
        let mut offset = 0;
        for (semantic, format) in [
            (MeshFlags::POSITION, VertexFormat::Float32x4),
            (MeshFlags::NORMAL, VertexFormat::Float32x3),
            (MeshFlags::UV, VertexFormat::Float32x2),
        ] {
            if mesh.contains(semantic) {
                vertex_attributes.push(VertexAttribute {
                    semantic,
                    location: vertex_attributes.len() as u32,
                    format,
                    offset,
                });
                offset += format.size();
            }
        }

        Self {
            key,
            vertex_attributes,
            vertex_stride: offset,
            pixel_stage: if material.contains(MaterialFlags::HAS_TEXTURE) {
                PixelStage::LitTextured
            } else {
                PixelStage::Lit
            },
            cull_mode: if material.contains(MaterialFlags::NO_CULLING) {
                CullMode::None
            } else {
                CullMode::Back
            },
            fill_mode: if material.contains(MaterialFlags::WIREFRAME) {
                FillMode::Wireframe
            } else {
                FillMode::Solid
            },
        }
    }
}

/// A built pipeline that can be bound on a command buffer.
pub trait PipelineObject {
    /// Identifier passed to [`DrawRecorder::set_pipeline`](kiln_rhi::command::DrawRecorder::set_pipeline).
    fn id(&self) -> PipelineId;
}

/// Builds backend pipelines from descriptions.
///
/// Factories are shared with background build threads, so they must be
/// `Send + Sync`.
pub trait PipelineFactory: Send + Sync + 'static {
    /// Backend pipeline type.
    type Pipeline: PipelineObject + Send + 'static;

    /// Builds the pipeline for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BuildFailed`] if the backend rejects the
    /// description (shader compilation, unsupported state).
    fn create(&self, key: PipelineKey, desc: &PipelineDesc) -> Result<Self::Pipeline, PipelineError>;
}

/// Where a key is in its build lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// A background build is running or finished but not yet collected.
    Pending,
    Ready,
    Failed,
}

type BuildResult<P> = Result<P, PipelineError>;

/// Memoizes pipelines per key.
///
/// ```text
///            prepare            poll / resolve
/// unknown ----------> Pending ------------------> Ready | Failed
///    |                                               ^
///    +----------------- resolve (synchronous) -------+
/// ```
///
/// A key that failed stays failed; it is never rebuilt.
///
/// # Thread Safety
///
/// The cache itself is used from the frame thread only. Background builds
/// hold an `Arc` of the factory and hand their result back through a join
/// handle.
pub struct PipelineCache<F: PipelineFactory> {
    factory: Arc<F>,
    pending: HashMap<PipelineKey, JoinHandle<BuildResult<F::Pipeline>>>,
    built: HashMap<PipelineKey, BuildResult<F::Pipeline>>,
    builds_started: usize,
}

impl<F: PipelineFactory> PipelineCache<F> {
    /// Creates an empty cache over `factory`.
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            pending: HashMap::new(),
            built: HashMap::new(),
            builds_started: 0,
        }
    }

    /// Returns the factory.
    #[inline]
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Starts building `key` on a background thread.
    ///
    /// Does nothing if the key is already pending, ready or failed. Returns
    /// whether a build was started. If the thread cannot be spawned the key is
    /// left unknown and [`resolve`](Self::resolve) builds it synchronously.
    pub fn prepare(&mut self, key: PipelineKey) -> bool {
        if self.state(key).is_some() {
            return false;
        }

        let factory = Arc::clone(&self.factory);
        let spawned = thread::Builder::new()
            .name(format!("kiln-pipeline-{:x}", key.raw()))
            .spawn(move || factory.create(key, &PipelineDesc::from_key(key)));

        match spawned {
            Ok(handle) => {
                debug!("Started background build for pipeline {}", key);
                self.pending.insert(key, handle);
                self.builds_started += 1;
                true
            }
            Err(e) => {
                warn!("Could not spawn build thread for pipeline {}: {}", key, e);
                false
            }
        }
    }

    /// Collects background builds that have finished, without blocking.
    ///
    /// Returns the number of keys that left the pending state.
    pub fn poll(&mut self) -> usize {
        let finished: Vec<PipelineKey> = self
            .pending
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(key, _)| *key)
            .collect();

        for key in &finished {
            if let Some(handle) = self.pending.remove(key) {
                let result = join_build(*key, handle);
                self.record(*key, result);
            }
        }
        finished.len()
    }

    /// Returns the pipeline for `key`, building or joining as needed.
    ///
    /// This is the only way to obtain a pipeline, so a pipeline is never
    /// bound before its build has completed.
    ///
    /// - Pending: blocks until the background build finishes.
    /// - Unknown: builds synchronously on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns the key's recorded [`PipelineError`] if its build failed, now
    /// or on an earlier call.
    pub fn resolve(&mut self, key: PipelineKey) -> Result<&F::Pipeline, PipelineError> {
        if let Some(handle) = self.pending.remove(&key) {
            let result = join_build(key, handle);
            self.record(key, result);
        }

        if !self.built.contains_key(&key) {
            self.builds_started += 1;
            let result = self.factory.create(key, &PipelineDesc::from_key(key));
            self.record(key, result);
        }

        match self.built.get(&key) {
            Some(Ok(pipeline)) => Ok(pipeline),
            Some(Err(e)) => Err(e.clone()),
            None => Err(PipelineError::BuildFailed {
                key,
                reason: "build result missing".to_string(),
            }),
        }
    }

    /// Lifecycle state of `key`, `None` if it was never requested.
    pub fn state(&self, key: PipelineKey) -> Option<PipelineState> {
        if self.pending.contains_key(&key) {
            return Some(PipelineState::Pending);
        }
        self.built.get(&key).map(|result| match result {
            Ok(_) => PipelineState::Ready,
            Err(_) => PipelineState::Failed,
        })
    }

    /// Number of keys the cache knows about, in any state.
    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len() + self.built.len()
    }

    /// Whether no key has been requested yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of builds started, background and synchronous.
    #[inline]
    pub fn builds_started(&self) -> usize {
        self.builds_started
    }

    fn record(&mut self, key: PipelineKey, result: BuildResult<F::Pipeline>) {
        match &result {
            Ok(_) => debug!("Pipeline {} ready", key),
            Err(e) => warn!("{}", e),
        }
        self.built.insert(key, result);
    }
}

impl<F: PipelineFactory> Drop for PipelineCache<F> {
    fn drop(&mut self) {
        for (key, handle) in self.pending.drain() {
            if handle.join().is_err() {
                warn!("Pipeline {} build thread panicked during shutdown", key);
            }
        }
    }
}

fn join_build<P>(key: PipelineKey, handle: JoinHandle<BuildResult<P>>) -> BuildResult<P> {
    handle
        .join()
        .unwrap_or(Err(PipelineError::BuildPanicked { key }))
}
