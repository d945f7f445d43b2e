//! Draw subsystems.
//!
//! Each subsystem is a [`MeshPass`] parameterized by a [`PassKind`]: the kind knows
//! how to turn mesh arrays into GPU buffers and how to draw them, while the pass owns
//! the [`DerivedCache`] that decides when to rebuild. Every subsystem keeps its own
//! cache, so enabling a visualizer never touches the solid renderer's buffers.
mod accel;
mod normals;
mod solid;
mod tangents;
mod wireframe;

pub use accel::{AccelArtifact, AccelStructPass};
pub use normals::{NormalArtifact, NormalPass};
pub use solid::{SolidArtifact, SolidPass, SolidVertex};
pub use tangents::{TangentArtifact, TangentPass};
pub use wireframe::{WireframeArtifact, WireframePass};

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use smallvec::SmallVec;

use crate::{
    Error, Result,
    backend::{Backend, BufferUsage, DrawCall, Viewport},
    gpu::GpuContext,
    mesh::{MeshSource, MeshView},
    reconcile::{ArtifactBuilder, DerivedCache, ReconcileStats},
    registry::Handle,
    rename::RenamePool,
};

/// Constants written before every draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectConstants {
    pub transform: Mat4,
    pub tint: Vec4,
}

/// One slot of the per-draw renaming ring: a constant buffer and its binding.
pub struct ObjectBuffer<B: Backend> {
    pub buffer: Handle<B::Buffer>,
    pub binding: Handle<B::Binding>,
}

impl<B: Backend> ObjectBuffer<B> {
    pub fn new(context: &GpuContext<B>) -> Result<Self> {
        let buffer = context.create_buffer(
            BufferUsage::Constants,
            std::mem::size_of::<ObjectConstants>() as u64,
        )?;
        let binding = context.create_binding(&buffer)?;
        Ok(Self { buffer, binding })
    }

    /// A renaming pool of object buffers sized for `frames_in_flight`.
    pub fn pool(
        context: &GpuContext<B>,
        ring_size: usize,
        frames_in_flight: usize,
    ) -> Result<RenamePool<Self>> {
        let factory_context = context.clone();
        RenamePool::new(ring_size, frames_in_flight, context.clock().clone(), move || {
            ObjectBuffer::new(&factory_context)
        })
    }
}

/// Buffers making up one draw.
pub struct DrawGeometry<'a, B: Backend> {
    pub vertex_buffers: SmallVec<[&'a B::Buffer; 3]>,
    pub index_buffer: Option<&'a B::Buffer>,
    pub count: u32,
    pub tint: Vec4,
}

/// How one subsystem derives and draws its artifact.
///
/// Builders must leave `artifact` untouched when they fail so that the previous
/// buffers keep drawing until a retry succeeds.
pub trait PassKind<B: Backend>: Send {
    const LABEL: &'static str;
    type Artifact: Default + Send;

    fn build_geometry(
        &mut self,
        context: &GpuContext<B>,
        mesh: &MeshView<'_>,
        artifact: &mut Self::Artifact,
    ) -> Result<()>;

    fn build_color(
        &mut self,
        context: &GpuContext<B>,
        mesh: &MeshView<'_>,
        artifact: &mut Self::Artifact,
    ) -> Result<()>;

    /// `None` when the artifact has nothing to rasterize.
    fn draw_geometry<'a>(&self, artifact: &'a Self::Artifact) -> Option<DrawGeometry<'a, B>>;
}

/// Adapts a [`PassKind`] to the reconciliation engine.
struct KindBuilder<'a, B: Backend, K> {
    context: &'a GpuContext<B>,
    kind: &'a mut K,
}

impl<B: Backend, S: MeshSource, K: PassKind<B>> ArtifactBuilder<S> for KindBuilder<'_, B, K> {
    type Artifact = K::Artifact;

    fn build_geometry(&mut self, source: &S, artifact: &mut K::Artifact) -> Result<()> {
        let (context, kind) = (self.context, &mut *self.kind);
        source.read(|mesh| {
            if !mesh.indices_in_bounds() {
                return Err(Error::InvalidMesh(format!(
                    "index out of range for {} vertices",
                    mesh.vertex_count()
                )));
            }
            kind.build_geometry(context, mesh, artifact)
        })
    }

    fn build_color(&mut self, source: &S, artifact: &mut K::Artifact) -> Result<()> {
        let (context, kind) = (self.context, &mut *self.kind);
        source.read(|mesh| kind.build_color(context, mesh, artifact))
    }
}

/// A draw subsystem: a derived cache plus the pipeline its artifacts are drawn with.
pub struct MeshPass<B: Backend, S, K: PassKind<B>> {
    context: GpuContext<B>,
    cache: DerivedCache<S, K::Artifact>,
    kind: K,
    pipeline: Option<Handle<B::Pipeline>>,
}

impl<B: Backend, S: MeshSource, K: PassKind<B>> MeshPass<B, S, K> {
    pub fn new(context: &GpuContext<B>, kind: K, pipeline: Option<Handle<B::Pipeline>>) -> Self {
        Self {
            context: context.clone(),
            cache: DerivedCache::new(K::LABEL),
            kind,
            pipeline,
        }
    }

    pub fn cache(&self) -> &DerivedCache<S, K::Artifact> {
        &self.cache
    }

    pub fn set_pipeline(&mut self, pipeline: Option<Handle<B::Pipeline>>) {
        self.pipeline = pipeline;
    }

    /// Change the kind's parameters. Every artifact is rebuilt on the next update.
    pub fn configure(&mut self, f: impl FnOnce(&mut K)) {
        f(&mut self.kind);
        self.cache.clear();
    }

    /// Release every artifact.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Reconcile the cache against the current sources.
    pub fn update(&mut self, sources: &[Arc<S>]) -> Result<ReconcileStats> {
        let mut builder = KindBuilder {
            context: &self.context,
            kind: &mut self.kind,
        };
        self.cache.reconcile(sources, &mut builder)
    }

    /// Record one draw per built artifact. Returns the number of draws recorded.
    pub fn draw(
        &self,
        recorder: &B::Recorder,
        object_buffers: &mut RenamePool<ObjectBuffer<B>>,
        viewport: Viewport,
        transform: Mat4,
    ) -> Result<u32> {
        let Some(pipeline) = &self.pipeline else {
            return Ok(0);
        };
        let backend = self.context.backend();
        let mut draws = 0;
        for entry in self.cache.iter().filter(|entry| entry.is_complete()) {
            let Some(geometry) = self.kind.draw_geometry(entry.artifact()) else {
                continue;
            };
            if geometry.count == 0 {
                continue;
            }
            let object = object_buffers.next()?;
            let constants = ObjectConstants {
                transform,
                tint: geometry.tint,
            };
            backend.write_buffer(&object.buffer, 0, bytemuck::bytes_of(&constants))?;
            backend.record_draw(
                recorder,
                &DrawCall {
                    pipeline,
                    binding: &object.binding,
                    viewport,
                    vertex_buffers: &geometry.vertex_buffers,
                    index_buffer: geometry.index_buffer,
                    count: geometry.count,
                },
            );
            draws += 1;
        }
        Ok(draws)
    }
}

/// Upload a slice of plain data as a new buffer.
pub(crate) fn upload<B: Backend, T: Pod>(
    context: &GpuContext<B>,
    usage: BufferUsage,
    data: &[T],
) -> Result<Handle<B::Buffer>> {
    context.upload_buffer(usage, bytemuck::cast_slice(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ResourceContext,
        reconcile::EntityId,
        testing::{Command, MockBackend, MockRecorder, TestMesh},
    };

    fn setup() -> (
        GpuContext<MockBackend>,
        RenamePool<ObjectBuffer<MockBackend>>,
        Handle<MockRecorder>,
    ) {
        let context = GpuContext::new(MockBackend::new(), ResourceContext::new());
        let pool = ObjectBuffer::pool(&context, 4, 2).unwrap();
        let recorder = context.create_recorder().unwrap();
        (context, pool, recorder)
    }

    #[test]
    fn test_draw_writes_constants_and_records() {
        let (context, mut pool, recorder) = setup();
        let pipeline = context.add_pipeline(context.backend().pipeline());
        let pipeline_id = pipeline.id;
        let mut pass = MeshPass::new(&context, SolidPass::default(), Some(pipeline));
        let meshes = [TestMesh::quad(1), TestMesh::quad(2)];
        pass.update(&meshes).unwrap();

        let transform = Mat4::from_scale(glam::Vec3::splat(2.0));
        let draws = pass
            .draw(&recorder, &mut pool, Viewport::new(640.0, 480.0), transform)
            .unwrap();
        assert_eq!(draws, 2);

        let commands = recorder.commands.lock().unwrap();
        assert_eq!(commands.len(), 2);
        assert!(matches!(
            &commands[0],
            Command::Draw { pipeline, count: 6, indexed: true, vertex_buffers } if *pipeline == pipeline_id && vertex_buffers.len() == 2
        ));

        for _ in 0..2 {
            pool.next().unwrap();
        }
        // The ring wrapped: this is the buffer written by the first draw.
        let first = pool.next().unwrap();
        let written = first.buffer.data.lock().unwrap().clone();
        let constants: ObjectConstants =
            bytemuck::pod_read_unaligned(&written[..std::mem::size_of::<ObjectConstants>()]);
        assert_eq!(constants.transform, transform);
    }

    #[test]
    fn test_pass_without_pipeline_draws_nothing() {
        let (context, mut pool, recorder) = setup();
        let mut pass = MeshPass::new(&context, SolidPass::default(), None);
        pass.update(&[TestMesh::quad(1)]).unwrap();
        let draws = pass
            .draw(&recorder, &mut pool, Viewport::default(), Mat4::IDENTITY)
            .unwrap();
        assert_eq!(draws, 0);
        assert!(recorder.commands.lock().unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_indices_are_rejected() {
        let (context, _pool, _recorder) = setup();
        let mesh = TestMesh::quad(7);
        mesh.set_indices(vec![0, 1, 9]);
        let mut pass = MeshPass::new(&context, SolidPass::default(), None);
        let stats = pass.update(&[mesh]).unwrap();
        assert_eq!(stats.failed, 1);
        assert!(!pass.cache().get(EntityId(7)).unwrap().is_complete());
        assert_eq!(context.buffers.count(), 4);
    }

    #[test]
    fn test_configure_rebuilds_everything() {
        let (context, _pool, _recorder) = setup();
        let mut pass = MeshPass::new(&context, NormalPass::new(0.1), None);
        let mesh = TestMesh::quad(1);
        pass.update(&[mesh.clone()]).unwrap();
        pass.configure(|kind| kind.length = 0.5);
        let stats = pass.update(&[mesh]).unwrap();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.geometry_rebuilds, 1);
    }
}
