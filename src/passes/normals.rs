use glam::{Vec3, Vec4};
use smallvec::smallvec;

use super::{DrawGeometry, PassKind, upload};
use crate::{
    Result,
    backend::{Backend, BufferUsage},
    gpu::GpuContext,
    mesh::MeshView,
    registry::Handle,
};

/// One line segment per vertex along its normal.
#[derive(Debug, Clone)]
pub struct NormalPass {
    pub length: f32,
}

impl NormalPass {
    pub fn new(length: f32) -> Self {
        Self { length }
    }
}

pub struct NormalArtifact<B: Backend> {
    /// Two points per vertex: root then tip.
    pub segments: Option<Handle<B::Buffer>>,
    pub point_count: u32,
    pub colors: Option<Handle<B::Buffer>>,
}

impl<B: Backend> Default for NormalArtifact<B> {
    fn default() -> Self {
        Self {
            segments: None,
            point_count: 0,
            colors: None,
        }
    }
}

impl<B: Backend> PassKind<B> for NormalPass {
    const LABEL: &'static str = "normals";
    type Artifact = NormalArtifact<B>;

    fn build_geometry(
        &mut self,
        context: &GpuContext<B>,
        mesh: &MeshView<'_>,
        artifact: &mut NormalArtifact<B>,
    ) -> Result<()> {
        if mesh.normals.len() != mesh.vertex_count() || mesh.vertex_count() == 0 {
            *artifact = NormalArtifact::default();
            return Ok(());
        }
        let points: Vec<Vec3> = mesh
            .positions
            .iter()
            .zip(mesh.normals)
            .flat_map(|(&p, &n)| [p, p + n.normalize_or_zero() * self.length])
            .collect();
        artifact.segments = Some(upload(context, BufferUsage::Vertex, &points)?);
        artifact.point_count = points.len() as u32;
        Ok(())
    }

    fn build_color(
        &mut self,
        context: &GpuContext<B>,
        mesh: &MeshView<'_>,
        artifact: &mut NormalArtifact<B>,
    ) -> Result<()> {
        if artifact.segments.is_none() {
            artifact.colors = None;
            return Ok(());
        }
        // Tips fade towards white so the direction reads at a glance.
        let colors: Vec<Vec4> = (0..mesh.vertex_count())
            .flat_map(|i| {
                let base = mesh.color(i);
                [base, base.lerp(Vec4::ONE, 0.5)]
            })
            .collect();
        artifact.colors = Some(upload(context, BufferUsage::Vertex, &colors)?);
        Ok(())
    }

    fn draw_geometry<'a>(&self, artifact: &'a NormalArtifact<B>) -> Option<DrawGeometry<'a, B>> {
        let (Some(segments), Some(colors)) = (&artifact.segments, &artifact.colors) else {
            return None;
        };
        Some(DrawGeometry {
            vertex_buffers: smallvec![&**segments, &**colors],
            index_buffer: None,
            count: artifact.point_count,
            tint: Vec4::ONE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ResourceContext,
        mesh::MeshSource,
        testing::{MockBackend, TestMesh},
    };

    #[test]
    fn test_segment_per_vertex() {
        let context = GpuContext::new(MockBackend::new(), ResourceContext::new());
        let mut kind = NormalPass::new(0.5);
        let mut artifact = NormalArtifact::<MockBackend>::default();
        TestMesh::quad(1)
            .read(|view| {
                PassKind::<MockBackend>::build_geometry(&mut kind, &context, view, &mut artifact)?;
                PassKind::<MockBackend>::build_color(&mut kind, &context, view, &mut artifact)
            })
            .unwrap();
        assert_eq!(artifact.point_count, 8);

        let bytes = artifact.segments.as_ref().unwrap().data.lock().unwrap().clone();
        let tip: Vec3 = bytemuck::pod_read_unaligned(&bytes[12..24]);
        assert_eq!(tip, Vec3::new(0.0, 0.0, 0.5));
        let geometry = PassKind::<MockBackend>::draw_geometry(&kind, &artifact).unwrap();
        assert!(geometry.index_buffer.is_none());
        assert_eq!(geometry.count, 8);
    }
}
