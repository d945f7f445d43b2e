use glam::{Vec3, Vec4, Vec4Swizzles};
use smallvec::smallvec;

use super::{DrawGeometry, PassKind, upload};
use crate::{
    Result,
    backend::{Backend, BufferUsage},
    gpu::GpuContext,
    mesh::MeshView,
    registry::Handle,
};

const TANGENT_COLOR: Vec4 = Vec4::new(1.0, 0.2, 0.2, 1.0);
const BITANGENT_COLOR: Vec4 = Vec4::new(0.2, 1.0, 0.2, 1.0);
const NORMAL_COLOR: Vec4 = Vec4::new(0.2, 0.2, 1.0, 1.0);

/// Three segments per vertex: tangent, bitangent and normal.
#[derive(Debug, Clone)]
pub struct TangentPass {
    pub length: f32,
}

impl TangentPass {
    pub fn new(length: f32) -> Self {
        Self { length }
    }
}

pub struct TangentArtifact<B: Backend> {
    pub segments: Option<Handle<B::Buffer>>,
    pub point_count: u32,
    pub colors: Option<Handle<B::Buffer>>,
}

impl<B: Backend> Default for TangentArtifact<B> {
    fn default() -> Self {
        Self {
            segments: None,
            point_count: 0,
            colors: None,
        }
    }
}

/// Tangent, bitangent and normal directions of one vertex.
pub(crate) fn tangent_frame(normal: Vec3, tangent: Vec4) -> [Vec3; 3] {
    let n = normal.normalize_or_zero();
    let t = tangent.xyz().normalize_or_zero();
    let sign = if tangent.w < 0.0 { -1.0 } else { 1.0 };
    [t, n.cross(t) * sign, n]
}

impl<B: Backend> PassKind<B> for TangentPass {
    const LABEL: &'static str = "tangents";
    type Artifact = TangentArtifact<B>;

    fn build_geometry(
        &mut self,
        context: &GpuContext<B>,
        mesh: &MeshView<'_>,
        artifact: &mut TangentArtifact<B>,
    ) -> Result<()> {
        let count = mesh.vertex_count();
        if count == 0 || mesh.normals.len() != count || mesh.tangents.len() != count {
            *artifact = TangentArtifact::default();
            return Ok(());
        }
        let length = self.length;
        let points: Vec<Vec3> = (0..count)
            .flat_map(|i| {
                let p = mesh.positions[i];
                let frame = tangent_frame(mesh.normal(i), mesh.tangent(i));
                frame
                    .into_iter()
                    .flat_map(move |axis| [p, p + axis * length])
            })
            .collect();
        artifact.segments = Some(upload(context, BufferUsage::Vertex, &points)?);
        artifact.point_count = points.len() as u32;
        Ok(())
    }

    fn build_color(
        &mut self,
        context: &GpuContext<B>,
        mesh: &MeshView<'_>,
        artifact: &mut TangentArtifact<B>,
    ) -> Result<()> {
        if artifact.segments.is_none() {
            artifact.colors = None;
            return Ok(());
        }
        let colors: Vec<Vec4> = (0..mesh.vertex_count())
            .flat_map(|i| {
                let alpha = mesh.color(i).w;
                [TANGENT_COLOR, BITANGENT_COLOR, NORMAL_COLOR]
                    .into_iter()
                    .flat_map(move |axis| {
                        let color = axis.with_w(alpha);
                        [color, color]
                    })
            })
            .collect();
        artifact.colors = Some(upload(context, BufferUsage::Vertex, &colors)?);
        Ok(())
    }

    fn draw_geometry<'a>(&self, artifact: &'a TangentArtifact<B>) -> Option<DrawGeometry<'a, B>> {
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
    fn test_frame_is_right_handed() {
        let [t, b, n] = tangent_frame(Vec3::Z, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(t, Vec3::X);
        assert_eq!(b, Vec3::Y);
        assert_eq!(n, Vec3::Z);
        let [_, flipped, _] = tangent_frame(Vec3::Z, Vec4::new(1.0, 0.0, 0.0, -1.0));
        assert_eq!(flipped, -Vec3::Y);
    }

    #[test]
    fn test_three_segments_per_vertex() {
        let context = GpuContext::new(MockBackend::new(), ResourceContext::new());
        let mut kind = TangentPass::new(0.1);
        let mut artifact = TangentArtifact::<MockBackend>::default();
        TestMesh::quad(1)
            .read(|view| {
                PassKind::<MockBackend>::build_geometry(&mut kind, &context, view, &mut artifact)?;
                PassKind::<MockBackend>::build_color(&mut kind, &context, view, &mut artifact)
            })
            .unwrap();
        assert_eq!(artifact.point_count, 24);
        let colors = artifact.colors.as_ref().unwrap().data.lock().unwrap().len();
        assert_eq!(colors, 24 * std::mem::size_of::<Vec4>());
    }
}
