use glam::{Vec3, Vec4};

use super::{DrawGeometry, PassKind, upload};
use crate::{
    Result,
    backend::{Backend, BufferUsage, TriangleGeometry},
    gpu::GpuContext,
    mesh::MeshView,
    registry::Handle,
};

/// Bottom-level acceleration structures for the ray traced view, with one color per
/// triangle for hit shading. Never rasterized.
#[derive(Debug, Clone, Default)]
pub struct AccelStructPass;

pub struct AccelArtifact<B: Backend> {
    pub positions: Option<Handle<B::Buffer>>,
    pub indices: Option<Handle<B::Buffer>>,
    pub accel: Option<Handle<B::AccelStruct>>,
    pub triangle_count: u32,
    pub primitive_colors: Option<Handle<B::Buffer>>,
}

impl<B: Backend> Default for AccelArtifact<B> {
    fn default() -> Self {
        Self {
            positions: None,
            indices: None,
            accel: None,
            triangle_count: 0,
            primitive_colors: None,
        }
    }
}

impl<B: Backend> PassKind<B> for AccelStructPass {
    const LABEL: &'static str = "accel";
    type Artifact = AccelArtifact<B>;

    fn build_geometry(
        &mut self,
        context: &GpuContext<B>,
        mesh: &MeshView<'_>,
        artifact: &mut AccelArtifact<B>,
    ) -> Result<()> {
        let triangle_count = mesh.triangle_count();
        if triangle_count == 0 {
            *artifact = AccelArtifact::default();
            return Ok(());
        }
        let positions: &[Vec3] = mesh.positions;
        let positions = upload(context, BufferUsage::AccelInput, positions)?;
        let indices = upload(
            context,
            BufferUsage::AccelInput,
            &mesh.indices[..triangle_count * 3],
        )?;
        let accel = context.build_accel_struct(&TriangleGeometry {
            positions: &positions,
            vertex_count: mesh.vertex_count() as u32,
            indices: &indices,
            triangle_count: triangle_count as u32,
        })?;
        artifact.positions = Some(positions);
        artifact.indices = Some(indices);
        artifact.accel = Some(accel);
        artifact.triangle_count = triangle_count as u32;
        Ok(())
    }

    fn build_color(
        &mut self,
        context: &GpuContext<B>,
        mesh: &MeshView<'_>,
        artifact: &mut AccelArtifact<B>,
    ) -> Result<()> {
        if artifact.accel.is_none() {
            artifact.primitive_colors = None;
            return Ok(());
        }
        let colors: Vec<Vec4> = mesh
            .triangles()
            .map(|[a, b, c]| {
                (mesh.color(a as usize) + mesh.color(b as usize) + mesh.color(c as usize)) / 3.0
            })
            .collect();
        artifact.primitive_colors = Some(upload(context, BufferUsage::AccelInput, &colors)?);
        Ok(())
    }

    fn draw_geometry<'a>(&self, _artifact: &'a AccelArtifact<B>) -> Option<DrawGeometry<'a, B>> {
        None
    }
}

impl<B: Backend> AccelArtifact<B> {
    /// The structure and its per-triangle colors, once both are built.
    pub fn instance(&self) -> Option<(&Handle<B::AccelStruct>, &Handle<B::Buffer>)> {
        Some((self.accel.as_ref()?, self.primitive_colors.as_ref()?))
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
    fn test_builds_structure_and_primitive_colors() {
        let context = GpuContext::new(MockBackend::new(), ResourceContext::new());
        let mut kind = AccelStructPass;
        let mut artifact = AccelArtifact::<MockBackend>::default();
        TestMesh::quad(1)
            .read(|view| {
                PassKind::<MockBackend>::build_geometry(&mut kind, &context, view, &mut artifact)?;
                PassKind::<MockBackend>::build_color(&mut kind, &context, view, &mut artifact)
            })
            .unwrap();
        let (accel, colors) = artifact.instance().unwrap();
        assert_eq!(accel.triangles, 2);
        assert_eq!(colors.data.lock().unwrap().len(), 2 * std::mem::size_of::<Vec4>());
        assert!(PassKind::<MockBackend>::draw_geometry(&kind, &artifact).is_none());
        assert_eq!(context.accel_structs.count(), 1);
    }
}
