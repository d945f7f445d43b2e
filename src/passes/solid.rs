use bytemuck::{Pod, Zeroable};
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

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SolidVertex {
    pub position: Vec3,
    pub normal: Vec3,
}

/// Shaded triangle meshes.
#[derive(Debug, Clone, Default)]
pub struct SolidPass {
    pub tint: Option<Vec4>,
}

pub struct SolidArtifact<B: Backend> {
    pub vertices: Option<Handle<B::Buffer>>,
    pub indices: Option<Handle<B::Buffer>>,
    pub index_count: u32,
    pub colors: Option<Handle<B::Buffer>>,
}

impl<B: Backend> Default for SolidArtifact<B> {
    fn default() -> Self {
        Self {
            vertices: None,
            indices: None,
            index_count: 0,
            colors: None,
        }
    }
}

impl<B: Backend> PassKind<B> for SolidPass {
    const LABEL: &'static str = "solid";
    type Artifact = SolidArtifact<B>;

    fn build_geometry(
        &mut self,
        context: &GpuContext<B>,
        mesh: &MeshView<'_>,
        artifact: &mut SolidArtifact<B>,
    ) -> Result<()> {
        if mesh.triangle_count() == 0 {
            *artifact = SolidArtifact::default();
            return Ok(());
        }
        let vertices: Vec<SolidVertex> = mesh
            .positions
            .iter()
            .enumerate()
            .map(|(i, &position)| SolidVertex {
                position,
                normal: mesh.normal(i),
            })
            .collect();
        let index_count = (mesh.triangle_count() * 3) as u32;
        let vertices = upload(context, BufferUsage::Vertex, &vertices)?;
        let indices = upload(
            context,
            BufferUsage::Index,
            &mesh.indices[..index_count as usize],
        )?;
        artifact.vertices = Some(vertices);
        artifact.indices = Some(indices);
        artifact.index_count = index_count;
        Ok(())
    }

    fn build_color(
        &mut self,
        context: &GpuContext<B>,
        mesh: &MeshView<'_>,
        artifact: &mut SolidArtifact<B>,
    ) -> Result<()> {
        if artifact.vertices.is_none() {
            artifact.colors = None;
            return Ok(());
        }
        let colors: Vec<Vec4> = (0..mesh.vertex_count()).map(|i| mesh.color(i)).collect();
        artifact.colors = Some(upload(context, BufferUsage::Vertex, &colors)?);
        Ok(())
    }

    fn draw_geometry<'a>(&self, artifact: &'a SolidArtifact<B>) -> Option<DrawGeometry<'a, B>> {
        let (Some(vertices), Some(indices), Some(colors)) =
            (&artifact.vertices, &artifact.indices, &artifact.colors)
        else {
            return None;
        };
        Some(DrawGeometry {
            vertex_buffers: smallvec![&**vertices, &**colors],
            index_buffer: Some(&**indices),
            count: artifact.index_count,
            tint: self.tint.unwrap_or(Vec4::ONE),
        })
    }
}
