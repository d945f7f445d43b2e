use std::collections::HashSet;

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

/// Triangle edges drawn as a line list, each edge once.
#[derive(Debug, Clone)]
pub struct WireframePass {
    /// Multiplied with the vertex colors.
    pub line_color: Vec4,
}

impl Default for WireframePass {
    fn default() -> Self {
        Self {
            line_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}

pub struct WireframeArtifact<B: Backend> {
    pub positions: Option<Handle<B::Buffer>>,
    pub edges: Option<Handle<B::Buffer>>,
    pub edge_count: u32,
    pub colors: Option<Handle<B::Buffer>>,
}

impl<B: Backend> Default for WireframeArtifact<B> {
    fn default() -> Self {
        Self {
            positions: None,
            edges: None,
            edge_count: 0,
            colors: None,
        }
    }
}

/// Unique undirected edges of a triangle list, in first-seen order.
pub(crate) fn unique_edges(mesh: &MeshView<'_>) -> Vec<[u32; 2]> {
    let mut seen = HashSet::with_capacity(mesh.indices.len());
    let mut edges = Vec::with_capacity(mesh.indices.len());
    for [a, b, c] in mesh.triangles() {
        for (from, to) in [(a, b), (b, c), (c, a)] {
            let key = (from.min(to), from.max(to));
            if seen.insert(key) {
                edges.push([key.0, key.1]);
            }
        }
    }
    edges
}

impl<B: Backend> PassKind<B> for WireframePass {
    const LABEL: &'static str = "wireframe";
    type Artifact = WireframeArtifact<B>;

    fn build_geometry(
        &mut self,
        context: &GpuContext<B>,
        mesh: &MeshView<'_>,
        artifact: &mut WireframeArtifact<B>,
    ) -> Result<()> {
        let edges = unique_edges(mesh);
        if edges.is_empty() {
            *artifact = WireframeArtifact::default();
            return Ok(());
        }
        let positions: &[Vec3] = mesh.positions;
        let positions = upload(context, BufferUsage::Vertex, positions)?;
        let edge_buffer = upload(context, BufferUsage::Index, &edges)?;
        artifact.positions = Some(positions);
        artifact.edges = Some(edge_buffer);
        artifact.edge_count = edges.len() as u32;
        Ok(())
    }

    fn build_color(
        &mut self,
        context: &GpuContext<B>,
        mesh: &MeshView<'_>,
        artifact: &mut WireframeArtifact<B>,
    ) -> Result<()> {
        if artifact.positions.is_none() {
            artifact.colors = None;
            return Ok(());
        }
        let colors: Vec<Vec4> = (0..mesh.vertex_count())
            .map(|i| mesh.color(i) * self.line_color)
            .collect();
        artifact.colors = Some(upload(context, BufferUsage::Vertex, &colors)?);
        Ok(())
    }

    fn draw_geometry<'a>(&self, artifact: &'a WireframeArtifact<B>) -> Option<DrawGeometry<'a, B>> {
        let (Some(positions), Some(edges), Some(colors)) =
            (&artifact.positions, &artifact.edges, &artifact.colors)
        else {
            return None;
        };
        Some(DrawGeometry {
            vertex_buffers: smallvec![&**positions, &**colors],
            index_buffer: Some(&**edges),
            count: artifact.edge_count * 2,
            tint: Vec4::ONE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mesh::MeshSource, testing::TestMesh};

    #[test]
    fn test_shared_edges_appear_once() {
        let mesh = TestMesh::quad(1);
        let edges = mesh.read(|view| unique_edges(view));
        assert_eq!(edges, [[0, 1], [1, 2], [0, 2], [2, 3], [0, 3]]);
    }
}
