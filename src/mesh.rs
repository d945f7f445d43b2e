use glam::{Vec3, Vec4};

use crate::reconcile::SourceEntity;

/// Borrowed vertex and index arrays of a mesh at one consistent generation.
///
/// `normals`, `tangents` and `colors` are either empty or one per position.
/// `indices` is a triangle list.
#[derive(Debug, Clone, Copy)]
pub struct MeshView<'a> {
    pub positions: &'a [Vec3],
    pub normals: &'a [Vec3],
    pub tangents: &'a [Vec4],
    pub colors: &'a [Vec4],
    pub indices: &'a [u32],
}

impl MeshView<'_> {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]])
    }

    /// Vertex color, white when the mesh carries none.
    pub fn color(&self, vertex: usize) -> Vec4 {
        self.colors.get(vertex).copied().unwrap_or(Vec4::ONE)
    }

    pub fn normal(&self, vertex: usize) -> Vec3 {
        self.normals.get(vertex).copied().unwrap_or(Vec3::ZERO)
    }

    /// Tangent with the bitangent sign in `w`.
    pub fn tangent(&self, vertex: usize) -> Vec4 {
        self.tangents.get(vertex).copied().unwrap_or(Vec4::ZERO)
    }

    /// True when every index points at an existing vertex.
    pub fn indices_in_bounds(&self) -> bool {
        let count = self.positions.len() as u64;
        self.indices.iter().all(|&i| u64::from(i) < count)
    }
}

/// A [`SourceEntity`] carrying triangle mesh data.
pub trait MeshSource: SourceEntity {
    /// Run `f` with the mesh arrays. The arrays match the generations the entity reports
    /// for as long as `f` runs.
    fn read<R>(&self, f: impl FnOnce(&MeshView<'_>) -> R) -> R;
}
