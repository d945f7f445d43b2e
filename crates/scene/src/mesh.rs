use std::sync::{
    RwLock,
    atomic::{AtomicU64, Ordering},
};

use glam::{Vec3, Vec4};
use scoria::{EntityId, Generation, MeshSource, MeshView, SourceEntity};

use crate::ImportError;

static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(1);

/// Owned vertex and index arrays of a triangle mesh.
///
/// `normals`, `tangents` and `colors` are either empty or hold one entry per position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Vec<Vec4>,
    pub colors: Vec<Vec4>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Builds a mesh with smooth normals and tangent frames from a triangle list.
    pub fn from_triangles(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        let mut data = Self {
            positions,
            indices,
            ..Default::default()
        };
        data.recompute_normals();
        data.recompute_tangents();
        data
    }

    /// An axis aligned cube of edge length `size` centered at the origin, with a hard
    /// normal per face.
    pub fn cube(size: f32) -> Self {
        let h = size * 0.5;
        let faces = [
            (Vec3::X, Vec3::Y),
            (Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::Z),
            (Vec3::NEG_Y, Vec3::Z),
            (Vec3::Z, Vec3::X),
            (Vec3::NEG_Z, Vec3::X),
        ];
        let mut positions = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, up) in faces {
            let right = up.cross(normal);
            let base = positions.len() as u32;
            for (u, v) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                positions.push((normal + right * u + up * v) * h);
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::from_triangles(positions, indices)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn view(&self) -> MeshView<'_> {
        MeshView {
            positions: &self.positions,
            normals: &self.normals,
            tangents: &self.tangents,
            colors: &self.colors,
            indices: &self.indices,
        }
    }

    /// Checks the array length rules and that every index points at a vertex.
    pub fn validate(&self) -> Result<(), ImportError> {
        if self.positions.is_empty() || self.indices.is_empty() {
            return Err(ImportError::Empty);
        }
        if self.indices.len() % 3 != 0 {
            return Err(ImportError::Malformed(format!(
                "{} indices do not form a triangle list",
                self.indices.len()
            )));
        }
        let count = self.positions.len();
        let per_vertex = [
            ("normals", self.normals.len()),
            ("tangents", self.tangents.len()),
            ("colors", self.colors.len()),
        ];
        for (name, len) in per_vertex {
            if len != 0 && len != count {
                return Err(ImportError::Malformed(format!(
                    "{len} {name} for {count} positions"
                )));
            }
        }
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(ImportError::Malformed(format!(
                "index {index} out of range for {count} positions"
            )));
        }
        Ok(())
    }

    /// Smooth per-vertex normals, each face weighted by its area.
    ///
    /// Triangles referencing missing vertices are ignored. Vertices no triangle touches
    /// get a zero normal.
    pub fn recompute_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let (Some(&pa), Some(&pb), Some(&pc)) =
                (self.positions.get(a), self.positions.get(b), self.positions.get(c))
            else {
                continue;
            };
            // Unnormalized, so its length is twice the triangle area.
            let face = (pb - pa).cross(pc - pa);
            normals[a] += face;
            normals[b] += face;
            normals[c] += face;
        }
        for normal in &mut normals {
            *normal = normal.normalize_or_zero();
        }
        self.normals = normals;
    }

    /// A unit tangent orthogonal to each vertex normal, with `w = 1`.
    ///
    /// Normals are recomputed first when missing.
    pub fn recompute_tangents(&mut self) {
        if self.normals.len() != self.positions.len() {
            self.recompute_normals();
        }
        self.tangents = self
            .normals
            .iter()
            .map(|&normal| {
                if normal == Vec3::ZERO {
                    return Vec4::new(1.0, 0.0, 0.0, 1.0);
                }
                let reference = if normal.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
                let tangent = (reference - normal * normal.dot(reference)).normalize();
                tangent.extend(1.0)
            })
            .collect();
    }
}

/// A shared, editable triangle mesh.
///
/// Every write advances the matching generation while the write lock is still held, so
/// a reader that observes a generation also observes the data it describes.
#[derive(Debug)]
pub struct Mesh {
    id: EntityId,
    geometry: AtomicU64,
    color: AtomicU64,
    data: RwLock<MeshData>,
}

impl Mesh {
    pub fn new(data: MeshData) -> Self {
        Self {
            id: EntityId(NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed)),
            geometry: AtomicU64::new(Generation::FIRST.get()),
            color: AtomicU64::new(Generation::FIRST.get()),
            data: RwLock::new(data),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Replaces positions and indices and recomputes normals and tangents.
    ///
    /// Colors are kept when the vertex count is unchanged and cleared otherwise.
    pub fn set_geometry(&self, positions: Vec<Vec3>, indices: Vec<u32>) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let colors_invalid = data.positions.len() != positions.len() && !data.colors.is_empty();
        data.positions = positions;
        data.indices = indices;
        data.recompute_normals();
        data.recompute_tangents();
        if colors_invalid {
            data.colors.clear();
        }
        self.geometry.fetch_add(1, Ordering::Release);
        if colors_invalid {
            self.color.fetch_add(1, Ordering::Release);
        }
    }

    /// Replaces vertex colors. Missing entries are white and extra entries are dropped.
    pub fn set_colors(&self, mut colors: Vec<Vec4>) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        colors.resize(data.positions.len(), Vec4::ONE);
        data.colors = colors;
        self.color.fetch_add(1, Ordering::Release);
    }

    /// Arbitrary in-place edit. Both generations advance afterwards.
    pub fn edit<R>(&self, f: impl FnOnce(&mut MeshData) -> R) -> R {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let result = f(&mut data);
        self.geometry.fetch_add(1, Ordering::Release);
        self.color.fetch_add(1, Ordering::Release);
        result
    }

    /// A copy of the current data.
    pub fn snapshot(&self) -> MeshData {
        self.data.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl From<MeshData> for Mesh {
    fn from(data: MeshData) -> Self {
        Self::new(data)
    }
}

fn load_generation(counter: &AtomicU64) -> Generation {
    Generation::new(counter.load(Ordering::Acquire)).unwrap_or(Generation::FIRST)
}

impl SourceEntity for Mesh {
    fn identity(&self) -> EntityId {
        self.id
    }

    fn geometry_generation(&self) -> Generation {
        load_generation(&self.geometry)
    }

    fn color_generation(&self) -> Generation {
        load_generation(&self.color)
    }
}

impl MeshSource for Mesh {
    fn read<R>(&self, f: impl FnOnce(&MeshView<'_>) -> R) -> R {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        f(&data.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> MeshData {
        MeshData::from_triangles(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1, 2])
    }

    #[test]
    fn test_identities_are_unique() {
        let a = Mesh::new(triangle());
        let b = Mesh::new(triangle());
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_generations_start_at_one() {
        let mesh = Mesh::new(triangle());
        assert_eq!(mesh.geometry_generation(), Generation::FIRST);
        assert_eq!(mesh.color_generation(), Generation::FIRST);
    }

    #[test]
    fn test_set_geometry_only_advances_geometry() {
        let mesh = Mesh::new(triangle());
        mesh.set_geometry(vec![Vec3::ZERO, Vec3::Y, Vec3::Z], vec![0, 1, 2]);
        assert_eq!(mesh.geometry_generation().get(), 2);
        assert_eq!(mesh.color_generation().get(), 1);
        mesh.read(|view| {
            assert_eq!(view.positions[2], Vec3::Z);
            assert!((view.normals[0] - Vec3::X).length() < 1e-6);
        });
    }

    #[test]
    fn test_changing_vertex_count_drops_colors() {
        let mesh = Mesh::new(triangle());
        mesh.set_colors(vec![Vec4::new(1.0, 0.0, 0.0, 1.0)]);
        assert_eq!(mesh.color_generation().get(), 2);
        assert_eq!(mesh.snapshot().colors.len(), 3);

        mesh.set_geometry(vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z], vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.color_generation().get(), 3);
        assert!(mesh.snapshot().colors.is_empty());
    }

    #[test]
    fn test_edit_advances_both() {
        let mesh = Mesh::new(triangle());
        let count = mesh.edit(|data| {
            data.positions[0] = Vec3::NEG_Z;
            data.vertex_count()
        });
        assert_eq!(count, 3);
        assert_eq!(mesh.geometry_generation().get(), 2);
        assert_eq!(mesh.color_generation().get(), 2);
    }

    #[test]
    fn test_normals_are_area_weighted() {
        // A large triangle facing +Z and a small one facing +X share vertex 0.
        let mut data = MeshData {
            positions: vec![
                Vec3::ZERO,
                Vec3::new(10.0, 0.0, 0.0),
                Vec3::new(0.0, 10.0, 0.0),
                Vec3::new(0.0, 0.1, 0.0),
                Vec3::new(0.0, 0.0, 0.1),
            ],
            indices: vec![0, 1, 2, 0, 3, 4],
            ..Default::default()
        };
        data.recompute_normals();
        let shared = data.normals[0];
        assert!(shared.z > 0.99);
        assert!(shared.x > 0.0);
        assert!((shared.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_tangents_are_orthogonal() {
        let data = MeshData::cube(2.0);
        assert!(data.validate().is_ok());
        assert_eq!(data.tangents.len(), data.vertex_count());
        for (normal, tangent) in data.normals.iter().zip(&data.tangents) {
            assert!(normal.dot(tangent.truncate()).abs() < 1e-5);
            assert!((tangent.truncate().length() - 1.0).abs() < 1e-5);
            assert_eq!(tangent.w, 1.0);
        }
    }

    #[test]
    fn test_cube_faces_point_outwards() {
        let data = MeshData::cube(1.0);
        assert_eq!(data.vertex_count(), 24);
        assert_eq!(data.triangle_count(), 12);
        for (position, normal) in data.positions.iter().zip(&data.normals) {
            assert!(position.dot(*normal) > 0.0);
        }
    }

    #[test]
    fn test_validate_rejects_bad_data() {
        assert!(matches!(MeshData::default().validate(), Err(ImportError::Empty)));

        let mut data = triangle();
        data.indices = vec![0, 1, 7];
        assert!(matches!(data.validate(), Err(ImportError::Malformed(_))));

        let mut data = triangle();
        data.colors = vec![Vec4::ONE];
        assert!(matches!(data.validate(), Err(ImportError::Malformed(_))));
    }
}
