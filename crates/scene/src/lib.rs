//! Mesh sources for the scoria viewer.
//!
//! [`Mesh`] is the shared, editable source entity the draw subsystems derive their GPU
//! data from. [`ImportQueue`] loads meshes off the main thread.

mod import;
mod mesh;

pub use import::{ImportError, ImportQueue, Imported, MeshLoader};
pub use mesh::{Mesh, MeshData};
