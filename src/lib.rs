//! # Scoria
//!
//! GPU resource lifetime and frame pipelining for a Vulkan mesh viewer.
//!
//! Scoria keeps a CPU-side scene of meshes in sync with the GPU data derived from it,
//! while several frames are in flight, without ever destroying an object the device
//! may still read.
//!
//! ## Overview
//!
//! ### Registries and handles
//!
//! Every device object is created through a [`Registry`] and referred to by a
//! [`Handle`]. Dropping the last handle orphans the object; it is destroyed by
//! housekeeping once the frame that was recording at the time has completed. All
//! registries hang off one [`ResourceContext`], which also owns the [`FrameClock`].
//!
//! ### Frame pipeline
//!
//! A [`FramePipeline`] rotates a fixed number of frame slots. Starting a frame waits
//! on the slot's fence, which is what moves the clock forward and lets housekeeping
//! reclaim orphans.
//!
//! ```
//! # use scoria::{FrameConfig, FramePipeline, GpuContext, ResourceContext};
//! # fn run<B: scoria::Backend>(backend: B) -> scoria::Result<()> {
//! let context = GpuContext::new(backend, ResourceContext::new());
//! let mut frames = FramePipeline::new(&context, &FrameConfig::default())?;
//!
//! let serial = frames.start_frame()?;
//! let image = frames.acquire_image()?;
//! // record into frames.current().recorder()
//! frames.submit()?;
//! frames.present_frame()?;
//! # Ok(()) }
//! ```
//!
//! ### Derived caches
//!
//! Each draw subsystem keeps a [`DerivedCache`] of artifacts keyed by entity
//! identity and rebuilds only what changed, as advertised by per-entity
//! [`Generation`]s. See [`passes`] for the subsystems and [`Viewer`] for the per-frame
//! driver tying everything together.
//!
//! ### Backends
//!
//! Everything above is written against the [`Backend`] trait. [`vulkan`] provides the
//! production implementation.

pub mod backend;
pub mod config;
pub mod context;
mod error;
pub mod frame;
pub mod gpu;
pub mod mesh;
pub mod passes;
pub mod reconcile;
pub mod registry;
pub mod rename;
pub mod viewer;
pub mod vulkan;

#[cfg(test)]
mod testing;

pub use backend::{AcquiredImage, Backend, BufferUsage, PresentStatus, Viewport};
pub use config::ViewerConfig;
pub use context::{FrameClock, RegistryStats, ResourceContext};
pub use error::{Error, Result};
pub use frame::{FrameConfig, FramePipeline, SlotState};
pub use gpu::GpuContext;
pub use mesh::{MeshSource, MeshView};
pub use reconcile::{DerivedCache, EntityId, Generation, ReconcileStats, SourceEntity};
pub use registry::{GpuObject, Handle, Registry};
pub use rename::RenamePool;
pub use viewer::{FrameOutcome, FrameStats, PassPipelines, ViewState, Viewer};

pub use ash;

pub mod prelude {
    pub use crate::{
        Backend, EntityId, Error, GpuContext, Generation, Handle, MeshSource, MeshView,
        ResourceContext, Result, SourceEntity, ViewState, Viewer, ViewerConfig, ash::vk,
        vulkan::{PresentationTarget, VulkanBackend, VulkanConfig},
    };
}
