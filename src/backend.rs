//! The device abstraction the frame pipeline and draw subsystems are written against.
//!
//! A backend names its object kinds as associated types, each a [`GpuObject`] so that
//! registries can retire them, and exposes the handful of device operations the core
//! needs. [`crate::vulkan::VulkanBackend`] is the production implementation.
use std::time::Duration;

use crate::{Result, registry::GpuObject};

/// What a buffer will be bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    /// Small per-draw constant block, rewritten every draw.
    Constants,
    /// Geometry read by acceleration structure builds.
    AccelInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }
}

/// A swapchain image owned by the current frame between acquire and present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The swapchain still works but no longer matches the surface exactly.
    pub suboptimal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
}

/// One indexed or non-indexed draw.
pub struct DrawCall<'a, B: Backend> {
    pub pipeline: &'a B::Pipeline,
    /// Binding of the per-draw constant buffer.
    pub binding: &'a B::Binding,
    pub viewport: Viewport,
    pub vertex_buffers: &'a [&'a B::Buffer],
    pub index_buffer: Option<&'a B::Buffer>,
    /// Index count for indexed draws, vertex count otherwise.
    pub count: u32,
}

/// Input of a bottom-level acceleration structure build. Positions are tightly packed
/// `[f32; 3]`, indices are `u32` triangle lists.
pub struct TriangleGeometry<'a, B: Backend> {
    pub positions: &'a B::Buffer,
    pub vertex_count: u32,
    pub indices: &'a B::Buffer,
    pub triangle_count: u32,
}

pub trait Backend: Sized + Send + Sync + 'static {
    /// Passed to every object's destroyer.
    type Device: Clone + Send + Sync + 'static;
    type Buffer: GpuObject<Owner = Self::Device>;
    /// A descriptor binding of one constant buffer.
    type Binding: GpuObject<Owner = Self::Device>;
    type Pipeline: GpuObject<Owner = Self::Device>;
    type AccelStruct: GpuObject<Owner = Self::Device>;
    type Fence: GpuObject<Owner = Self::Device>;
    type Semaphore: GpuObject<Owner = Self::Device>;
    type Recorder: GpuObject<Owner = Self::Device>;

    fn device(&self) -> &Self::Device;

    /// Create a host-writable buffer of `size` bytes.
    fn create_buffer(&self, usage: BufferUsage, size: u64) -> Result<Self::Buffer>;
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;
    fn create_binding(&self, constants: &Self::Buffer) -> Result<Self::Binding>;
    /// Builds the structure and waits for the build to finish.
    fn build_accel_struct(&self, geometry: &TriangleGeometry<'_, Self>)
    -> Result<Self::AccelStruct>;
    fn create_fence(&self, signaled: bool) -> Result<Self::Fence>;
    fn create_semaphore(&self) -> Result<Self::Semaphore>;
    fn create_recorder(&self) -> Result<Self::Recorder>;

    /// Block until `fence` signals. `None` waits forever; a bounded wait that expires
    /// returns [`Error::DeviceTimeout`](crate::Error::DeviceTimeout).
    fn wait_for_fence(&self, fence: &Self::Fence, timeout: Option<Duration>) -> Result<()>;
    fn reset_fence(&self, fence: &Self::Fence) -> Result<()>;
    fn wait_idle(&self) -> Result<()>;

    /// Reset the recorder and open it for a new frame.
    fn begin_recording(&self, recorder: &Self::Recorder) -> Result<()>;
    fn begin_pass(&self, recorder: &Self::Recorder, image: AcquiredImage, clear_color: [f32; 4]);
    fn record_draw(&self, recorder: &Self::Recorder, draw: &DrawCall<'_, Self>);
    fn end_pass(&self, recorder: &Self::Recorder);
    /// Close the recorder and submit it. `fence` must be unsignaled.
    ///
    /// `signal` is only given when the frame will be presented, so a binary semaphore
    /// is never signaled twice without a present consuming it.
    fn submit(
        &self,
        recorder: &Self::Recorder,
        wait: Option<&Self::Semaphore>,
        signal: Option<&Self::Semaphore>,
        fence: &Self::Fence,
    ) -> Result<()>;

    /// Returns [`Error::SwapchainOutOfDate`](crate::Error::SwapchainOutOfDate) when the
    /// swapchain must be recreated first.
    fn acquire_image(
        &self,
        signal: &Self::Semaphore,
        timeout: Option<Duration>,
    ) -> Result<AcquiredImage>;
    fn present(&self, image: AcquiredImage, wait: &Self::Semaphore) -> Result<PresentStatus>;
    /// Rebuild the swapchain and everything sized after it. The device must be idle.
    fn recreate_swapchain(&self) -> Result<()>;

    /// Drop every handle the backend holds on its own behalf, ahead of the final
    /// registry check at shutdown. The device must be idle.
    fn release(&self) {}
}
