use std::{ops::Deref, sync::Arc};

use crate::{
    Result,
    backend::{Backend, BufferUsage, TriangleGeometry},
    context::{FrameClock, ResourceContext},
    registry::{Handle, Registry},
};

/// A backend together with the registries of its object kinds.
///
/// Cheap to clone. Every object created through it is tracked and retired through
/// the shared [`ResourceContext`].
pub struct GpuContext<B: Backend>(Arc<GpuContextInner<B>>);

impl<B: Backend> Clone for GpuContext<B> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

pub struct GpuContextInner<B: Backend> {
    backend: B,
    resources: ResourceContext,
    pub fences: Registry<B::Fence>,
    pub semaphores: Registry<B::Semaphore>,
    pub recorders: Registry<B::Recorder>,
    pub buffers: Registry<B::Buffer>,
    pub bindings: Registry<B::Binding>,
    pub accel_structs: Registry<B::AccelStruct>,
    pub pipelines: Registry<B::Pipeline>,
}

impl<B: Backend> Deref for GpuContext<B> {
    type Target = GpuContextInner<B>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<B: Backend> GpuContext<B> {
    pub fn new(backend: B, resources: ResourceContext) -> Self {
        let device = backend.device().clone();
        // Registration order doubles as dependency order: bindings reference buffers
        // and are reaped first.
        Self(Arc::new(GpuContextInner {
            fences: resources.registry(device.clone()),
            semaphores: resources.registry(device.clone()),
            recorders: resources.registry(device.clone()),
            buffers: resources.registry(device.clone()),
            bindings: resources.registry(device.clone()),
            accel_structs: resources.registry(device.clone()),
            pipelines: resources.registry(device),
            backend,
            resources,
        }))
    }

    pub fn backend(&self) -> &B {
        &self.0.backend
    }

    pub fn resources(&self) -> &ResourceContext {
        &self.0.resources
    }

    pub fn clock(&self) -> &FrameClock {
        self.0.resources.clock()
    }

    pub fn create_buffer(&self, usage: BufferUsage, size: u64) -> Result<Handle<B::Buffer>> {
        let buffer = self.backend.create_buffer(usage, size.max(4))?;
        Ok(self.buffers.create(buffer))
    }

    /// Create a buffer holding `data`.
    pub fn upload_buffer(&self, usage: BufferUsage, data: &[u8]) -> Result<Handle<B::Buffer>> {
        let buffer = self.backend.create_buffer(usage, (data.len() as u64).max(4))?;
        // Registered before the write so a failed write still retires it.
        let buffer = self.buffers.create(buffer);
        self.backend.write_buffer(&buffer, 0, data)?;
        Ok(buffer)
    }

    pub fn create_binding(&self, constants: &Handle<B::Buffer>) -> Result<Handle<B::Binding>> {
        let binding = self.backend.create_binding(constants)?;
        Ok(self.bindings.create(binding))
    }

    /// Start tracking a pipeline built by the caller.
    pub fn add_pipeline(&self, pipeline: B::Pipeline) -> Handle<B::Pipeline> {
        self.pipelines.create(pipeline)
    }

    pub fn build_accel_struct(
        &self,
        geometry: &TriangleGeometry<'_, B>,
    ) -> Result<Handle<B::AccelStruct>> {
        let accel = self.backend.build_accel_struct(geometry)?;
        Ok(self.accel_structs.create(accel))
    }

    pub fn create_fence(&self, signaled: bool) -> Result<Handle<B::Fence>> {
        let fence = self.backend.create_fence(signaled)?;
        Ok(self.fences.create(fence))
    }

    pub fn create_semaphore(&self) -> Result<Handle<B::Semaphore>> {
        let semaphore = self.backend.create_semaphore()?;
        Ok(self.semaphores.create(semaphore))
    }

    pub fn create_recorder(&self) -> Result<Handle<B::Recorder>> {
        let recorder = self.backend.create_recorder()?;
        Ok(self.recorders.create(recorder))
    }
}
