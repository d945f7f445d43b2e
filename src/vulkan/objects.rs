//! Device object kinds and the way each one is destroyed.
use ash::vk;
use vk_mem::Alloc;

use super::Device;
use crate::{Error, Result, backend::BufferUsage, registry::GpuObject};

/// A host-writable buffer, persistently mapped.
pub struct VulkanBuffer {
    pub(crate) buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    mapped: *mut u8,
    coherent: bool,
    address: vk::DeviceAddress,
}

// The mapping is only written through `write`, which callers serialize per buffer.
unsafe impl Send for VulkanBuffer {}
unsafe impl Sync for VulkanBuffer {}

impl VulkanBuffer {
    pub(crate) fn new(device: &Device, usage: BufferUsage, size: vk::DeviceSize) -> Result<Self> {
        let address_capable = device.supports_ray_tracing();
        let usage = match usage {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Constants => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::AccelInput if address_capable => {
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | vk::BufferUsageFlags::STORAGE_BUFFER
            }
            BufferUsage::AccelInput => vk::BufferUsageFlags::STORAGE_BUFFER,
        };
        Self::allocate(
            device,
            usage,
            size,
            1,
            vk_mem::AllocationCreateFlags::MAPPED
                | vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
        )
    }

    /// A device-only buffer addressed by acceleration structure builds.
    pub(crate) fn new_private(
        device: &Device,
        usage: vk::BufferUsageFlags,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
    ) -> Result<Self> {
        Self::allocate(
            device,
            usage | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            size,
            alignment,
            vk_mem::AllocationCreateFlags::empty(),
        )
    }

    fn allocate(
        device: &Device,
        usage: vk::BufferUsageFlags,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
        flags: vk_mem::AllocationCreateFlags,
    ) -> Result<Self> {
        let allocator = device.allocator();
        let (buffer, allocation) = unsafe {
            allocator.create_buffer_with_alignment(
                &vk::BufferCreateInfo::default().size(size).usage(usage),
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::AutoPreferDevice,
                    flags,
                    ..Default::default()
                },
                alignment,
            )?
        };
        let info = allocator.get_allocation_info(&allocation);
        let memory_flags = device.memory_type_flags(info.memory_type);
        let address = if usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            unsafe {
                device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
            }
        } else {
            0
        };
        Ok(Self {
            buffer,
            allocation,
            size,
            mapped: info.mapped_data.cast(),
            coherent: memory_flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT),
            address,
        })
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn device_address(&self) -> vk::DeviceAddress {
        self.address
    }

    pub(crate) fn write(&self, device: &Device, offset: u64, data: &[u8]) -> Result<()> {
        if self.mapped.is_null() {
            return Err(Error::Unsupported("writing to a buffer without a host mapping"));
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                Error::invariant(
                    "buffer",
                    format!("write of {} bytes at {offset} overruns {} bytes", data.len(), self.size),
                )
            })?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapped.add(offset as usize), data.len());
        }
        if !self.coherent {
            device
                .allocator()
                .flush_allocation(&self.allocation, offset, end - offset)?;
        }
        Ok(())
    }
}

impl GpuObject for VulkanBuffer {
    type Owner = Device;
    const KIND: &'static str = "buffer";

    fn destroy(mut self, device: &Device) {
        unsafe {
            device
                .allocator()
                .destroy_buffer(self.buffer, &mut self.allocation);
        }
    }
}

/// The descriptor set binding one constant buffer.
pub struct VulkanBinding {
    pub(crate) set: vk::DescriptorSet,
}

impl GpuObject for VulkanBinding {
    type Owner = Device;
    const KIND: &'static str = "binding";

    fn destroy(self, device: &Device) {
        let pool = device.descriptor_pool();
        unsafe { device.free_descriptor_sets(*pool, &[self.set]) }.ok();
    }
}

pub struct VulkanAccelStruct {
    pub(crate) handle: vk::AccelerationStructureKHR,
    storage: VulkanBuffer,
    address: vk::DeviceAddress,
}

impl VulkanAccelStruct {
    pub(crate) fn new(
        handle: vk::AccelerationStructureKHR,
        storage: VulkanBuffer,
        address: vk::DeviceAddress,
    ) -> Self {
        Self {
            handle,
            storage,
            address,
        }
    }

    /// Address referenced by top-level instances.
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.address
    }
}

impl GpuObject for VulkanAccelStruct {
    type Owner = Device;
    const KIND: &'static str = "accel_struct";

    fn destroy(self, device: &Device) {
        if let Some(accel) = device.accel() {
            unsafe { accel.loader.destroy_acceleration_structure(self.handle, None) };
        }
        self.storage.destroy(device);
    }
}

/// A command pool with the single command buffer recorded each frame.
pub struct VulkanRecorder {
    pub(crate) pool: vk::CommandPool,
    pub(crate) buffer: vk::CommandBuffer,
}

impl GpuObject for VulkanRecorder {
    type Owner = Device;
    const KIND: &'static str = "recorder";

    fn destroy(self, device: &Device) {
        // Frees the command buffer with it.
        unsafe { device.destroy_command_pool(self.pool, None) };
    }
}

pub struct DepthImage {
    pub(crate) image: vk::Image,
    allocation: vk_mem::Allocation,
    pub(crate) format: vk::Format,
}

impl DepthImage {
    pub(crate) fn new(device: &Device, format: vk::Format, extent: vk::Extent2D) -> Result<Self> {
        let (image, allocation) = unsafe {
            device.allocator().create_image(
                &vk::ImageCreateInfo::default()
                    .image_type(vk::ImageType::TYPE_2D)
                    .format(format)
                    .extent(extent.into())
                    .mip_levels(1)
                    .array_layers(1)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::AutoPreferDevice,
                    flags: vk_mem::AllocationCreateFlags::DEDICATED_MEMORY,
                    ..Default::default()
                },
            )?
        };
        Ok(Self {
            image,
            allocation,
            format,
        })
    }
}

// Only touched by the allocator, on destroy.
unsafe impl Send for DepthImage {}
unsafe impl Sync for DepthImage {}

impl GpuObject for DepthImage {
    type Owner = Device;
    const KIND: &'static str = "depth_image";

    fn destroy(mut self, device: &Device) {
        unsafe {
            device
                .allocator()
                .destroy_image(self.image, &mut self.allocation);
        }
    }
}

/// A swapchain image. Owned by its swapchain, so it is always adopted rather than
/// created and its destroy is never called.
pub struct SwapchainImage {
    pub(crate) image: vk::Image,
}

impl GpuObject for SwapchainImage {
    type Owner = Device;
    const KIND: &'static str = "swapchain_image";

    fn destroy(self, _device: &Device) {}
}

/// Kinds that wrap a single handle and are destroyed by one device call.
macro_rules! handle_object {
    ($name:ident($handle:ty), $kind:literal, |$device:ident, $raw:ident| $destroy:expr) => {
        pub struct $name(pub(crate) $handle);

        impl GpuObject for $name {
            type Owner = Device;
            const KIND: &'static str = $kind;

            fn destroy(self, $device: &Device) {
                let $raw = self.0;
                unsafe { $destroy };
            }
        }
    };
}

handle_object!(VulkanPipeline(vk::Pipeline), "pipeline", |device, raw| {
    device.destroy_pipeline(raw, None)
});
handle_object!(VulkanFence(vk::Fence), "fence", |device, raw| {
    device.destroy_fence(raw, None)
});
handle_object!(VulkanSemaphore(vk::Semaphore), "semaphore", |device, raw| {
    device.destroy_semaphore(raw, None)
});
handle_object!(VulkanSwapchain(vk::SwapchainKHR), "swapchain", |device, raw| {
    device.swapchain_fn().destroy_swapchain(raw, None)
});
handle_object!(VulkanImageView(vk::ImageView), "image_view", |device, raw| {
    device.destroy_image_view(raw, None)
});
handle_object!(VulkanRenderPass(vk::RenderPass), "render_pass", |device, raw| {
    device.destroy_render_pass(raw, None)
});
handle_object!(VulkanFramebuffer(vk::Framebuffer), "framebuffer", |device, raw| {
    device.destroy_framebuffer(raw, None)
});
