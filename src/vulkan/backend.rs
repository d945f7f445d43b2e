use std::{ffi::CStr, sync::Mutex, time::Duration};

use ash::vk;
use smallvec::SmallVec;

use super::{
    Device, PresentationTarget, VulkanConfig,
    objects::{
        VulkanAccelStruct, VulkanBinding, VulkanBuffer, VulkanFence, VulkanPipeline,
        VulkanRecorder, VulkanRenderPass, VulkanSemaphore,
    },
    swapchain::{Formats, Presentation, PresentationRegistries, create_render_pass},
};
use crate::{
    Error, Result,
    backend::{
        AcquiredImage, Backend, BufferUsage, DrawCall, PresentStatus, TriangleGeometry,
    },
    context::ResourceContext,
    registry::{GpuObject, Handle, lock},
};

const SHADER_ENTRY: &CStr = c"main";

/// Vertex streams of [`SolidPass`](crate::passes::SolidPass): interleaved position and
/// normal, then color.
pub const SOLID_STREAMS: &[&[vk::Format]] = &[
    &[vk::Format::R32G32B32_SFLOAT, vk::Format::R32G32B32_SFLOAT],
    &[vk::Format::R32G32B32A32_SFLOAT],
];
/// Vertex streams of the line passes: position, then color.
pub const LINE_STREAMS: &[&[vk::Format]] = &[
    &[vk::Format::R32G32B32_SFLOAT],
    &[vk::Format::R32G32B32A32_SFLOAT],
];

/// A graphics pipeline compatible with the backend's render pass and per-draw binding.
pub struct PipelineDesc<'a> {
    pub vertex_spirv: &'a [u32],
    pub fragment_spirv: &'a [u32],
    pub topology: vk::PrimitiveTopology,
    /// Attribute formats of each vertex stream. Stream `n` is bound at binding `n` and
    /// attribute locations are numbered across streams.
    pub streams: &'a [&'a [vk::Format]],
    pub depth_test: bool,
}

fn format_size(format: vk::Format) -> Result<u32> {
    match format {
        vk::Format::R32_SFLOAT | vk::Format::R32_UINT => Ok(4),
        vk::Format::R32G32_SFLOAT => Ok(8),
        vk::Format::R32G32B32_SFLOAT => Ok(12),
        vk::Format::R32G32B32A32_SFLOAT => Ok(16),
        _ => Err(Error::Unsupported("vertex attribute format")),
    }
}

fn vertex_layout(
    streams: &[&[vk::Format]],
) -> Result<(
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
)> {
    let mut bindings = Vec::with_capacity(streams.len());
    let mut attributes = Vec::new();
    for (binding, formats) in streams.iter().enumerate() {
        let mut offset = 0;
        for &format in formats.iter() {
            attributes.push(vk::VertexInputAttributeDescription {
                location: attributes.len() as u32,
                binding: binding as u32,
                format,
                offset,
            });
            offset += format_size(format)?;
        }
        bindings.push(vk::VertexInputBindingDescription {
            binding: binding as u32,
            stride: offset,
            input_rate: vk::VertexInputRate::VERTEX,
        });
    }
    Ok((bindings, attributes))
}

fn timeout_ns(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
}

/// Renders into the swapchain of one window.
pub struct VulkanBackend {
    device: Device,
    config: VulkanConfig,
    target: Box<dyn PresentationTarget>,
    formats: Formats,
    registries: PresentationRegistries,
    render_pass: Mutex<Option<Handle<VulkanRenderPass>>>,
    presentation: Mutex<Option<Presentation>>,
}

impl VulkanBackend {
    /// Create the device and the initial swapchain for `target`.
    ///
    /// A window with no area yet is fine: the swapchain is created on the first
    /// recreation after it gains one.
    pub fn new(
        target: Box<dyn PresentationTarget>,
        config: VulkanConfig,
        resources: &ResourceContext,
    ) -> Result<Self> {
        let device = Device::new(&config, target.as_ref())?;
        let formats = Formats::choose(&device)?;
        let registries = PresentationRegistries::new(resources, &device);
        let render_pass = registries
            .render_passes
            .create(create_render_pass(&device, formats)?);
        let presentation = match Presentation::create(
            &device,
            &registries,
            &config,
            formats,
            &render_pass,
            target.extent(),
            None,
        ) {
            Ok(presentation) => Some(presentation),
            Err(Error::SwapchainOutOfDate) => None,
            Err(err) => return Err(err),
        };
        Ok(Self {
            device,
            config,
            target,
            formats,
            registries,
            render_pass: Mutex::new(Some(render_pass)),
            presentation: Mutex::new(presentation),
        })
    }

    pub fn config(&self) -> &VulkanConfig {
        &self.config
    }

    /// Size of the current swapchain, if there is one.
    pub fn extent(&self) -> Option<[u32; 2]> {
        lock(&self.presentation)
            .as_ref()
            .map(|p| [p.extent().width, p.extent().height])
    }

    /// Build a pipeline for the backend's render pass. Register it with
    /// [`GpuContext::add_pipeline`](crate::GpuContext::add_pipeline).
    pub fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<VulkanPipeline> {
        let render_pass = lock(&self.render_pass)
            .as_ref()
            .map(|rp| rp.0)
            .ok_or_else(|| Error::invariant("pipeline", "backend already released"))?;
        let (bindings, attributes) = vertex_layout(desc.streams)?;
        let device = &self.device;
        let vertex = unsafe {
            device.create_shader_module(
                &vk::ShaderModuleCreateInfo::default().code(desc.vertex_spirv),
                None,
            )
        }?;
        let fragment = match unsafe {
            device.create_shader_module(
                &vk::ShaderModuleCreateInfo::default().code(desc.fragment_spirv),
                None,
            )
        } {
            Ok(module) => module,
            Err(err) => {
                unsafe { device.destroy_shader_module(vertex, None) };
                return Err(err.into());
            }
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex)
                .name(SHADER_ENTRY),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment)
                .name(SHADER_ENTRY),
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(desc.topology);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let raster = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_test)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&raster)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth)
            .color_blend_state(&blend)
            .dynamic_state(&dynamic)
            .layout(device.pipeline_layout())
            .render_pass(render_pass)
            .subpass(0);
        let result = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&info),
                None,
            )
        };
        unsafe {
            device.destroy_shader_module(vertex, None);
            device.destroy_shader_module(fragment, None);
        }
        let pipelines = result.map_err(|(_, err)| Error::from(err))?;
        Ok(VulkanPipeline(pipelines[0]))
    }

    /// Build a bottom-level structure on the device and wait for it.
    fn build_blas(&self, geometry: &TriangleGeometry<'_, Self>) -> Result<VulkanAccelStruct> {
        let device = &self.device;
        let accel = device
            .accel()
            .ok_or(Error::Unsupported("ray tracing is not enabled on this device"))?;
        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
            .vertex_format(vk::Format::R32G32B32_SFLOAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: geometry.positions.device_address(),
            })
            .vertex_stride(12)
            .max_vertex(geometry.vertex_count.saturating_sub(1))
            .index_type(vk::IndexType::UINT32)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: geometry.indices.device_address(),
            });
        let geometries = [vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(vk::GeometryFlagsKHR::OPAQUE)];
        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);

        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            accel.loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[geometry.triangle_count],
                &mut sizes,
            );
        }
        let storage = VulkanBuffer::new_private(
            device,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
            sizes.acceleration_structure_size,
            256,
        )?;
        let scratch = VulkanBuffer::new_private(
            device,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            sizes.build_scratch_size,
            accel.scratch_alignment,
        )?;
        let handle = match unsafe {
            accel.loader.create_acceleration_structure(
                &vk::AccelerationStructureCreateInfoKHR::default()
                    .buffer(storage.buffer)
                    .size(sizes.acceleration_structure_size)
                    .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL),
                None,
            )
        } {
            Ok(handle) => handle,
            Err(err) => {
                storage.destroy(device);
                scratch.destroy(device);
                return Err(err.into());
            }
        };
        build_info = build_info
            .dst_acceleration_structure(handle)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch.device_address(),
            });
        let range = vk::AccelerationStructureBuildRangeInfoKHR::default()
            .primitive_count(geometry.triangle_count);
        let built = device.submit_blocking(|command_buffer| unsafe {
            accel.loader.cmd_build_acceleration_structures(
                command_buffer,
                std::slice::from_ref(&build_info),
                &[std::slice::from_ref(&range)],
            );
        });
        scratch.destroy(device);
        let address = unsafe {
            accel.loader.get_acceleration_structure_device_address(
                &vk::AccelerationStructureDeviceAddressInfoKHR::default()
                    .acceleration_structure(handle),
            )
        };
        let built_struct = VulkanAccelStruct::new(handle, storage, address);
        match built {
            Ok(()) => Ok(built_struct),
            Err(err) => {
                built_struct.destroy(device);
                Err(err)
            }
        }
    }
}

impl Backend for VulkanBackend {
    type Device = Device;
    type Buffer = VulkanBuffer;
    type Binding = VulkanBinding;
    type Pipeline = VulkanPipeline;
    type AccelStruct = VulkanAccelStruct;
    type Fence = VulkanFence;
    type Semaphore = VulkanSemaphore;
    type Recorder = VulkanRecorder;

    fn device(&self) -> &Device {
        &self.device
    }

    fn create_buffer(&self, usage: BufferUsage, size: u64) -> Result<VulkanBuffer> {
        VulkanBuffer::new(&self.device, usage, size)
    }

    fn write_buffer(&self, buffer: &VulkanBuffer, offset: u64, data: &[u8]) -> Result<()> {
        buffer.write(&self.device, offset, data)
    }

    fn create_binding(&self, constants: &VulkanBuffer) -> Result<VulkanBinding> {
        let device = &self.device;
        let layouts = [device.binding_layout()];
        let set = {
            let pool = device.descriptor_pool();
            unsafe {
                device.allocate_descriptor_sets(
                    &vk::DescriptorSetAllocateInfo::default()
                        .descriptor_pool(*pool)
                        .set_layouts(&layouts),
                )
            }?[0]
        };
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: constants.buffer,
            offset: 0,
            range: constants.size(),
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info);
        unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
        Ok(VulkanBinding { set })
    }

    fn build_accel_struct(&self, geometry: &TriangleGeometry<'_, Self>) -> Result<VulkanAccelStruct> {
        self.build_blas(geometry)
    }

    fn create_fence(&self, signaled: bool) -> Result<VulkanFence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }?;
        Ok(VulkanFence(fence))
    }

    fn create_semaphore(&self) -> Result<VulkanSemaphore> {
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }?;
        Ok(VulkanSemaphore(semaphore))
    }

    fn create_recorder(&self) -> Result<VulkanRecorder> {
        let device = &self.device;
        let pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT)
                    .queue_family_index(device.queue_family()),
                None,
            )
        }?;
        let buffers = unsafe {
            device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
        };
        match buffers {
            Ok(buffers) => Ok(VulkanRecorder {
                pool,
                buffer: buffers[0],
            }),
            Err(err) => {
                unsafe { device.destroy_command_pool(pool, None) };
                Err(err.into())
            }
        }
    }

    fn wait_for_fence(&self, fence: &VulkanFence, timeout: Option<Duration>) -> Result<()> {
        match unsafe {
            self.device
                .wait_for_fences(&[fence.0], true, timeout_ns(timeout))
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(Error::DeviceTimeout(timeout.unwrap_or_default())),
            Err(err) => Err(err.into()),
        }
    }

    fn reset_fence(&self, fence: &VulkanFence) -> Result<()> {
        Ok(unsafe { self.device.reset_fences(&[fence.0]) }?)
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(unsafe { self.device.device_wait_idle() }?)
    }

    fn begin_recording(&self, recorder: &VulkanRecorder) -> Result<()> {
        unsafe {
            self.device
                .reset_command_pool(recorder.pool, vk::CommandPoolResetFlags::empty())?;
            self.device.begin_command_buffer(
                recorder.buffer,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }
        Ok(())
    }

    fn begin_pass(&self, recorder: &VulkanRecorder, image: AcquiredImage, clear_color: [f32; 4]) {
        let render_pass = lock(&self.render_pass).as_ref().map(|rp| rp.0);
        let presentation = lock(&self.presentation);
        let target = presentation.as_ref().and_then(|p| {
            Some((p.framebuffer(image.index)?, p.extent()))
        });
        let (Some(render_pass), Some((framebuffer, extent))) = (render_pass, target) else {
            tracing::error!(image = image.index, "render pass begun without a matching swapchain image");
            return;
        };
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        unsafe {
            self.device.cmd_begin_render_pass(
                recorder.buffer,
                &vk::RenderPassBeginInfo::default()
                    .render_pass(render_pass)
                    .framebuffer(framebuffer)
                    .render_area(extent.into())
                    .clear_values(&clear_values),
                vk::SubpassContents::INLINE,
            );
        }
    }

    fn record_draw(&self, recorder: &VulkanRecorder, draw: &DrawCall<'_, Self>) {
        let device = &self.device;
        let cmd = recorder.buffer;
        let viewport = vk::Viewport {
            x: draw.viewport.x,
            y: draw.viewport.y,
            width: draw.viewport.width,
            height: draw.viewport.height,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: draw.viewport.x as i32,
                y: draw.viewport.y as i32,
            },
            extent: vk::Extent2D {
                width: draw.viewport.width as u32,
                height: draw.viewport.height as u32,
            },
        };
        let buffers: SmallVec<[vk::Buffer; 4]> =
            draw.vertex_buffers.iter().map(|b| b.buffer).collect();
        let offsets: SmallVec<[vk::DeviceSize; 4]> = smallvec::smallvec![0; buffers.len()];
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline.0);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                device.pipeline_layout(),
                0,
                &[draw.binding.set],
                &[],
            );
            device.cmd_bind_vertex_buffers(cmd, 0, &buffers, &offsets);
            match draw.index_buffer {
                Some(indices) => {
                    device.cmd_bind_index_buffer(cmd, indices.buffer, 0, vk::IndexType::UINT32);
                    device.cmd_draw_indexed(cmd, draw.count, 1, 0, 0, 0);
                }
                None => device.cmd_draw(cmd, draw.count, 1, 0, 0),
            }
        }
    }

    fn end_pass(&self, recorder: &VulkanRecorder) {
        unsafe { self.device.cmd_end_render_pass(recorder.buffer) };
    }

    fn submit(
        &self,
        recorder: &VulkanRecorder,
        wait: Option<&VulkanSemaphore>,
        signal: Option<&VulkanSemaphore>,
        fence: &VulkanFence,
    ) -> Result<()> {
        let device = &self.device;
        unsafe { device.end_command_buffer(recorder.buffer) }?;
        let wait_semaphores: SmallVec<[vk::Semaphore; 1]> = wait.map(|s| s.0).into_iter().collect();
        let wait_stages: SmallVec<[vk::PipelineStageFlags; 1]> = wait
            .map(|_| vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .into_iter()
            .collect();
        let command_buffers = [recorder.buffer];
        let signal_semaphores: SmallVec<[vk::Semaphore; 1]> =
            signal.map(|s| s.0).into_iter().collect();
        let info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        let queue = device.queue();
        Ok(unsafe { device.queue_submit(*queue, std::slice::from_ref(&info), fence.0) }?)
    }

    fn acquire_image(
        &self,
        signal: &VulkanSemaphore,
        timeout: Option<Duration>,
    ) -> Result<AcquiredImage> {
        let presentation = lock(&self.presentation);
        let Some(presentation) = presentation.as_ref() else {
            return Err(Error::SwapchainOutOfDate);
        };
        let result = unsafe {
            self.device.swapchain_fn().acquire_next_image(
                presentation.swapchain(),
                timeout_ns(timeout),
                signal.0,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquiredImage { index, suboptimal }),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                Err(Error::DeviceTimeout(timeout.unwrap_or_default()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn present(&self, image: AcquiredImage, wait: &VulkanSemaphore) -> Result<PresentStatus> {
        let presentation = lock(&self.presentation);
        let Some(presentation) = presentation.as_ref() else {
            return Err(Error::SwapchainOutOfDate);
        };
        let wait_semaphores = [wait.0];
        let swapchains = [presentation.swapchain()];
        let indices = [image.index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let queue = self.device.queue();
        match unsafe { self.device.swapchain_fn().queue_present(*queue, &info) } {
            Ok(false) if !image.suboptimal => Ok(PresentStatus::Optimal),
            Ok(_) => Ok(PresentStatus::Suboptimal),
            Err(err) => Err(err.into()),
        }
    }

    fn recreate_swapchain(&self) -> Result<()> {
        let render_pass = lock(&self.render_pass)
            .clone()
            .ok_or_else(|| Error::invariant("swapchain", "backend already released"))?;
        let mut presentation = lock(&self.presentation);
        let old = presentation.take();
        let created = Presentation::create(
            &self.device,
            &self.registries,
            &self.config,
            self.formats,
            &render_pass,
            self.target.extent(),
            old.as_ref(),
        );
        drop(old);
        // The device is idle, so the old swapchain objects can go right away.
        self.registries.reap()?;
        match created {
            Ok(created) => {
                *presentation = Some(created);
                Ok(())
            }
            Err(Error::SwapchainOutOfDate) => {
                tracing::info!("surface has no area; swapchain deferred");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn release(&self) {
        lock(&self.presentation).take();
        lock(&self.render_pass).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_numbers_locations_across_streams() {
        let (bindings, attributes) = vertex_layout(SOLID_STREAMS).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].stride, 24);
        assert_eq!(bindings[1].stride, 16);
        let locations: Vec<_> = attributes
            .iter()
            .map(|a| (a.location, a.binding, a.offset))
            .collect();
        assert_eq!(locations, [(0, 0, 0), (1, 0, 12), (2, 1, 0)]);
    }

    #[test]
    fn test_unknown_attribute_format_is_rejected() {
        let streams: &[&[vk::Format]] = &[&[vk::Format::R8_UNORM]];
        assert!(matches!(vertex_layout(streams), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(timeout_ns(None), u64::MAX);
        assert_eq!(timeout_ns(Some(Duration::from_millis(2))), 2_000_000);
    }
}
