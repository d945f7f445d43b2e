//! Swapchain and everything sized after it.
use ash::vk;

use super::{
    Device, VulkanConfig,
    objects::{
        DepthImage, SwapchainImage, VulkanFramebuffer, VulkanImageView, VulkanRenderPass,
        VulkanSwapchain,
    },
};
use crate::{
    Error, Result,
    context::ResourceContext,
    registry::{Handle, Registry},
};

const DEPTH_FORMATS: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Registries of the presentation object kinds.
pub(crate) struct PresentationRegistries {
    pub(crate) render_passes: Registry<VulkanRenderPass>,
    swapchains: Registry<VulkanSwapchain>,
    images: Registry<SwapchainImage>,
    depth_images: Registry<DepthImage>,
    views: Registry<VulkanImageView>,
    framebuffers: Registry<VulkanFramebuffer>,
}

impl PresentationRegistries {
    pub(crate) fn new(resources: &ResourceContext, device: &Device) -> Self {
        // Reaped in reverse: framebuffers, then views, then the images they reference.
        Self {
            render_passes: resources.registry(device.clone()),
            swapchains: resources.registry(device.clone()),
            images: resources.registry(device.clone()),
            depth_images: resources.registry(device.clone()),
            views: resources.registry(device.clone()),
            framebuffers: resources.registry(device.clone()),
        }
    }

    /// Destroy every retired presentation object. The device must be idle.
    pub(crate) fn reap(&self) -> Result<usize> {
        Ok(self.framebuffers.house_keep_all()?
            + self.views.house_keep_all()?
            + self.depth_images.house_keep_all()?
            + self.images.house_keep_all()?
            + self.swapchains.house_keep_all()?
            + self.render_passes.house_keep_all()?)
    }
}

/// Surface format and depth format, chosen once per backend.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Formats {
    pub(crate) surface: vk::SurfaceFormatKHR,
    pub(crate) depth: vk::Format,
}

impl Formats {
    pub(crate) fn choose(device: &Device) -> Result<Self> {
        let formats = unsafe {
            device
                .surface_fn()
                .get_physical_device_surface_formats(device.physical_device(), device.surface())
        }?;
        let surface = formats
            .iter()
            .copied()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first().copied())
            .ok_or(Error::Unsupported("surface reports no formats"))?;
        let depth = DEPTH_FORMATS
            .into_iter()
            .find(|&format| {
                let properties = unsafe {
                    device
                        .instance()
                        .get_physical_device_format_properties(device.physical_device(), format)
                };
                properties
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .ok_or(Error::Unsupported("no depth attachment format"))?;
        Ok(Self { surface, depth })
    }
}

/// Clear the color and depth targets, then hand the color image to presentation.
pub(crate) fn create_render_pass(device: &Device, formats: Formats) -> Result<VulkanRenderPass> {
    let attachments = [
        vk::AttachmentDescription::default()
            .format(formats.surface.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        vk::AttachmentDescription::default()
            .format(formats.depth)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];
    let color_ref = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref)
        .depth_stencil_attachment(&depth_ref);
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .dst_stage_mask(stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );
    let render_pass = unsafe {
        device.create_render_pass(
            &vk::RenderPassCreateInfo::default()
                .attachments(&attachments)
                .subpasses(std::slice::from_ref(&subpass))
                .dependencies(std::slice::from_ref(&dependency)),
            None,
        )
    }?;
    Ok(VulkanRenderPass(render_pass))
}

/// Everything that has to be rebuilt when the surface changes size.
pub(crate) struct Presentation {
    swapchain: Handle<VulkanSwapchain>,
    _images: Vec<Handle<SwapchainImage>>,
    _views: Vec<Handle<VulkanImageView>>,
    _depth: Handle<DepthImage>,
    _depth_view: Handle<VulkanImageView>,
    framebuffers: Vec<Handle<VulkanFramebuffer>>,
    extent: vk::Extent2D,
}

impl Presentation {
    /// Returns [`Error::SwapchainOutOfDate`] while the surface has no area.
    pub(crate) fn create(
        device: &Device,
        registries: &PresentationRegistries,
        config: &VulkanConfig,
        formats: Formats,
        render_pass: &VulkanRenderPass,
        requested_extent: [u32; 2],
        old: Option<&Presentation>,
    ) -> Result<Self> {
        if requested_extent.contains(&0) {
            return Err(Error::SwapchainOutOfDate);
        }
        let surface_fn = device.surface_fn();
        let capabilities = unsafe {
            surface_fn.get_physical_device_surface_capabilities(
                device.physical_device(),
                device.surface(),
            )
        }?;
        let extent = choose_extent(&capabilities, requested_extent);
        if extent.width == 0 || extent.height == 0 {
            return Err(Error::SwapchainOutOfDate);
        }
        let present_modes = unsafe {
            surface_fn.get_physical_device_surface_present_modes(
                device.physical_device(),
                device.surface(),
            )
        }?;
        let requested_mode: vk::PresentModeKHR = config.present_mode.into();
        let present_mode = if present_modes.contains(&requested_mode) {
            requested_mode
        } else {
            vk::PresentModeKHR::FIFO
        };
        let mut image_count = config.min_image_count.max(capabilities.min_image_count);
        if capabilities.max_image_count != 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }
        tracing::info!(
            width = extent.width,
            height = extent.height,
            format = ?formats.surface.format,
            ?present_mode,
            recreate = old.is_some(),
            "Creating swapchain"
        );

        let swapchain = unsafe {
            device.swapchain_fn().create_swapchain(
                &vk::SwapchainCreateInfoKHR::default()
                    .surface(device.surface())
                    .min_image_count(image_count)
                    .image_format(formats.surface.format)
                    .image_color_space(formats.surface.color_space)
                    .image_extent(extent)
                    .image_array_layers(1)
                    .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
                    .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .pre_transform(capabilities.current_transform)
                    .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                    .present_mode(present_mode)
                    .clipped(true)
                    .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |old| old.swapchain.0)),
                None,
            )
        }?;
        let swapchain = registries.swapchains.create(VulkanSwapchain(swapchain));
        let raw_images = unsafe { device.swapchain_fn().get_swapchain_images(swapchain.0) }?;

        let images: Vec<_> = raw_images
            .into_iter()
            .map(|image| registries.images.adopt(SwapchainImage { image }))
            .collect();
        let views = images
            .iter()
            .map(|image| {
                create_view(
                    device,
                    image.image,
                    formats.surface.format,
                    vk::ImageAspectFlags::COLOR,
                )
                .map(|view| registries.views.create(view))
            })
            .collect::<Result<Vec<_>>>()?;
        let depth = registries
            .depth_images
            .create(DepthImage::new(device, formats.depth, extent)?);
        let depth_view = registries.views.create(create_view(
            device,
            depth.image,
            depth.format,
            vk::ImageAspectFlags::DEPTH,
        )?);
        let framebuffers = views
            .iter()
            .map(|view| {
                let attachments = [view.0, depth_view.0];
                let framebuffer = unsafe {
                    device.create_framebuffer(
                        &vk::FramebufferCreateInfo::default()
                            .render_pass(render_pass.0)
                            .attachments(&attachments)
                            .width(extent.width)
                            .height(extent.height)
                            .layers(1),
                        None,
                    )
                }?;
                Ok(registries.framebuffers.create(VulkanFramebuffer(framebuffer)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            swapchain,
            _images: images,
            _views: views,
            _depth: depth,
            _depth_view: depth_view,
            framebuffers,
            extent,
        })
    }

    pub(crate) fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain.0
    }

    pub(crate) fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub(crate) fn framebuffer(&self, index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index as usize).map(|fb| fb.0)
    }
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: [u32; 2]) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
    vk::Extent2D {
        width: requested[0].clamp(min.width, max.width),
        height: requested[1].clamp(min.height, max.height),
    }
}

fn create_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<VulkanImageView> {
    let view = unsafe {
        device.create_image_view(
            &vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                }),
            None,
        )
    }?;
    Ok(VulkanImageView(view))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_follows_surface_when_fixed() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, [1024, 768]);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_extent_clamped_when_surface_defers() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, [8000, 2]);
        assert_eq!((extent.width, extent.height), (4096, 2));
    }
}
