//! The production [`Backend`](crate::backend::Backend), built on `ash` and the Vulkan
//! Memory Allocator.
//!
//! [`Device`] owns the instance, the logical device, the allocator and the extension
//! loaders. [`VulkanBackend`] adds the presentation state for one window: swapchain,
//! views, depth buffer, render pass and framebuffers, rebuilt on resize.
//!
//! ```no_run
//! # fn window() -> Box<dyn scoria::vulkan::PresentationTarget> { unimplemented!() }
//! use scoria::{GpuContext, ResourceContext, vulkan::{VulkanBackend, VulkanConfig}};
//!
//! let resources = ResourceContext::new();
//! let backend = VulkanBackend::new(window(), VulkanConfig::default(), &resources).unwrap();
//! let context = GpuContext::new(backend, resources);
//! ```
use serde::{Deserialize, Serialize};

mod backend;
mod device;
mod objects;
mod surface;
mod swapchain;

pub use backend::{LINE_STREAMS, PipelineDesc, SOLID_STREAMS, VulkanBackend};
pub use device::Device;
pub use objects::{
    DepthImage, SwapchainImage, VulkanAccelStruct, VulkanBinding, VulkanBuffer, VulkanFence,
    VulkanFramebuffer, VulkanImageView, VulkanPipeline, VulkanRecorder, VulkanRenderPass,
    VulkanSemaphore, VulkanSwapchain,
};
pub use surface::PresentationTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PresentMode {
    /// Vertical sync. Always supported.
    #[default]
    Fifo,
    Mailbox,
    Immediate,
}

impl From<PresentMode> for ash::vk::PresentModeKHR {
    fn from(mode: PresentMode) -> Self {
        match mode {
            PresentMode::Fifo => Self::FIFO,
            PresentMode::Mailbox => Self::MAILBOX,
            PresentMode::Immediate => Self::IMMEDIATE,
        }
    }
}

/// Device and swapchain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulkanConfig {
    pub application_name: String,
    /// Enable the Khronos validation layer when it is installed.
    pub validation: bool,
    /// Preferred present mode. Falls back to FIFO when unsupported.
    pub present_mode: PresentMode,
    /// Request acceleration structure support. Ignored on devices without it.
    pub ray_tracing: bool,
    pub min_image_count: u32,
}

impl Default for VulkanConfig {
    fn default() -> Self {
        Self {
            application_name: "scoria".into(),
            validation: cfg!(debug_assertions),
            present_mode: PresentMode::Fifo,
            ray_tracing: false,
            min_image_count: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_partial_document() {
        let config: VulkanConfig =
            serde_json::from_str(r#"{ "present_mode": "Mailbox", "ray_tracing": true }"#).unwrap();
        assert_eq!(config.present_mode, PresentMode::Mailbox);
        assert!(config.ray_tracing);
        assert_eq!(config.min_image_count, 3);
        assert_eq!(
            ash::vk::PresentModeKHR::from(config.present_mode),
            ash::vk::PresentModeKHR::MAILBOX
        );
    }
}
