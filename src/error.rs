use std::time::Duration;

use ash::vk;

/// Errors surfaced by the resource registries, the frame pipeline and the backends.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A lifetime invariant was broken. These indicate programmer error and are not
    /// recoverable: refcount underflow, orphaning an untracked entry, or tearing down
    /// with live entries.
    #[error("invariant violated in {kind} registry: {detail}")]
    InvariantViolation { kind: &'static str, detail: String },
    #[error("timed out after {0:?} waiting for the device")]
    DeviceTimeout(Duration),
    #[error("device lost")]
    DeviceLost,
    #[error("out of memory")]
    OutOfMemory,
    /// The swapchain no longer matches the surface and must be recreated.
    #[error("swapchain is out of date")]
    SwapchainOutOfDate,
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Source data a derived artifact cannot be built from, such as out of range indices.
    #[error("invalid mesh data: {0}")]
    InvalidMesh(String),
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn invariant(kind: &'static str, detail: impl Into<String>) -> Self {
        Error::InvariantViolation {
            kind,
            detail: detail.into(),
        }
    }

    /// Returns true for errors after which the frame loop cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvariantViolation { .. } | Error::DeviceLost | Error::Unsupported(_)
        )
    }
}

impl From<vk::Result> for Error {
    fn from(value: vk::Result) -> Self {
        match value {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                Error::OutOfMemory
            }
            vk::Result::ERROR_DEVICE_LOST => Error::DeviceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Error::SwapchainOutOfDate,
            other => Error::Vulkan(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_result_mapping() {
        assert_eq!(
            Error::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            Error::OutOfMemory
        );
        assert_eq!(
            Error::from(vk::Result::ERROR_OUT_OF_DATE_KHR),
            Error::SwapchainOutOfDate
        );
        assert_eq!(
            Error::from(vk::Result::ERROR_INITIALIZATION_FAILED),
            Error::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
        );
        assert!(Error::DeviceLost.is_fatal());
        assert!(!Error::DeviceTimeout(Duration::from_millis(1)).is_fatal());
    }
}
