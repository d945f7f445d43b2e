use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, frame::FrameConfig};

/// Tunables of the viewer core. Missing fields take their default values when
/// deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Initial number of per-draw constant buffers. Must exceed `frames_in_flight`.
    pub object_buffer_ring: usize,
    /// Upper bound on a frame fence wait. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
    pub clear_color: [f32; 4],
    /// Length of normal segments in object space.
    pub normal_length: f32,
    /// Length of tangent frame segments in object space.
    pub tangent_length: f32,
    /// Build acceleration structures for every mesh.
    pub ray_tracing: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            object_buffer_ring: 10,
            fence_timeout_ms: Some(5000),
            clear_color: [0.1, 0.1, 0.12, 1.0],
            normal_length: 0.05,
            tangent_length: 0.05,
            ray_tracing: false,
        }
    }
}

impl ViewerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::InvalidConfig(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        if self.object_buffer_ring <= self.frames_in_flight {
            return Err(Error::InvalidConfig(format!(
                "object_buffer_ring ({}) must exceed frames_in_flight ({})",
                self.object_buffer_ring, self.frames_in_flight
            )));
        }
        if !(self.normal_length.is_finite() && self.tangent_length.is_finite()) {
            return Err(Error::InvalidConfig(
                "segment lengths must be finite".into(),
            ));
        }
        Ok(())
    }

    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }

    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            slot_count: self.frames_in_flight,
            fence_timeout: self.fence_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: ViewerConfig =
            serde_json::from_str(r#"{ "frames_in_flight": 3, "fence_timeout_ms": null }"#).unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.object_buffer_ring, 10);
        assert_eq!(config.fence_timeout(), None);
        config.validate().unwrap();
    }

    #[test]
    fn test_ring_must_exceed_frames_in_flight() {
        let config = ViewerConfig {
            frames_in_flight: 3,
            object_buffer_ring: 3,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        let config = ViewerConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
