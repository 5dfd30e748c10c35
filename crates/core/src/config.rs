//! Renderer configuration.
//!
//! Configuration is stored as RON and deserialized with serde. Every field has
//! a default, so a file only needs to name the values it changes:
//!
//! ```text
//! (
//!     frames_in_flight: 3,
//!     resource_views: (shader_resources: 4096),
//!     distance_unit: 0.5,
//! )
//! ```
//!
//! Values are checked by [`RendererConfig::validate`], which both loaders call.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Upper bound on in-flight frame slots accepted by validation.
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

/// Capacities of the resource-view pools, one per view kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceViewBudget {
    /// Constant-buffer, shader-resource and unordered-access views.
    pub shader_resources: u32,
    /// Sampler views.
    pub samplers: u32,
    /// Render-target views.
    pub render_targets: u32,
    /// Depth-stencil views.
    pub depth_stencils: u32,
}

impl Default for ResourceViewBudget {
    fn default() -> Self {
        Self {
            shader_resources: 1024,
            samplers: 64,
            render_targets: 16,
            depth_stencils: 8,
        }
    }
}

/// Settings for the software device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    /// Simulated GPU execution time per submission, in milliseconds.
    pub gpu_latency_ms: u64,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self { gpu_latency_ms: 4 }
    }
}

/// Settings for the Vulkan device.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulkanConfig {
    /// Enable the Khronos validation layer when it is installed.
    pub validation: bool,
}

/// Top-level renderer configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Pool capacity per resource-view kind.
    pub resource_views: ResourceViewBudget,
    /// Whether the sampler heap is visible to shaders.
    pub shader_visible_samplers: bool,
    /// Depth bucket size used when sorting opaque draws, in world units.
    pub distance_unit: f32,
    /// Software device settings.
    pub headless: HeadlessConfig,
    /// Vulkan device settings.
    pub vulkan: VulkanConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            resource_views: ResourceViewBudget::default(),
            shader_visible_samplers: true,
            distance_unit: 1.0,
            headless: HeadlessConfig::default(),
            vulkan: VulkanConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, [`Error::ConfigParse`]
    /// if it is not valid RON, and [`Error::Config`] if a value is out of range.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_ron_str(&text)?;
        debug!("Loaded renderer config from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a configuration from a RON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] on malformed input and [`Error::Config`]
    /// if a value is out of range.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let config: Self =
            ron::de::from_str(text).map_err(|e| Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty-printed RON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if serialization fails.
    pub fn to_ron_string(&self) -> Result<String> {
        let pretty = ron::ser::PrettyConfig::default().indentor("    ".to_string());
        ron::ser::to_string_pretty(self, pretty).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(Error::Config(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }

        let views = &self.resource_views;
        for (name, capacity) in [
            ("shader_resources", views.shader_resources),
            ("samplers", views.samplers),
            ("render_targets", views.render_targets),
            ("depth_stencils", views.depth_stencils),
        ] {
            if capacity == 0 {
                return Err(Error::Config(format!(
                    "resource_views.{name} must be greater than zero"
                )));
            }
        }

        if !self.distance_unit.is_finite() || self.distance_unit <= 0.0 {
            return Err(Error::Config(format!(
                "distance_unit must be a positive finite number, got {}",
                self.distance_unit
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.distance_unit, 1.0);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config = RendererConfig::from_ron_str(
            "(frames_in_flight: 3, resource_views: (shader_resources: 4096))",
        )
        .unwrap();

        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.resource_views.shader_resources, 4096);
        assert_eq!(config.resource_views.samplers, 64);
        assert_eq!(config.headless.gpu_latency_ms, 4);
        assert!(!config.vulkan.validation);
    }

    #[test]
    fn test_rejects_zero_frames() {
        let err = RendererConfig::from_ron_str("(frames_in_flight: 0)").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_too_many_frames() {
        let config = RendererConfig {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_pool() {
        let err =
            RendererConfig::from_ron_str("(resource_views: (render_targets: 0))").unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.contains("render_targets")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_distance_unit() {
        for unit in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let config = RendererConfig {
                distance_unit: unit,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "unit {unit} accepted");
        }
    }

    #[test]
    fn test_malformed_ron() {
        let err = RendererConfig::from_ron_str("(frames_in_flight: \"two\")").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_ron_round_trip_of_custom_values() {
        let config = RendererConfig {
            frames_in_flight: 3,
            distance_unit: 0.25,
            shader_visible_samplers: false,
            ..Default::default()
        };
        let text = config.to_ron_string().unwrap();
        assert_eq!(RendererConfig::from_ron_str(&text).unwrap(), config);
    }
}
