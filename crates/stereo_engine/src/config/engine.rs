//! Engine, renderer and headless-device configuration

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};
use crate::render::device::Extent2D;

/// # Renderer Configuration
///
/// Ring depth, per-frame buffer capacities, timeouts and target sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frames that may be in flight on the GPU at once
    pub frames_in_flight: usize,
    /// Capacity of the per-frame object buffer, in records
    pub max_objects: usize,
    /// Capacity of the per-frame bone buffer, in matrices
    pub max_bones: usize,
    /// Fence wait timeout in milliseconds
    pub fence_timeout_ms: u64,
    /// Presentation image acquire timeout in milliseconds
    pub acquire_timeout_ms: u64,
    /// Near clip distance for eye projections
    pub near_plane: f32,
    /// Far clip distance for eye projections
    pub far_plane: f32,
    /// Clear color for eye passes
    pub clear_color: [f32; 4],
    /// Shadow map size
    pub shadow_map_extent: Extent2D,
    /// Per-eye render target size
    pub eye_extent: Extent2D,
    /// Desktop mirror size
    pub mirror_extent: Extent2D,
    /// Frames between FPS log lines
    pub stats_interval: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            max_objects: 10_000,
            max_bones: 100,
            fence_timeout_ms: 1000,
            acquire_timeout_ms: 1000,
            near_plane: 0.05,
            far_plane: 100.0,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shadow_map_extent: Extent2D::new(2048, 2048),
            eye_extent: Extent2D::new(1832, 1920),
            mirror_extent: Extent2D::new(916, 960),
            stats_interval: 20,
        }
    }
}

impl RendererConfig {
    /// Set the ring depth
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the per-frame object and bone capacities
    pub fn with_capacities(mut self, max_objects: usize, max_bones: usize) -> Self {
        self.max_objects = max_objects;
        self.max_bones = max_bones;
        self
    }

    /// Fence wait timeout
    pub fn fence_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.fence_timeout_ms)
    }

    /// Acquire timeout
    pub fn acquire_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }

        if self.max_objects == 0 || self.max_bones == 0 {
            return Err(ConfigError::Invalid(
                "buffer capacities must be non-zero".to_string(),
            ));
        }

        for (name, extent) in [
            ("shadow_map_extent", self.shadow_map_extent),
            ("eye_extent", self.eye_extent),
            ("mirror_extent", self.mirror_extent),
        ] {
            if extent.width == 0 || extent.height == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }

        if self.far_plane <= self.near_plane {
            return Err(ConfigError::Invalid(format!(
                "far_plane ({}) must exceed near_plane ({})",
                self.far_plane, self.near_plane
            )));
        }

        Ok(())
    }
}

impl Config for RendererConfig {}

/// # Headless Device Configuration
///
/// Tunes the in-memory device used for tests and the mirror demo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    /// Simulated GPU time per queue submission, in microseconds
    pub gpu_latency_us: u64,
    /// Number of presentation images
    pub swapchain_images: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            gpu_latency_us: 4000,
            swapchain_images: 3,
        }
    }
}

impl HeadlessConfig {
    /// Simulated GPU time per submission
    pub fn gpu_latency(&self) -> std::time::Duration {
        std::time::Duration::from_micros(self.gpu_latency_us)
    }
}

/// # Engine Configuration
///
/// Top-level configuration applications load at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Log level filter applied when `RUST_LOG` is unset
    pub log_level: String,
    /// Rendering configuration
    pub renderer: RendererConfig,
    /// Headless device configuration
    pub headless: HeadlessConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            renderer: RendererConfig::default(),
            headless: HeadlessConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parsed log level, falling back to `Info` for unknown names
    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.renderer.validate()?;
        if self.headless.swapchain_images == 0 {
            return Err(ConfigError::Invalid(
                "swapchain_images must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config for EngineConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!(config.renderer.max_objects, 10_000);
        assert_eq!(config.renderer.max_bones, 100);
        assert_eq!(config.renderer.stats_interval, 20);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let text = r#"
            log_level = "debug"

            [renderer]
            frames_in_flight = 3
            max_objects = 64
        "#;
        let config = EngineConfig::parse(text, ConfigFormat::Toml).unwrap();

        assert_eq!(config.log_level_filter(), log::LevelFilter::Debug);
        assert_eq!(config.renderer.frames_in_flight, 3);
        assert_eq!(config.renderer.max_objects, 64);
        assert_eq!(config.renderer.max_bones, 100);
        assert_eq!(config.headless, HeadlessConfig::default());
    }

    #[test]
    fn test_ron_text_parses() {
        let text = "(renderer: (frames_in_flight: 4, eye_extent: (width: 640, height: 480)))";
        let config = EngineConfig::parse(text, ConfigFormat::Ron).unwrap();

        assert_eq!(config.renderer.frames_in_flight, 4);
        assert_eq!(config.renderer.eye_extent, Extent2D::new(640, 480));
    }

    #[test]
    fn test_toml_output_reparses() {
        let mut config = EngineConfig::default();
        config.renderer.far_plane = 250.0;

        let text = config.to_config_string(ConfigFormat::Toml).unwrap();
        let parsed = EngineConfig::parse(&text, ConfigFormat::Toml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero_ring = RendererConfig::default().with_frames_in_flight(0);
        assert!(matches!(zero_ring.validate(), Err(ConfigError::Invalid(_))));

        let zero_objects = RendererConfig::default().with_capacities(0, 10);
        assert!(zero_objects.validate().is_err());

        let mut inverted = RendererConfig::default();
        inverted.far_plane = inverted.near_plane;
        assert!(inverted.validate().is_err());

        let mut empty_eye = RendererConfig::default();
        empty_eye.eye_extent = Extent2D::new(0, 1080);
        assert!(empty_eye.validate().is_err());
    }

    #[test]
    fn test_unknown_log_level_falls_back_to_info() {
        let config = EngineConfig {
            log_level: "loud".to_string(),
            ..EngineConfig::default()
        };
        assert_eq!(config.log_level_filter(), log::LevelFilter::Info);
    }
}
