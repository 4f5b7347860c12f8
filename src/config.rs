//! Renderer configuration.

use std::time::Duration;

use crate::error::{RenderError, RenderResult};
use crate::scene::MAX_CASCADES;

/// Largest per-tile light list the culling shader can gather.
pub const MAX_TILE_LIGHTS: u32 = 1024;

/// Configuration for initializing the renderer.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Upper bound for the per-frame fence wait. Exceeding it means the
    /// device is lost.
    pub fence_timeout: Duration,
    /// Tile size for light culling (in pixels).
    pub tile_size: u32,
    /// Maximum number of lights submitted per frame.
    pub max_lights: u32,
    /// Capacity of each tile's light index list. Extra lights are dropped.
    pub max_lights_per_tile: u32,
    /// Number of shadow cascades.
    pub cascade_count: u32,
    /// Width and height of each cascade layer.
    pub shadow_map_size: u32,
    /// Half-extent of cascade 0; cascade `i` covers `base * 2^i`.
    pub cascade_base_extent: f32,
    /// Face size of the irradiance cubemap.
    pub irradiance_size: u32,
    /// Face size of mip 0 of the prefiltered specular cubemap.
    pub prefilter_size: u32,
    /// Roughness levels (mips) of the prefiltered specular cubemap.
    pub prefilter_mip_levels: u32,
    /// Size of the BRDF integration lookup table.
    pub brdf_lut_size: u32,
    /// Clear colour of the forward image.
    pub clear_color: [f32; 4],
    /// Enable vsync
    pub vsync: bool,
    /// Enable Vulkan validation layers.
    pub validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            fence_timeout: Duration::from_secs(1),
            tile_size: 16,
            max_lights: 1024,
            max_lights_per_tile: 256,
            cascade_count: 4,
            shadow_map_size: 2048,
            cascade_base_extent: 10.0,
            irradiance_size: 64,
            prefilter_size: 128,
            prefilter_mip_levels: 6,
            brdf_lut_size: 512,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vsync: true,
            validation: cfg!(debug_assertions),
        }
    }
}

impl RendererConfig {
    /// Reject configurations the renderer cannot honour.
    ///
    /// `max_array_layers` is the device limit for texture array layers.
    pub fn validate(&self, max_array_layers: u32) -> RenderResult<()> {
        if self.frames_in_flight == 0 {
            return Err(invalid("frames_in_flight must be at least 1"));
        }
        if self.tile_size == 0 {
            return Err(invalid("tile_size must be non-zero"));
        }
        if self.max_lights == 0 || self.max_lights_per_tile == 0 {
            return Err(invalid("light capacities must be non-zero"));
        }
        if self.max_lights_per_tile > MAX_TILE_LIGHTS {
            return Err(invalid(format!(
                "max_lights_per_tile {} exceeds {MAX_TILE_LIGHTS}",
                self.max_lights_per_tile
            )));
        }
        let max_cascades = max_array_layers.min(MAX_CASCADES as u32);
        if self.cascade_count == 0 || self.cascade_count > max_cascades {
            return Err(invalid(format!(
                "cascade_count {} outside 1..={max_cascades}",
                self.cascade_count
            )));
        }
        if !self.prefilter_size.is_power_of_two() {
            return Err(invalid("prefilter_size must be a power of two"));
        }
        if self.prefilter_mip_levels < 2 || (self.prefilter_size >> (self.prefilter_mip_levels - 1)) == 0
        {
            return Err(invalid(format!(
                "{} prefilter levels do not fit a {}px base",
                self.prefilter_mip_levels, self.prefilter_size
            )));
        }
        if self.irradiance_size == 0 || self.brdf_lut_size == 0 || self.shadow_map_size == 0 {
            return Err(invalid("texture sizes must be non-zero"));
        }
        Ok(())
    }

    /// Tile grid dimensions for a viewport of the given size.
    pub fn tile_grid(&self, width: u32, height: u32) -> (u32, u32) {
        (
            width.div_ceil(self.tile_size),
            height.div_ceil(self.tile_size),
        )
    }
}

fn invalid(message: impl Into<String>) -> RenderError {
    RenderError::InvalidConfig(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.cascade_count, 4);
        assert_eq!(config.fence_timeout, Duration::from_secs(1));
        assert!(config.validate(256).is_ok());
    }

    #[test]
    fn test_rejects_zero_frames() {
        let config = RendererConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(256),
            Err(RenderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_too_many_cascades() {
        let config = RendererConfig {
            cascade_count: 8,
            ..Default::default()
        };
        assert!(config.validate(4).is_err());
        assert!(config.validate(8).is_ok());

        // The camera block holds at most MAX_CASCADES matrices.
        let config = RendererConfig {
            cascade_count: MAX_CASCADES as u32 + 1,
            ..Default::default()
        };
        assert!(config.validate(256).is_err());
    }

    #[test]
    fn test_rejects_prefilter_chain_longer_than_base() {
        let config = RendererConfig {
            prefilter_size: 16,
            prefilter_mip_levels: 6,
            ..Default::default()
        };
        assert!(config.validate(256).is_err());
    }

    #[test]
    fn test_rejects_oversized_tile_lists() {
        let config = RendererConfig {
            max_lights_per_tile: MAX_TILE_LIGHTS + 1,
            ..Default::default()
        };
        assert!(config.validate(256).is_err());
    }

    #[test]
    fn test_tile_grid_rounds_up() {
        let config = RendererConfig::default();
        assert_eq!(config.tile_grid(1280, 720), (80, 45));
        assert_eq!(config.tile_grid(1281, 721), (81, 46));
        assert_eq!(config.tile_grid(1, 1), (1, 1));
    }
}
