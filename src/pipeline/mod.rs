//! Declarative pipeline state and the bind group layouts shared by passes.

mod geometry;
mod layouts;

pub use geometry::*;
pub use layouts::*;

use crate::backend::types::*;

/// Format of the forward image and the ping-pong post-process images.
pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
/// Format of the viewport depth image and the shadow cascades.
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;
/// Format of the fill mask.
pub const MASK_FORMAT: TextureFormat = TextureFormat::R8Unorm;

/// Size of the per-draw matrix push constant.
pub const DRAW_CONSTANTS_SIZE: u32 = 64;

/// Builds a [`PipelineState`] one concern at a time.
///
/// Defaults: triangle list, counter-clockwise front faces, back-face
/// culling, no depth test, no colour targets, no vertex buffers.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    state: PipelineState,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            state: PipelineState {
                primitive: PrimitiveState::default(),
                depth_stencil: None,
                color_targets: Vec::new(),
                vertex_layouts: Vec::new(),
            },
        }
    }

    pub fn vertex_layout(mut self, layout: VertexBufferLayout) -> Self {
        self.state.vertex_layouts.push(layout);
        self
    }

    pub fn cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.state.primitive.cull_mode = cull_mode;
        self
    }

    /// Add an opaque colour target writing all channels.
    pub fn color_target(mut self, format: TextureFormat) -> Self {
        self.state.color_targets.push(ColorTargetState {
            format,
            blend: None,
            write_mask: ColorWrites::ALL,
        });
        self
    }

    /// Add a colour target with standard alpha blending.
    pub fn blended_color_target(mut self, format: TextureFormat) -> Self {
        self.state.color_targets.push(ColorTargetState {
            format,
            blend: Some(BlendState::alpha_blending()),
            write_mask: ColorWrites::ALL,
        });
        self
    }

    pub fn depth(mut self, format: TextureFormat, write: bool, compare: CompareFunction) -> Self {
        self.state.depth_stencil = Some(DepthStencilState {
            format,
            depth_write_enabled: write,
            depth_compare: compare,
            depth_bias: 0,
            depth_bias_slope_scale: 0,
        });
        self
    }

    /// Set a depth bias. Has no effect without a depth attachment.
    pub fn depth_bias(mut self, constant: i32, slope_scale: u32) -> Self {
        if let Some(depth) = self.state.depth_stencil.as_mut() {
            depth.depth_bias = constant;
            depth.depth_bias_slope_scale = slope_scale;
        }
        self
    }

    pub fn build(self) -> PipelineState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = PipelineBuilder::new().build();
        assert_eq!(state.primitive, PrimitiveState::default());
        assert!(state.depth_stencil.is_none());
        assert!(state.color_targets.is_empty());
    }

    #[test]
    fn test_blended_target_and_depth_bias() {
        let state = PipelineBuilder::new()
            .blended_color_target(TextureFormat::Rgba16Float)
            .depth(TextureFormat::Depth32Float, false, CompareFunction::LessEqual)
            .depth_bias(2, 3)
            .cull_mode(CullMode::None)
            .build();
        assert_eq!(
            state.color_targets[0].blend,
            Some(BlendState::alpha_blending())
        );
        let depth = state.depth_stencil.unwrap();
        assert!(!depth.depth_write_enabled);
        assert_eq!((depth.depth_bias, depth.depth_bias_slope_scale), (2, 3));
        assert_eq!(state.primitive.cull_mode, CullMode::None);
    }

    #[test]
    fn test_depth_bias_without_depth_is_ignored() {
        let state = PipelineBuilder::new().depth_bias(4, 4).build();
        assert!(state.depth_stencil.is_none());
    }
}
