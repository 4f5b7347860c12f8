//! Per-frame camera uniform block.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Capacity of the cascade matrix array in [`CameraBlock`]. The renderer's
/// cascade count may be lower; shaders only read the first
/// `CASCADE_COUNT` entries.
pub const MAX_CASCADES: usize = 8;

/// Camera uniform data for GPU.
///
/// Written once per frame by `set_camera`, then again after the shadow pass
/// fills in the cascade matrices.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraBlock {
    pub projection: Mat4,
    pub view: Mat4,
    /// `inverse(projection * view)`
    pub inv_view_proj: Mat4,
    /// `projection * view` of the previous frame, for motion vectors.
    pub prev_view_proj: Mat4,
    /// Light `projection * view` of each shadow cascade.
    pub cascades: [Mat4; MAX_CASCADES],
    /// xyz = camera world position, w = 1
    pub position: Vec4,
    /// xy = viewport size in pixels, zw = reciprocal
    pub viewport: Vec4,
}

impl CameraBlock {
    /// Byte offset of the cascade matrices, for partial updates.
    pub const CASCADES_OFFSET: u64 = 4 * std::mem::size_of::<Mat4>() as u64;

    /// Build the block from the camera matrices.
    ///
    /// `world` is the camera's world transform; its translation is the eye
    /// position. With no previous frame the current `projection * view` is
    /// used, so the first frame has zero motion.
    pub fn new(
        projection: Mat4,
        view: Mat4,
        world: Mat4,
        prev_view_proj: Option<Mat4>,
        viewport: (u32, u32),
    ) -> Self {
        let view_proj = projection * view;
        let (width, height) = (viewport.0.max(1) as f32, viewport.1.max(1) as f32);
        Self {
            projection,
            view,
            inv_view_proj: view_proj.inverse(),
            prev_view_proj: prev_view_proj.unwrap_or(view_proj),
            cascades: [Mat4::ZERO; MAX_CASCADES],
            position: world.w_axis.truncate().extend(1.0),
            viewport: Vec4::new(width, height, 1.0 / width, 1.0 / height),
        }
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }

    pub fn eye(&self) -> Vec3 {
        self.position.truncate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_layout_matches_shader() {
        // 4 matrices, 8 cascades, 2 vectors
        assert_eq!(std::mem::size_of::<CameraBlock>(), 4 * 64 + 8 * 64 + 2 * 16);
        assert_eq!(CameraBlock::CASCADES_OFFSET, 256);
    }

    #[test]
    fn test_eye_comes_from_world_translation() {
        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let block = CameraBlock::new(Mat4::IDENTITY, world.inverse(), world, None, (640, 480));
        assert_eq!(block.eye(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(block.prev_view_proj, block.view_proj());
        assert_eq!(block.viewport, Vec4::new(640.0, 480.0, 1.0 / 640.0, 1.0 / 480.0));
    }
}
