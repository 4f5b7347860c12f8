//! Shared setup for the frame integration tests.
//!
//! Every test drives a full [`Renderer`] over the recording [`DummyDevice`],
//! so no GPU is needed.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use tiled_render_core::backend::dummy::Submission;
use tiled_render_core::backend::TextureFormat;
use tiled_render_core::{
    DummyDevice, Light, Material, MaterialDesc, Mesh, MeshDesc, Renderer, RendererConfig, Texture,
    TextureDesc, TextureKind, Viewport, ViewportDesc,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Default configuration with small bake and shadow targets.
pub fn small_config() -> RendererConfig {
    RendererConfig {
        shadow_map_size: 256,
        irradiance_size: 8,
        prefilter_size: 32,
        prefilter_mip_levels: 6,
        brdf_lut_size: 16,
        ..Default::default()
    }
}

/// A renderer, one viewport, a cube and an opaque material.
pub struct Scene {
    pub renderer: Renderer<DummyDevice>,
    pub viewport: Viewport,
    pub cube: Mesh,
    pub material: Material,
}

impl Scene {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_config(width, height, small_config())
    }

    pub fn with_config(width: u32, height: u32, config: RendererConfig) -> Self {
        init_logging();
        let device = DummyDevice::with_surface(width, height);
        let mut renderer = Renderer::new(device, config).expect("renderer");
        let viewport = renderer
            .make_viewport(&ViewportDesc { width, height })
            .expect("viewport");
        let cube = renderer.make_mesh(&MeshDesc::cube()).expect("cube");
        let material = renderer
            .make_material(&MaterialDesc::new("grey"))
            .expect("material");
        renderer.device_mut().clear_submissions();
        Self {
            renderer,
            viewport,
            cube,
            material,
        }
    }

    /// The submission of the last ended frame.
    pub fn last_submission(&self) -> &Submission {
        self.renderer
            .device()
            .submissions()
            .last()
            .expect("no frame was submitted")
    }

    /// Labels of the render passes of the last frame.
    pub fn pass_labels(&self) -> Vec<String> {
        self.last_submission()
            .render_passes()
            .into_iter()
            .map(|p| p.label)
            .collect()
    }

    /// Draws recorded in every pass labelled `label` in the last frame.
    pub fn draws_in(&self, label: &str) -> usize {
        self.last_submission()
            .render_passes()
            .iter()
            .filter(|p| p.label == label)
            .map(|p| p.draws)
            .sum()
    }

    pub fn assert_no_validation_errors(&self) {
        let errors = self.renderer.device().validation_errors();
        assert!(errors.is_empty(), "validation errors: {errors:#?}");
    }
}

/// A sun that casts shadows.
pub fn sun() -> Light {
    Light::directional(Vec3::new(-0.3, -1.0, -0.2), Vec3::ONE, 3.0, true)
}

/// A uniformly coloured cubemap.
pub fn sky(renderer: &mut Renderer<DummyDevice>, value: u8) -> Arc<Texture> {
    let data = vec![value; 4 * 4 * 4 * 6];
    Arc::new(
        renderer
            .make_texture(&TextureDesc {
                label: "sky",
                width: 4,
                height: 4,
                format: TextureFormat::Rgba8Unorm,
                kind: TextureKind::Cube,
                data: Some(&data),
            })
            .expect("sky"),
    )
}

/// A 2x2 map for material slots.
pub fn checker(renderer: &mut Renderer<DummyDevice>) -> Arc<Texture> {
    let data: Vec<u8> = [[255, 255, 255, 255], [0, 0, 0, 255]]
        .iter()
        .cycle()
        .take(4)
        .flatten()
        .copied()
        .collect();
    Arc::new(
        renderer
            .make_texture(&TextureDesc {
                label: "checker",
                width: 2,
                height: 2,
                format: TextureFormat::Rgba8Unorm,
                kind: TextureKind::Flat,
                data: Some(&data),
            })
            .expect("checker"),
    )
}

/// Camera at `eye` looking at the origin.
pub fn look_at(eye: Vec3) -> (Mat4, Mat4, Mat4) {
    let projection = Mat4::perspective_rh(60f32.to_radians(), 4.0 / 3.0, 0.1, 100.0);
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
    (projection, view, view.inverse())
}
