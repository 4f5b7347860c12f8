//! Frame integration tests.
//!
//! These tests record whole frames through the public renderer API against
//! the recording dummy device and check what reached the "GPU": render pass
//! order, draw and dispatch counts, image fingerprints and presentation.
//!
//! # Test Categories
//!
//! - **End-to-end frames**: full frames with and without scene content
//! - **Shadows**: cascade recording for every kind of light
//! - **Materials**: pipeline variant reuse and alpha handling
//! - **Post-processing**: ping-pong chains and the fill mask
//! - **Environments**: IBL baking determinism and the skybox
//! - **Frames in flight**: slot reuse and device stalls

mod common;

use std::time::Duration;

use glam::{Mat4, Vec3};
use rstest::rstest;

use common::{checker, look_at, sky, small_config, sun, Scene};
use tiled_render_core::backend::dummy::Command;
use tiled_render_core::viewport::ColorSource;
use tiled_render_core::{
    AlphaMode, DummyDevice, Light, MaterialDesc, MeshDesc, PostProcessChain, PostStep,
    RenderError, RendererConfig, TextureSlot,
};

// ============================================================================
// End-to-end frames
// ============================================================================

/// One opaque mesh lit by one shadow-casting sun through an identity camera.
#[test]
fn test_frame_with_mesh_and_shadow_light() {
    let mut scene = Scene::new(64, 48);
    let light = sun();

    let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
    frame
        .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
        .unwrap();
    frame.begin_depth_pass().unwrap();
    frame
        .draw_depth(&scene.cube, &scene.material, Mat4::IDENTITY)
        .unwrap();
    frame.end_depth_pass().unwrap();
    frame.begin_shadow_pass(Some(&light)).unwrap();
    frame
        .draw_shadow(&scene.cube, &scene.material, Mat4::IDENTITY)
        .unwrap();
    frame.end_shadow_pass().unwrap();
    frame.begin_light_pass().unwrap();
    frame.draw_light(&light).unwrap();
    frame.end_light_pass().unwrap();
    frame.begin_forward_pass().unwrap();
    frame
        .draw_forward(&scene.cube, &scene.material, Mat4::IDENTITY)
        .unwrap();
    frame.end_forward_pass().unwrap();
    frame.present().unwrap();
    let stats = frame.end().unwrap();
    scene.renderer.swap_buffers().unwrap();

    assert_eq!(
        scene.pass_labels(),
        [
            "depth",
            "shadow cascade 0",
            "shadow cascade 1",
            "shadow cascade 2",
            "shadow cascade 3",
            "forward",
            "fill",
            "present",
        ]
    );
    assert_eq!(scene.draws_in("depth"), 1);
    assert_eq!(scene.draws_in("forward"), 1);
    assert_eq!(scene.last_submission().dispatches(), vec![(4, 3, 1)]);
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.passes, 8);
    assert_eq!(scene.renderer.last_stats(), stats);
    assert_eq!(scene.renderer.lights_culled(), 1);
    assert_eq!(scene.renderer.device().presents().len(), 1);
    scene.assert_no_validation_errors();

    // The camera buffer carries the cascade matrices of this frame.
    let block = *scene.viewport.camera_block().unwrap();
    assert!(block.cascades[..4].iter().all(|m| *m != Mat4::ZERO));
    let uploaded = scene
        .renderer
        .device()
        .buffer_contents(scene.viewport.camera_buffer())
        .unwrap();
    assert_eq!(uploaded, bytemuck::bytes_of(&block));
}

/// A mesh without an index array goes through every geometry pass with
/// plain vertex draws.
#[test]
fn test_unindexed_triangle_through_every_pass() {
    let mut scene = Scene::new(32, 32);
    let triangle = scene
        .renderer
        .make_mesh(&MeshDesc {
            label: "triangle".into(),
            positions: vec![[-1.0, -1.0, 0.5], [1.0, -1.0, 0.5], [0.0, 1.0, 0.5]],
            ..Default::default()
        })
        .unwrap();
    let light = sun();

    let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
    frame
        .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
        .unwrap();
    frame.begin_depth_pass().unwrap();
    frame
        .draw_depth(&triangle, &scene.material, Mat4::IDENTITY)
        .unwrap();
    frame.end_depth_pass().unwrap();
    frame.begin_shadow_pass(Some(&light)).unwrap();
    frame
        .draw_shadow(&triangle, &scene.material, Mat4::IDENTITY)
        .unwrap();
    frame.end_shadow_pass().unwrap();
    frame.begin_forward_pass().unwrap();
    frame
        .draw_forward(&triangle, &scene.material, Mat4::IDENTITY)
        .unwrap();
    frame.end().unwrap();

    assert_eq!(scene.draws_in("depth"), 1);
    assert_eq!(scene.draws_in("forward"), 1);
    let shadow_draws: usize = scene
        .last_submission()
        .render_passes()
        .into_iter()
        .filter(|p| p.label.starts_with("shadow cascade"))
        .map(|p| p.draws)
        .sum();
    assert_eq!(shadow_draws, 4);

    let commands = &scene.last_submission().commands;
    let plain_draws = commands
        .iter()
        .filter(|c| matches!(c, Command::Draw { vertices, .. } if *vertices == (0..3)))
        .count();
    assert_eq!(plain_draws, 6);
    assert!(!commands
        .iter()
        .any(|c| matches!(c, Command::DrawIndexed { .. })));
    scene.assert_no_validation_errors();
}

/// One culling group per screen tile, whatever the tile size.
#[rstest]
#[case::small_tiles(8, (8, 8))]
#[case::default_tiles(16, (4, 4))]
#[case::large_tiles(32, (2, 2))]
#[case::uneven_tiles(24, (3, 3))]
fn test_culling_dispatch_matches_tile_grid(#[case] tile_size: u32, #[case] grid: (u32, u32)) {
    let config = RendererConfig {
        tile_size,
        ..small_config()
    };
    let mut scene = Scene::with_config(64, 64, config);

    let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
    frame
        .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
        .unwrap();
    frame.begin_light_pass().unwrap();
    frame
        .draw_light(&Light::point(Vec3::ZERO, Vec3::ONE, 1.0, 5.0))
        .unwrap();
    frame.end_light_pass().unwrap();
    frame.end().unwrap();

    assert_eq!(scene.viewport.tile_grid(), grid);
    assert_eq!(
        scene.last_submission().dispatches(),
        vec![(grid.0, grid.1, 1)]
    );
    scene.assert_no_validation_errors();
}

/// No lights and no geometry still run every pass and present a cleared
/// image.
#[rstest]
#[case::black([0.0, 0.0, 0.0, 1.0])]
#[case::blue([0.1, 0.2, 0.6, 1.0])]
fn test_empty_frame_yields_cleared_image(#[case] clear_color: [f32; 4]) {
    let config = RendererConfig {
        clear_color,
        ..small_config()
    };
    let mut scene = Scene::with_config(32, 32, config);

    let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
    frame
        .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
        .unwrap();
    frame.present().unwrap();
    let stats = frame.end().unwrap();
    scene.renderer.swap_buffers().unwrap();

    let device = scene.renderer.device();
    assert_eq!(
        device.subresource_fingerprint(scene.viewport.forward().handle(), 0, 0),
        Some(DummyDevice::cleared_fingerprint(clear_color))
    );
    assert_eq!(stats.dispatches, 1);
    // Only the present blit draws.
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(device.presents().len(), 1);
    assert_eq!(scene.renderer.lights_culled(), 0);
    scene.assert_no_validation_errors();
}

/// Frames that never present still submit and rotate slots.
#[test]
fn test_offscreen_frames() {
    let mut scene = Scene::new(32, 32);
    for _ in 0..5 {
        let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
        frame
            .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
            .unwrap();
        frame.end().unwrap();
    }
    scene.renderer.swap_buffers().unwrap();
    assert_eq!(scene.renderer.device().submissions().len(), 5);
    assert!(scene.renderer.device().presents().is_empty());
    scene.renderer.flush().unwrap();
    scene.assert_no_validation_errors();
}

#[test]
fn test_frame_without_camera_is_rejected() {
    let mut scene = Scene::new(32, 32);
    let frame = scene.renderer.begin(&mut scene.viewport).unwrap();
    assert!(matches!(frame.end(), Err(RenderError::InvalidState(_))));

    // The slot was still submitted, so the next frame starts normally.
    let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
    frame
        .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
        .unwrap();
    frame.end().unwrap();
}

#[test]
fn test_camera_carries_previous_frame() {
    let mut scene = Scene::new(32, 32);
    let first = look_at(Vec3::new(0.0, 2.0, 5.0));
    let second = look_at(Vec3::new(1.0, 2.0, 5.0));

    for (projection, view, world) in [first, second] {
        let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
        frame.set_camera(projection, view, world, None).unwrap();
        frame.end().unwrap();
    }

    let block = scene.viewport.camera_block().unwrap();
    assert_eq!(block.prev_view_proj, first.0 * first.1);
    assert_eq!(block.view_proj(), second.0 * second.1);
    assert!((block.eye() - Vec3::new(1.0, 2.0, 5.0)).length() < 1e-4);
}

// ============================================================================
// Shadows
// ============================================================================

/// Every frame records all four cascades, whatever the light.
#[rstest]
#[case::shadow_sun(Some(sun()), 4)]
#[case::sun_without_shadows(Some(Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0, false)), 0)]
#[case::point_light(Some(Light::point(Vec3::ZERO, Vec3::ONE, 1.0, 5.0)), 0)]
#[case::no_light(None, 0)]
fn test_four_cascades_per_frame(#[case] light: Option<Light>, #[case] shadow_draws: usize) {
    let mut scene = Scene::new(32, 32);

    let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
    frame
        .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
        .unwrap();
    frame.begin_shadow_pass(light.as_ref()).unwrap();
    frame
        .draw_shadow(&scene.cube, &scene.material, Mat4::IDENTITY)
        .unwrap();
    frame.end().unwrap();

    let cascades: Vec<_> = scene
        .last_submission()
        .render_passes()
        .into_iter()
        .filter(|p| p.label.starts_with("shadow cascade"))
        .collect();
    assert_eq!(cascades.len(), 4);
    assert_eq!(cascades.iter().map(|p| p.draws).sum::<usize>(), shadow_draws);
    assert_eq!(scene.renderer.shadows().has_light(), shadow_draws > 0);
    scene.assert_no_validation_errors();
}

/// Skipping the shadow pass still clears the cascades.
#[test]
fn test_skipped_shadow_pass_runs_empty() {
    let mut scene = Scene::new(32, 32);
    let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
    frame
        .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
        .unwrap();
    frame.begin_forward_pass().unwrap();
    frame
        .draw_forward(&scene.cube, &scene.material, Mat4::IDENTITY)
        .unwrap();
    frame.end().unwrap();

    let labels = scene.pass_labels();
    assert_eq!(labels.iter().filter(|l| l.starts_with("shadow")).count(), 4);
    assert_eq!(labels.first().map(String::as_str), Some("depth"));
    assert_eq!(scene.draws_in("forward"), 1);
    scene.assert_no_validation_errors();
}

// ============================================================================
// Materials
// ============================================================================

#[test]
fn test_materials_share_pipeline_variants() {
    let mut scene = Scene::new(32, 32);
    let map = checker(&mut scene.renderer);
    let renderer = &mut scene.renderer;
    let red = renderer
        .make_material(&MaterialDesc::new("red").with_roughness(0.2))
        .unwrap();
    let textured = renderer
        .make_material(&MaterialDesc::new("textured").with_texture(TextureSlot::Albedo, map))
        .unwrap();
    let glass = renderer
        .make_material(&MaterialDesc::new("glass").with_alpha_mode(AlphaMode::Blend))
        .unwrap();
    assert_eq!(red.signature(), scene.material.signature());
    assert_ne!(textured.signature(), red.signature());

    let materials = [&scene.material, &red, &textured, &glass];
    let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
    frame
        .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
        .unwrap();
    frame.begin_depth_pass().unwrap();
    for material in materials {
        frame.draw_depth(&scene.cube, material, Mat4::IDENTITY).unwrap();
    }
    frame.begin_forward_pass().unwrap();
    for material in materials {
        frame
            .draw_forward(&scene.cube, material, Mat4::IDENTITY)
            .unwrap();
    }
    frame.end().unwrap();

    // Translucent geometry does not write depth.
    assert_eq!(scene.draws_in("depth"), 3);
    assert_eq!(scene.draws_in("forward"), 4);

    let variants = scene.renderer.variants();
    assert_eq!(variants.len(), 3);
    assert_eq!(variants.stats().hits, 1);
    assert_eq!(variants.stats().misses, 3);
    scene.assert_no_validation_errors();
}

/// Variants compiled in one frame are reused by the next.
#[test]
fn test_variants_survive_frames() {
    let mut scene = Scene::new(32, 32);
    for _ in 0..3 {
        let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
        frame
            .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
            .unwrap();
        frame.begin_forward_pass().unwrap();
        frame
            .draw_forward(&scene.cube, &scene.material, Mat4::IDENTITY)
            .unwrap();
        frame.end().unwrap();
    }
    assert_eq!(scene.renderer.variants().len(), 1);
    assert_eq!(scene.renderer.variants().stats().hits, 2);
}

// ============================================================================
// Post-processing
// ============================================================================

#[rstest]
#[case::none(vec![], ColorSource::Forward)]
#[case::one(vec![PostStep::Fxaa], ColorSource::Ping(0))]
#[case::two(vec![PostStep::Ssao, PostStep::Blur { strength: 2 }], ColorSource::Ping(1))]
#[case::three(
    vec![PostStep::Ssao, PostStep::Sharpen { strength: 0.5 }, PostStep::MotionBlur],
    ColorSource::Ping(0)
)]
fn test_post_chain_ping_pongs(#[case] steps: Vec<PostStep>, #[case] expected: ColorSource) {
    let mut scene = Scene::new(32, 32);
    let chain: PostProcessChain = steps.iter().copied().collect();

    let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
    frame
        .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
        .unwrap();
    frame.run_post_chain(&chain).unwrap();
    assert_eq!(frame.viewport().current_source(), expected);
    frame.present().unwrap();
    frame.end().unwrap();
    scene.renderer.swap_buffers().unwrap();

    let post: Vec<_> = scene
        .pass_labels()
        .into_iter()
        .filter(|l| l.starts_with("post "))
        .collect();
    let names: Vec<_> = steps.iter().map(|s| format!("post {}", s.name())).collect();
    assert_eq!(post, names);
    scene.assert_no_validation_errors();
}

/// The outline step reads the fill mask written by the fill pass.
#[test]
fn test_fill_mask_feeds_outline() {
    let mut scene = Scene::new(32, 32);
    let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
    frame
        .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
        .unwrap();
    frame.begin_forward_pass().unwrap();
    frame
        .draw_forward(&scene.cube, &scene.material, Mat4::IDENTITY)
        .unwrap();
    frame.begin_fill_pass().unwrap();
    frame.draw_fill(&scene.cube, Mat4::IDENTITY).unwrap();
    frame.end_fill_pass().unwrap();
    frame.begin_post_pass().unwrap();
    frame.draw_post(PostStep::Outline).unwrap();
    frame.end_post_pass().unwrap();
    frame.end().unwrap();

    assert_eq!(scene.draws_in("fill"), 1);
    assert_eq!(scene.draws_in("post outline"), 1);
    let device = scene.renderer.device();
    assert_ne!(
        device.subresource_fingerprint(scene.viewport.fill().handle(), 0, 0),
        Some(DummyDevice::cleared_fingerprint([0.0; 4]))
    );
    scene.assert_no_validation_errors();
}

// ============================================================================
// Environments
// ============================================================================

#[test]
fn test_baking_is_deterministic() {
    let mut scene = Scene::new(32, 32);
    let first = sky(&mut scene.renderer, 180);
    let second = sky(&mut scene.renderer, 180);
    let other = sky(&mut scene.renderer, 20);

    let a = scene.renderer.make_environment(first).unwrap();
    let b = scene.renderer.make_environment(second).unwrap();
    let c = scene.renderer.make_environment(other).unwrap();

    let device = scene.renderer.device();
    let print = |t: &tiled_render_core::Texture| device.texture_fingerprint(t.handle()).unwrap();
    assert_eq!(print(a.irradiance()), print(b.irradiance()));
    assert_eq!(print(a.prefilter()), print(b.prefilter()));
    assert_ne!(print(a.irradiance()), print(c.irradiance()));
    assert_ne!(print(a.prefilter()), print(c.prefilter()));
    assert_eq!(a.roughness_levels(), 6);
    assert!(std::sync::Arc::ptr_eq(a.brdf_lut(), b.brdf_lut()));
}

/// An environment given to the camera lights the scene and draws the sky.
#[test]
fn test_environment_draws_skybox() {
    let mut scene = Scene::new(32, 32);
    let source = sky(&mut scene.renderer, 120);
    let environment = scene.renderer.make_environment(source).unwrap();

    let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
    frame
        .set_camera(
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            Some(&environment),
        )
        .unwrap();
    frame.end().unwrap();

    assert_eq!(scene.draws_in("forward"), 1);
    let device = scene.renderer.device();
    assert_ne!(
        device.subresource_fingerprint(scene.viewport.forward().handle(), 0, 0),
        Some(DummyDevice::cleared_fingerprint(small_config().clear_color))
    );
    scene.assert_no_validation_errors();
}

// ============================================================================
// Frames in flight
// ============================================================================

/// A GPU that stops signalling is detected when a slot comes around again.
#[test]
fn test_stalled_device_times_out() {
    let mut scene = Scene::new(32, 32);
    scene.renderer.device_mut().set_stalled(true);

    for _ in 0..3 {
        let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
        frame
            .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
            .unwrap();
        frame.end().unwrap();
    }
    match scene.renderer.begin(&mut scene.viewport) {
        Err(e) => assert_eq!(e, RenderError::FenceTimeout(Duration::from_secs(1))),
        Ok(_) => panic!("fourth frame should wait on a fence that never signals"),
    }
    scene.renderer.device_mut().set_stalled(false);
}

/// Presenting the previous frame happens at the latest when the next one
/// begins.
#[test]
fn test_pending_present_is_flushed_by_begin() {
    let mut scene = Scene::new(32, 32);
    for _ in 0..2 {
        let mut frame = scene.renderer.begin(&mut scene.viewport).unwrap();
        frame
            .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
            .unwrap();
        frame.present().unwrap();
        frame.end().unwrap();
    }
    assert_eq!(scene.renderer.device().presents().len(), 1);
    scene.renderer.swap_buffers().unwrap();

    let presents = scene.renderer.device().presents();
    assert_eq!(presents.len(), 2);
    assert_eq!(presents[0].image_index, 0);
    assert_eq!(presents[1].image_index, 1);
    scene.assert_no_validation_errors();
}
