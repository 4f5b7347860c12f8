//! Tiled light culling.
//!
//! The compute pass splits the viewport into square tiles, one work-group
//! each. A group reduces its tile's depth range, builds the tile frustum and
//! keeps every light whose bounding sphere is not entirely outside one of
//! the six planes. Directional lights reach every tile. Each tile's list is
//! capacity-bounded; lights past the capacity are dropped without error.
//!
//! [`tile_planes`] and [`cull_tile`] mirror `shaders/light_cull.wgsl` on the
//! host and must change together with it. The constants shared with the
//! shaders are checked against their WGSL declarations in the tests below.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec3, Vec4};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::{RendererConfig, MAX_TILE_LIGHTS};
use crate::context::GpuContext;
use crate::error::RenderResult;
use crate::pipeline::pipeline_layout;
use crate::resources::{builtin, Owned, ShaderDesc};
use crate::scene::{GpuLight, Light};
use crate::viewport::Viewport;

/// Work-group edge of the culling shader. Larger tiles are swept in steps of
/// this size.
pub const WORKGROUP_SIZE: u32 = 16;

/// Words at the start of each tile list; word 0 holds the light count.
pub const TILE_HEADER_WORDS: u32 = 4;

/// Culling parameters uniform, one per viewport.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CullingParams {
    pub tile_count: UVec2,
    pub screen_size: UVec2,
    pub tile_size: u32,
    pub light_count: u32,
    pub max_lights_per_tile: u32,
    /// Words per tile: [`TILE_HEADER_WORDS`], then the light indices.
    pub tile_stride: u32,
}

/// Owns the per-frame light buffer and the culling pipeline.
#[derive(Debug)]
pub struct LightCuller {
    pipeline: Owned<ComputePipelineHandle>,
    _layout: Owned<PipelineLayoutHandle>,
    lights: Owned<BufferHandle>,
    max_lights: u32,
    tile_size: u32,
    max_lights_per_tile: u32,
    light_count: u32,
}

impl LightCuller {
    pub fn new<D: RenderDevice>(
        ctx: &mut GpuContext<D>,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let shader = ctx.make_shader(&ShaderDesc {
            label: "light cull",
            source: builtin::LIGHT_CULL,
            defines: &[],
        })?;
        let culling = ctx.layouts().culling.handle();
        let layout = pipeline_layout(ctx, "light cull", &[culling], false)?;
        let pipeline = ctx.device_mut().create_compute_pipeline(&ComputePipelineDescriptor {
            label: "light cull",
            layout: layout.handle(),
            compute: shader.entry("cs_main"),
            constants: &SpecializationConstants::new(),
        })?;

        let lights = ctx.device_mut().create_buffer(&BufferDescriptor {
            label: Some("lights".into()),
            size: u64::from(config.max_lights) * std::mem::size_of::<GpuLight>() as u64,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
        })?;

        Ok(Self {
            pipeline: ctx.own(pipeline),
            _layout: layout,
            lights: ctx.own(lights),
            max_lights: config.max_lights,
            tile_size: config.tile_size,
            max_lights_per_tile: config.max_lights_per_tile,
            light_count: 0,
        })
    }

    /// Buffer holding this frame's lights, bound by every viewport.
    pub fn lights_buffer(&self) -> BufferHandle {
        self.lights.handle()
    }

    /// Lights uploaded for the current frame.
    pub fn light_count(&self) -> u32 {
        self.light_count
    }

    /// Record the upload of this frame's lights.
    ///
    /// Lights past the buffer capacity are dropped with a warning.
    pub fn upload<D: RenderDevice>(&mut self, device: &mut D, lights: &[Light]) {
        let count = lights.len().min(self.max_lights as usize);
        if count < lights.len() {
            log::warn!(
                "{} lights submitted, only the first {} are culled",
                lights.len(),
                self.max_lights
            );
        }
        // Earlier frames' culling and forward passes read the buffer.
        device.pipeline_barrier(&[Barrier::Buffer {
            buffer: self.lights.handle(),
            before: BufferAccess::ShaderRead,
            after: BufferAccess::TransferWrite,
        }]);
        let gpu: Vec<GpuLight> = lights[..count].iter().map(Light::to_gpu).collect();
        let bytes: &[u8] = bytemuck::cast_slice(&gpu);
        for (i, chunk) in bytes.chunks(MAX_INLINE_UPDATE).enumerate() {
            device.update_buffer(self.lights.handle(), (i * MAX_INLINE_UPDATE) as u64, chunk);
        }
        self.light_count = count as u32;
    }

    /// Culling parameters of `viewport` for the uploaded lights.
    pub fn params(&self, viewport: &Viewport) -> CullingParams {
        let (width, height) = viewport.size();
        let (tiles_x, tiles_y) = viewport.tile_grid();
        CullingParams {
            tile_count: UVec2::new(tiles_x, tiles_y),
            screen_size: UVec2::new(width, height),
            tile_size: self.tile_size,
            light_count: self.light_count,
            max_lights_per_tile: self.max_lights_per_tile,
            tile_stride: viewport.tile_stride(),
        }
    }

    /// Record the culling dispatch for `viewport`.
    ///
    /// The viewport depth must already be readable by compute. Returns the
    /// work-group counts.
    pub fn dispatch<D: RenderDevice>(&self, device: &mut D, viewport: &Viewport) -> (u32, u32) {
        let params = self.params(viewport);
        device.update_buffer(viewport.culling_params_buffer(), 0, bytemuck::bytes_of(&params));

        device.pipeline_barrier(&[
            Barrier::Buffer {
                buffer: self.lights.handle(),
                before: BufferAccess::TransferWrite,
                after: BufferAccess::ShaderRead,
            },
            Barrier::Buffer {
                buffer: viewport.culling_params_buffer(),
                before: BufferAccess::TransferWrite,
                after: BufferAccess::UniformRead,
            },
            // The previous frame's forward pass read the lists.
            Barrier::Buffer {
                buffer: viewport.tiles_buffer(),
                before: BufferAccess::ShaderRead,
                after: BufferAccess::ShaderWrite,
            },
        ]);

        // One group per tile, whatever the tile size.
        let groups = viewport.tile_grid();
        device.set_compute_pipeline(self.pipeline.handle());
        device.set_bind_group(0, viewport.culling_group());
        device.dispatch(groups.0, groups.1, 1);

        device.pipeline_barrier(&[Barrier::Buffer {
            buffer: viewport.tiles_buffer(),
            before: BufferAccess::ShaderWrite,
            after: BufferAccess::ShaderRead,
        }]);
        groups
    }
}

/// Frustum planes of tile `tile` as `ax + by + cz + d >= 0` inside.
///
/// Order: left, right, bottom, top, near (`depth_min`), far (`depth_max`).
/// Tile row 0 is the top of the screen.
pub fn tile_planes(
    view_proj: Mat4,
    tile: UVec2,
    screen_size: UVec2,
    tile_size: u32,
    depth_min: f32,
    depth_max: f32,
) -> [Vec4; 6] {
    let size = screen_size.as_vec2();
    let pixel_min = (tile * tile_size).as_vec2();
    let pixel_max = ((tile + UVec2::ONE) * tile_size).as_vec2().min(size);
    let left = pixel_min.x / size.x * 2.0 - 1.0;
    let right = pixel_max.x / size.x * 2.0 - 1.0;
    let bottom = 1.0 - pixel_max.y / size.y * 2.0;
    let top = 1.0 - pixel_min.y / size.y * 2.0;

    let rows = view_proj.transpose();
    let (r0, r1, r2, r3) = (rows.x_axis, rows.y_axis, rows.z_axis, rows.w_axis);
    [
        r0 - left * r3,
        right * r3 - r0,
        r1 - bottom * r3,
        top * r3 - r1,
        r2 - depth_min * r3,
        depth_max * r3 - r2,
    ]
}

fn sphere_outside(plane: Vec4, center: Vec3, radius: f32) -> bool {
    let len = plane.truncate().length();
    len > 0.0 && (plane.truncate().dot(center) + plane.w) / len < -radius
}

/// Indices of the lights reaching a tile, capped at `capacity`.
pub fn cull_tile(planes: &[Vec4; 6], lights: &[GpuLight], capacity: u32) -> Vec<u32> {
    let capacity = capacity.min(MAX_TILE_LIGHTS) as usize;
    lights
        .iter()
        .enumerate()
        .filter(|(_, light)| {
            light.is_directional()
                || !planes.iter().any(|plane| {
                    sphere_outside(*plane, light.position_radius.truncate(), light.position_radius.w)
                })
        })
        .map(|(i, _)| i as u32)
        .take(capacity)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;
    use crate::viewport::ViewportDesc;

    const SCREEN: UVec2 = UVec2::new(64, 64);

    fn camera() -> Mat4 {
        let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        projection * view
    }

    /// World position seen at the centre of `tile`, `distance` in front of
    /// the camera.
    fn tile_centre(view_proj: Mat4, tile: UVec2, distance: f32) -> Vec3 {
        let pixel = (tile.as_vec2() + 0.5) * 16.0;
        let ndc_x = pixel.x / SCREEN.x as f32 * 2.0 - 1.0;
        let ndc_y = 1.0 - pixel.y / SCREEN.y as f32 * 2.0;
        let far = view_proj.inverse().project_point3(Vec3::new(ndc_x, ndc_y, 1.0));
        far.normalize() * distance
    }

    fn full_depth_planes(view_proj: Mat4, tile: UVec2) -> [Vec4; 6] {
        tile_planes(view_proj, tile, SCREEN, 16, 0.0, 1.0)
    }

    #[test]
    fn test_params_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<CullingParams>(), 32);
    }

    #[test]
    fn test_light_at_tile_centre_is_included() {
        let view_proj = camera();
        let tile = UVec2::new(1, 2);
        let light = Light::point(tile_centre(view_proj, tile, 10.0), Vec3::ONE, 1.0, 1.0);

        let visible = cull_tile(&full_depth_planes(view_proj, tile), &[light.to_gpu()], 256);
        assert_eq!(visible, vec![0]);
    }

    #[test]
    fn test_disjoint_lights_are_excluded() {
        let view_proj = camera();
        let tile = UVec2::new(0, 0);
        let lights = [
            // Centre of the opposite corner tile.
            Light::point(tile_centre(view_proj, UVec2::new(3, 3), 10.0), Vec3::ONE, 1.0, 0.5),
            // Behind the camera.
            Light::point(Vec3::new(0.0, 0.0, 20.0), Vec3::ONE, 1.0, 1.0),
            // Beyond the far plane.
            Light::point(Vec3::new(0.0, 0.0, -500.0), Vec3::ONE, 1.0, 1.0),
        ];
        let gpu: Vec<GpuLight> = lights.iter().map(Light::to_gpu).collect();

        assert!(cull_tile(&full_depth_planes(view_proj, tile), &gpu, 256).is_empty());
    }

    #[test]
    fn test_depth_range_rejects_lights_in_front_of_geometry() {
        let view_proj = camera();
        let tile = UVec2::new(2, 2);
        // Geometry in this tile sits around 50 units away.
        let depth = view_proj.project_point3(Vec3::new(0.0, 0.0, -50.0)).z;
        let planes = tile_planes(view_proj, tile, SCREEN, 16, depth - 1e-4, depth);

        let near = Light::point(tile_centre(view_proj, tile, 5.0), Vec3::ONE, 1.0, 1.0);
        let at_surface = Light::point(tile_centre(view_proj, tile, 50.0), Vec3::ONE, 1.0, 3.0);
        let visible = cull_tile(&planes, &[near.to_gpu(), at_surface.to_gpu()], 256);
        assert_eq!(visible, vec![1]);
    }

    #[test]
    fn test_directional_lights_reach_every_tile() {
        let view_proj = camera();
        let sun = Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0, true).to_gpu();
        for y in 0..4 {
            for x in 0..4 {
                let planes = full_depth_planes(view_proj, UVec2::new(x, y));
                assert_eq!(cull_tile(&planes, &[sun], 256), vec![0]);
            }
        }
    }

    #[test]
    fn test_overflow_is_truncated() {
        let view_proj = camera();
        let tile = UVec2::new(1, 1);
        let light = Light::point(tile_centre(view_proj, tile, 10.0), Vec3::ONE, 1.0, 1.0).to_gpu();
        let lights = vec![light; 10];

        let visible = cull_tile(&full_depth_planes(view_proj, tile), &lights, 4);
        assert_eq!(visible, vec![0, 1, 2, 3]);
    }

    /// Record one upload and dispatch into a `width` x `height` viewport.
    fn record_culling(
        config: &RendererConfig,
        width: u32,
        height: u32,
        lights: &[Light],
    ) -> (GpuContext<DummyDevice>, LightCuller, Viewport, (u32, u32)) {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let mut culler = LightCuller::new(&mut ctx, config).unwrap();

        let shadow = ctx
            .device_mut()
            .create_texture(&TextureDescriptor {
                layers: 4,
                dimension: TextureDimension::D2Array,
                format: TextureFormat::Depth32Float,
                ..Default::default()
            })
            .unwrap();
        let shadow_view = ctx
            .device_mut()
            .create_texture_view(shadow, &TextureViewDescriptor::whole(TextureViewDimension::D2Array))
            .unwrap();
        let viewport = Viewport::new(
            &mut ctx,
            config,
            &ViewportDesc { width, height },
            culler.lights_buffer(),
            shadow_view,
        )
        .unwrap();

        let cb = ctx.device_mut().create_command_buffer().unwrap();
        ctx.device_mut().begin_commands(cb).unwrap();
        ctx.device_mut().pipeline_barrier(&[Barrier::Texture {
            texture: viewport.depth().handle(),
            range: SubresourceRange::ALL,
            before: TextureState::Undefined,
            after: TextureState::ShaderRead,
        }]);
        culler.upload(ctx.device_mut(), lights);
        let groups = culler.dispatch(ctx.device_mut(), &viewport);
        ctx.device_mut().end_commands().unwrap();
        ctx.device_mut()
            .submit(&SubmitInfo {
                command_buffer: cb,
                wait: None,
                signal: None,
                fence: None,
            })
            .unwrap();
        (ctx, culler, viewport, groups)
    }

    #[test]
    fn test_dispatch_covers_every_tile() {
        let config = RendererConfig::default();
        let lights = [Light::point(Vec3::ZERO, Vec3::ONE, 1.0, 1.0)];
        let (ctx, culler, viewport, groups) = record_culling(&config, 100, 33, &lights);

        assert_eq!(groups, (7, 3));
        let submission = &ctx.device().submissions()[0];
        assert_eq!(submission.dispatches(), vec![(7, 3, 1)]);
        assert!(ctx.device().validation_errors().is_empty());

        let params: CullingParams = bytemuck::pod_read_unaligned(
            ctx.device().buffer_contents(viewport.culling_params_buffer()).unwrap(),
        );
        assert_eq!(params.light_count, 1);
        assert_eq!(params.tile_count, UVec2::new(7, 3));
        let uploaded = ctx.device().buffer_contents(culler.lights_buffer()).unwrap();
        assert_eq!(&uploaded[..64], bytemuck::bytes_of(&lights[0].to_gpu()));
    }

    #[test]
    fn test_one_group_per_tile_for_any_tile_size() {
        for (tile_size, expected) in [(8, (13, 5)), (16, (7, 3)), (24, (5, 2)), (64, (2, 1))] {
            let config = RendererConfig {
                tile_size,
                ..Default::default()
            };
            let (ctx, _culler, viewport, groups) = record_culling(&config, 100, 33, &[]);

            assert_eq!(viewport.tile_grid(), expected, "tile size {tile_size}");
            assert_eq!(groups, expected, "tile size {tile_size}");
            assert_eq!(
                ctx.device().submissions()[0].dispatches(),
                vec![(expected.0, expected.1, 1)]
            );
            let params: CullingParams = bytemuck::pod_read_unaligned(
                ctx.device().buffer_contents(viewport.culling_params_buffer()).unwrap(),
            );
            assert_eq!(params.tile_size, tile_size);
            assert_eq!(params.tile_count, UVec2::new(expected.0, expected.1));
        }
    }

    #[test]
    fn test_shaders_share_tile_constants() {
        let declarations = [
            format!("const GROUP_SIZE: u32 = {WORKGROUP_SIZE}u;"),
            format!("@workgroup_size({WORKGROUP_SIZE}, {WORKGROUP_SIZE}, 1)"),
            format!("const MAX_TILE_LIGHTS: u32 = {MAX_TILE_LIGHTS}u;"),
            format!("var<workgroup> visible: array<u32, {MAX_TILE_LIGHTS}>;"),
            format!("const TILE_HEADER_WORDS: u32 = {TILE_HEADER_WORDS}u;"),
        ];
        for declaration in &declarations {
            assert!(
                builtin::LIGHT_CULL.contains(declaration.as_str()),
                "light_cull.wgsl lacks `{declaration}`"
            );
        }
        assert!(builtin::FORWARD.contains(&format!(
            "const TILE_HEADER_WORDS: u32 = {TILE_HEADER_WORDS}u;"
        )));
    }
}
