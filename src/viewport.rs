//! Per-viewport render targets and the bind groups that expose them.

use glam::Mat4;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RendererConfig;
use crate::context::GpuContext;
use crate::culling::{CullingParams, TILE_HEADER_WORDS};
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{DEPTH_FORMAT, HDR_FORMAT, MASK_FORMAT};
use crate::resources::{Owned, Texture};
use crate::scene::CameraBlock;

/// Description of a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportDesc {
    pub width: u32,
    pub height: u32,
}

/// Which image holds the latest colour of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSource {
    Forward,
    Ping(usize),
}

impl ColorSource {
    /// Index into [`Viewport::post_group`].
    fn group_index(self) -> usize {
        match self {
            ColorSource::Forward => 0,
            ColorSource::Ping(i) => 1 + i,
        }
    }
}

/// Everything one view of the scene renders into.
///
/// The viewport owns its depth image, fill mask, forward image and the two
/// ping-pong images of the post-process chain, plus the camera block, tile
/// lists and culling parameters. Its size is fixed at creation.
#[derive(Debug)]
pub struct Viewport {
    width: u32,
    height: u32,
    tile_grid: (u32, u32),
    tile_stride: u32,

    depth: Texture,
    fill: Texture,
    forward: Texture,
    ping: [Texture; 2],

    camera: Owned<BufferHandle>,
    culling_params: Owned<BufferHandle>,
    tiles: Owned<BufferHandle>,

    camera_group: Owned<BindGroupHandle>,
    view_group: Owned<BindGroupHandle>,
    culling_group: Owned<BindGroupHandle>,
    /// Post-process input groups reading forward, ping 0 and ping 1.
    post_groups: [Owned<BindGroupHandle>; 3],

    current_read: Option<usize>,
    camera_block: Option<CameraBlock>,
    prev_view_proj: Option<Mat4>,
}

impl Viewport {
    /// Create the viewport's images and buffers.
    ///
    /// `lights` and `shadow_map` are shared with every other viewport of the
    /// renderer.
    pub(crate) fn new<D: RenderDevice>(
        ctx: &mut GpuContext<D>,
        config: &RendererConfig,
        desc: &ViewportDesc,
        lights: BufferHandle,
        shadow_map: TextureViewHandle,
    ) -> RenderResult<Self> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::resource("viewport", "zero-sized viewport"));
        }
        let (width, height) = (desc.width, desc.height);
        let tile_grid = config.tile_grid(width, height);
        let tile_stride = TILE_HEADER_WORDS + config.max_lights_per_tile;
        log::debug!(
            "Creating {width}x{height} viewport with {}x{} light tiles",
            tile_grid.0,
            tile_grid.1
        );

        let mut target = |label: &str, format: TextureFormat| {
            Texture::create_target(
                ctx,
                &TextureDescriptor::render_target(label, width, height, format),
                TextureViewDimension::D2,
            )
        };
        let depth = target("viewport depth", DEPTH_FORMAT)?;
        let fill = target("fill mask", MASK_FORMAT)?;
        let forward = target("forward", HDR_FORMAT)?;
        let ping = [target("post ping 0", HDR_FORMAT)?, target("post ping 1", HDR_FORMAT)?];

        let mut buffer = |label: &str, size: u64, usage: BufferUsage| {
            let handle = ctx.device_mut().create_buffer(&BufferDescriptor {
                label: Some(label.to_string()),
                size,
                usage,
            })?;
            RenderResult::Ok(ctx.own(handle))
        };
        let camera = buffer(
            "camera",
            std::mem::size_of::<CameraBlock>() as u64,
            BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        )?;
        let culling_params = buffer(
            "culling params",
            std::mem::size_of::<CullingParams>() as u64,
            BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        )?;
        let tile_count = u64::from(tile_grid.0) * u64::from(tile_grid.1);
        let tiles = buffer(
            "tile light lists",
            tile_count * u64::from(tile_stride) * 4,
            BufferUsage::STORAGE,
        )?;

        let layouts = ctx.layouts();
        let (camera_layout, view_layout, culling_layout, post_layout) = (
            layouts.camera.handle(),
            layouts.view.handle(),
            layouts.culling.handle(),
            layouts.post.handle(),
        );
        let samplers = ctx.samplers();
        let (shadow_sampler, linear_clamp) =
            (samplers.shadow.handle(), samplers.linear_clamp.handle());

        let mut group = |layout: BindGroupLayoutHandle, entries: &[BindGroupEntry]| {
            let handle = ctx.device_mut().create_bind_group(layout, entries)?;
            RenderResult::Ok(ctx.own(handle))
        };
        let camera_group = group(camera_layout, &[BindGroupEntry::buffer(0, camera.handle())])?;
        let view_group = group(
            view_layout,
            &[
                BindGroupEntry::buffer(0, camera.handle()),
                BindGroupEntry::buffer(1, lights),
                BindGroupEntry::buffer(2, tiles.handle()),
                BindGroupEntry::buffer(3, culling_params.handle()),
                BindGroupEntry::texture(4, shadow_map),
                BindGroupEntry::sampler(5, shadow_sampler),
            ],
        )?;
        let culling_group = group(
            culling_layout,
            &[
                BindGroupEntry::buffer(0, camera.handle()),
                BindGroupEntry::buffer(1, culling_params.handle()),
                BindGroupEntry::buffer(2, lights),
                BindGroupEntry::buffer(3, tiles.handle()),
                BindGroupEntry::texture(4, depth.view()),
            ],
        )?;
        let mut post = |source: &Texture| {
            group(
                post_layout,
                &[
                    BindGroupEntry::texture(0, source.view()),
                    BindGroupEntry::sampler(1, linear_clamp),
                    BindGroupEntry::texture(2, depth.view()),
                    BindGroupEntry::texture(3, fill.view()),
                    BindGroupEntry::buffer(4, camera.handle()),
                ],
            )
        };
        let post_groups = [post(&forward)?, post(&ping[0])?, post(&ping[1])?];

        Ok(Self {
            width,
            height,
            tile_grid,
            tile_stride,
            depth,
            fill,
            forward,
            ping,
            camera,
            culling_params,
            tiles,
            camera_group,
            view_group,
            culling_group,
            post_groups,
            current_read: None,
            camera_block: None,
            prev_view_proj: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of light tiles along x and y.
    pub fn tile_grid(&self) -> (u32, u32) {
        self.tile_grid
    }

    /// Words per tile in the tile list buffer: a 4-word header followed by
    /// the light indices.
    pub fn tile_stride(&self) -> u32 {
        self.tile_stride
    }

    pub fn depth(&self) -> &Texture {
        &self.depth
    }

    pub fn fill(&self) -> &Texture {
        &self.fill
    }

    pub fn forward(&self) -> &Texture {
        &self.forward
    }

    pub fn ping(&self, index: usize) -> &Texture {
        &self.ping[index]
    }

    pub fn camera_buffer(&self) -> BufferHandle {
        self.camera.handle()
    }

    pub fn culling_params_buffer(&self) -> BufferHandle {
        self.culling_params.handle()
    }

    pub fn tiles_buffer(&self) -> BufferHandle {
        self.tiles.handle()
    }

    /// Camera block only.
    pub fn camera_group(&self) -> BindGroupHandle {
        self.camera_group.handle()
    }

    /// Camera, lights, tile lists, culling parameters and shadow cascades.
    pub fn view_group(&self) -> BindGroupHandle {
        self.view_group.handle()
    }

    pub fn culling_group(&self) -> BindGroupHandle {
        self.culling_group.handle()
    }

    /// Post-process inputs reading `source`.
    pub fn post_group(&self, source: ColorSource) -> BindGroupHandle {
        self.post_groups[source.group_index()].handle()
    }

    /// The image holding the latest colour of the frame.
    pub fn current_source(&self) -> ColorSource {
        self.current_read.map_or(ColorSource::Forward, ColorSource::Ping)
    }

    pub fn source_texture(&self, source: ColorSource) -> &Texture {
        match source {
            ColorSource::Forward => &self.forward,
            ColorSource::Ping(i) => &self.ping[i],
        }
    }

    /// The ping-pong image the next post-process step writes.
    pub(crate) fn next_target(&self) -> usize {
        self.current_read.map_or(0, |i| 1 - i)
    }

    /// Make the image just written the current read image.
    pub(crate) fn flip(&mut self) {
        self.current_read = Some(self.next_target());
    }

    /// Camera block of the current frame, once `set_camera` ran.
    pub fn camera_block(&self) -> Option<&CameraBlock> {
        self.camera_block.as_ref()
    }

    /// Start a new frame: the forward image becomes the chain input again.
    pub(crate) fn reset_frame(&mut self) {
        self.current_read = None;
        self.camera_block = None;
    }

    /// Build this frame's camera block, carrying the previous frame's
    /// `projection * view`.
    pub(crate) fn update_camera(
        &mut self,
        projection: Mat4,
        view: Mat4,
        world: Mat4,
    ) -> &mut CameraBlock {
        let block = CameraBlock::new(projection, view, world, self.prev_view_proj, self.size());
        self.prev_view_proj = Some(block.view_proj());
        self.camera_block.insert(block)
    }

    /// Copy this frame's cascade matrices into the camera block.
    pub(crate) fn set_cascades(&mut self, matrices: &[Mat4]) {
        if let Some(block) = self.camera_block.as_mut() {
            let count = matrices.len().min(block.cascades.len());
            block.cascades[..count].copy_from_slice(&matrices[..count]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    fn viewport(ctx: &mut GpuContext<DummyDevice>, width: u32, height: u32) -> RenderResult<Viewport> {
        let lights = ctx
            .device_mut()
            .create_buffer(&BufferDescriptor {
                label: Some("lights".into()),
                size: 64,
                usage: BufferUsage::STORAGE,
            })
            .unwrap();
        let shadow = ctx
            .device_mut()
            .create_texture(&TextureDescriptor {
                label: Some("shadow".into()),
                layers: 4,
                dimension: TextureDimension::D2Array,
                format: DEPTH_FORMAT,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT,
                ..Default::default()
            })
            .unwrap();
        let shadow_view = ctx
            .device_mut()
            .create_texture_view(shadow, &TextureViewDescriptor::whole(TextureViewDimension::D2Array))
            .unwrap();
        Viewport::new(
            ctx,
            &RendererConfig::default(),
            &ViewportDesc { width, height },
            lights,
            shadow_view,
        )
    }

    #[test]
    fn test_viewport_allocates_tile_lists() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let viewport = viewport(&mut ctx, 100, 40).unwrap();

        assert_eq!(viewport.tile_grid(), (7, 3));
        assert_eq!(viewport.tile_stride(), 4 + 256);
        let tiles = ctx.device().buffer_contents(viewport.tiles_buffer()).unwrap();
        assert_eq!(tiles.len(), 7 * 3 * 260 * 4);
        assert_eq!(viewport.forward().format(), HDR_FORMAT);
        assert_eq!(viewport.fill().format(), MASK_FORMAT);
    }

    #[test]
    fn test_zero_sized_viewport_is_rejected() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        assert!(viewport(&mut ctx, 0, 480).is_err());
    }

    #[test]
    fn test_ping_pong_flips_after_each_step() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let mut viewport = viewport(&mut ctx, 64, 64).unwrap();

        assert_eq!(viewport.current_source(), ColorSource::Forward);
        assert_eq!(viewport.next_target(), 0);
        viewport.flip();
        assert_eq!(viewport.current_source(), ColorSource::Ping(0));
        viewport.flip();
        assert_eq!(viewport.current_source(), ColorSource::Ping(1));
        viewport.flip();
        assert_eq!(viewport.current_source(), ColorSource::Ping(0));

        viewport.reset_frame();
        assert_eq!(viewport.current_source(), ColorSource::Forward);
    }

    #[test]
    fn test_camera_carries_previous_frame() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let mut viewport = viewport(&mut ctx, 64, 64).unwrap();

        let first = Mat4::from_translation(glam::Vec3::X);
        viewport.update_camera(Mat4::IDENTITY, first, Mat4::IDENTITY);
        let block = *viewport.update_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY);
        assert_eq!(block.prev_view_proj, first);
        assert_eq!(block.view_proj(), Mat4::IDENTITY);
    }
}
