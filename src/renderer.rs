//! Frame orchestration.
//!
//! [`Renderer`] owns the device context and every shared pass resource.
//! [`Renderer::begin`] hands out a [`Frame`] bound to one viewport. A frame
//! walks through its passes in a fixed order:
//!
//! ```text
//! set_camera -> depth -> shadow -> light -> forward -> fill -> post -> present
//! ```
//!
//! Passes may be skipped; a skipped pass still runs, with nothing drawn, when
//! a later one begins, so every frame records the same barriers. Going back
//! to an earlier pass is an error.

use std::sync::Arc;

use glam::Mat4;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RendererConfig;
use crate::context::GpuContext;
use crate::culling::LightCuller;
use crate::error::{RenderError, RenderResult};
use crate::frame::{ActiveFrame, FrameRing, FrameStats};
use crate::ibl::{Environment, IblBaker};
use crate::material::{Material, MaterialDesc, PipelineVariantCache};
use crate::pipeline::{GeometryPipelines, DRAW_CONSTANTS_SIZE};
use crate::postprocess::{PostProcessChain, PostProcessor, PostStep};
use crate::resources::{
    Mesh, MeshDesc, Shader, ShaderData, ShaderDataDesc, ShaderDesc, Texture, TextureDesc,
};
use crate::scene::{CameraBlock, Light};
use crate::shadow::CascadedShadows;
use crate::viewport::{Viewport, ViewportDesc};

/// Tiled forward renderer.
pub struct Renderer<D: RenderDevice> {
    config: RendererConfig,
    variants: PipelineVariantCache,
    geometry: GeometryPipelines,
    culler: LightCuller,
    shadows: CascadedShadows,
    ibl: IblBaker,
    neutral: Environment,
    post: PostProcessor,
    frames: FrameRing,
    pending_present: Option<(SwapchainImage, SemaphoreHandle)>,
    last_stats: FrameStats,
    ctx: GpuContext<D>,
}

impl<D: RenderDevice> Renderer<D> {
    /// Validate `config` against the device and build every shared pass
    /// resource, including the BRDF lookup table.
    pub fn new(device: D, config: RendererConfig) -> RenderResult<Self> {
        let limits = device.limits();
        config.validate(limits.max_texture_array_layers)?;
        if limits.max_push_constant_size < DRAW_CONSTANTS_SIZE {
            return Err(RenderError::Unsupported(format!(
                "{} bytes of push constants, {DRAW_CONSTANTS_SIZE} needed",
                limits.max_push_constant_size
            )));
        }

        let mut ctx = GpuContext::new(device, config.frames_in_flight)?;
        let variants = PipelineVariantCache::new(&mut ctx, config.cascade_count)?;
        let geometry = GeometryPipelines::new(&mut ctx)?;
        let culler = LightCuller::new(&mut ctx, &config)?;
        let shadows = CascadedShadows::new(&mut ctx, &config)?;
        let ibl = IblBaker::new(&mut ctx, &config)?;
        let neutral = ibl.neutral(&mut ctx)?;
        let post = PostProcessor::new(&mut ctx)?;
        let frames = FrameRing::new(&mut ctx, config.frames_in_flight, config.fence_timeout)?;

        log::info!(
            "Renderer initialized: {} frames in flight, {} cascades, {}px tiles",
            config.frames_in_flight,
            config.cascade_count,
            config.tile_size
        );
        Ok(Self {
            config,
            variants,
            geometry,
            culler,
            shadows,
            ibl,
            neutral,
            post,
            frames,
            pending_present: None,
            last_stats: FrameStats::default(),
            ctx,
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn context(&self) -> &GpuContext<D> {
        &self.ctx
    }

    pub fn device(&self) -> &D {
        self.ctx.device()
    }

    pub fn device_mut(&mut self) -> &mut D {
        self.ctx.device_mut()
    }

    pub fn variants(&self) -> &PipelineVariantCache {
        &self.variants
    }

    pub fn shadows(&self) -> &CascadedShadows {
        &self.shadows
    }

    pub fn lights_culled(&self) -> u32 {
        self.culler.light_count()
    }

    /// Counters of the last submitted frame.
    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    pub fn make_texture(&mut self, desc: &TextureDesc<'_>) -> RenderResult<Texture> {
        self.ctx.make_texture(desc)
    }

    pub fn make_mesh(&mut self, desc: &MeshDesc) -> RenderResult<Mesh> {
        self.ctx.make_mesh(desc)
    }

    pub fn make_material(&mut self, desc: &MaterialDesc) -> RenderResult<Material> {
        self.ctx.make_material(desc)
    }

    pub fn make_shader(&mut self, desc: &ShaderDesc<'_>) -> RenderResult<Shader> {
        self.ctx.make_shader(desc)
    }

    pub fn make_shader_data(&mut self, desc: &ShaderDataDesc<'_>) -> RenderResult<ShaderData> {
        self.ctx.make_shader_data(desc)
    }

    pub fn make_viewport(&mut self, desc: &ViewportDesc) -> RenderResult<Viewport> {
        let (tiles_x, tiles_y) = self.config.tile_grid(desc.width, desc.height);
        let max_groups = self.ctx.device().limits().max_compute_workgroups_per_dimension;
        if tiles_x.max(tiles_y) > max_groups {
            return Err(RenderError::Unsupported(format!(
                "{}x{} viewport needs more than {max_groups} culling work groups per dimension",
                desc.width, desc.height
            )));
        }
        Viewport::new(
            &mut self.ctx,
            &self.config,
            desc,
            self.culler.lights_buffer(),
            self.shadows.view(),
        )
    }

    /// Bake an environment from a cubemap. Blocks until the GPU is done.
    pub fn make_environment(&mut self, source: Arc<Texture>) -> RenderResult<Environment> {
        if self.frames.is_recording() {
            return Err(RenderError::InvalidState(
                "environments cannot be baked while a frame is recording".into(),
            ));
        }
        self.ibl.bake(&mut self.ctx, source)
    }

    /// Start recording a frame into `viewport`.
    ///
    /// Presents the previous frame first if [`Renderer::swap_buffers`] was
    /// not called for it. Blocks until the frame slot is free.
    pub fn begin<'a>(&'a mut self, viewport: &'a mut Viewport) -> RenderResult<Frame<'a, D>> {
        if self.pending_present.is_some() {
            self.swap_buffers()?;
        }
        let active = self.frames.acquire(&mut self.ctx)?;
        viewport.reset_frame();
        Ok(Frame {
            renderer: self,
            viewport,
            active: Some(active),
            environment: None,
            phase: FramePhase::Begun,
            open: false,
            shadow_light: None,
            lights: Vec::new(),
            forward_pipeline: None,
            swapchain_image: None,
            stats: FrameStats::default(),
        })
    }

    /// Present the image of the last ended frame once its commands finish.
    pub fn swap_buffers(&mut self) -> RenderResult<()> {
        match self.pending_present.take() {
            Some((image, render_complete)) => {
                self.ctx.device_mut().present(&image, render_complete)
            }
            None => {
                log::debug!("swap_buffers without a presented frame");
                Ok(())
            }
        }
    }

    /// Wait for every frame in flight and release everything dropped so far.
    pub fn flush(&mut self) -> RenderResult<()> {
        if self.frames.is_recording() {
            return Err(RenderError::InvalidState(
                "flush while a frame is recording".into(),
            ));
        }
        self.frames.wait_all(self.ctx.device_mut())?;
        self.ctx.destroy_pending();
        Ok(())
    }
}

impl<D: RenderDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("Renderer dropped while the GPU was busy: {e}");
        }
    }
}

/// Passes of a frame, in recording order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FramePhase {
    Begun,
    Camera,
    Depth,
    Shadow,
    Light,
    Forward,
    Fill,
    Post,
    Present,
}

impl FramePhase {
    fn next(self) -> Self {
        match self {
            FramePhase::Begun => FramePhase::Camera,
            FramePhase::Camera => FramePhase::Depth,
            FramePhase::Depth => FramePhase::Shadow,
            FramePhase::Shadow => FramePhase::Light,
            FramePhase::Light => FramePhase::Forward,
            FramePhase::Forward => FramePhase::Fill,
            FramePhase::Fill => FramePhase::Post,
            FramePhase::Post | FramePhase::Present => FramePhase::Present,
        }
    }
}

/// One frame being recorded into a viewport.
///
/// Call [`Frame::end`] to submit. A frame dropped without `end` is submitted
/// anyway, with a warning, so its slot can be reused.
pub struct Frame<'a, D: RenderDevice> {
    renderer: &'a mut Renderer<D>,
    viewport: &'a mut Viewport,
    active: Option<ActiveFrame>,
    environment: Option<&'a Environment>,
    phase: FramePhase,
    /// Whether the pass of `phase` is still accepting draws.
    open: bool,
    shadow_light: Option<Light>,
    lights: Vec<Light>,
    forward_pipeline: Option<RenderPipelineHandle>,
    swapchain_image: Option<SwapchainImage>,
    stats: FrameStats,
}

impl<'a, D: RenderDevice> Frame<'a, D> {
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn viewport(&self) -> &Viewport {
        self.viewport
    }

    /// Counters of what was recorded so far.
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Upload the camera of this frame. Must come before any pass.
    ///
    /// `world` is the camera's world transform. With an `environment` the
    /// forward pass is lit by it and draws it as a skybox; without one a
    /// neutral environment that adds no light is bound.
    pub fn set_camera(
        &mut self,
        projection: Mat4,
        view: Mat4,
        world: Mat4,
        environment: Option<&'a Environment>,
    ) -> RenderResult<()> {
        if self.phase != FramePhase::Begun {
            return Err(RenderError::InvalidState(
                "set_camera called twice in one frame".into(),
            ));
        }
        self.environment = environment;
        let block = *self.viewport.update_camera(projection, view, world);
        let buffer = self.viewport.camera_buffer();
        let device = self.renderer.ctx.device_mut();
        device.pipeline_barrier(&[Barrier::Buffer {
            buffer,
            before: BufferAccess::UniformRead,
            after: BufferAccess::TransferWrite,
        }]);
        device.update_buffer(buffer, 0, bytemuck::bytes_of(&block));
        device.pipeline_barrier(&[Barrier::Buffer {
            buffer,
            before: BufferAccess::TransferWrite,
            after: BufferAccess::UniformRead,
        }]);
        self.phase = FramePhase::Camera;
        Ok(())
    }

    pub fn begin_depth_pass(&mut self) -> RenderResult<()> {
        self.advance(FramePhase::Depth)
    }

    /// Write the depth of an opaque draw. Other alpha modes are skipped.
    pub fn draw_depth(&mut self, mesh: &Mesh, material: &Material, world: Mat4) -> RenderResult<()> {
        self.require_open(FramePhase::Depth)?;
        if material.is_opaque() {
            let device = self.renderer.ctx.device_mut();
            device.push_constants(ShaderStages::VERTEX, 0, bytemuck::bytes_of(&world));
            mesh.geometry(mesh.lod(0)).record(device);
            self.stats.draw_calls += 1;
        }
        Ok(())
    }

    pub fn end_depth_pass(&mut self) -> RenderResult<()> {
        self.end_pass(FramePhase::Depth)
    }

    /// Start collecting shadow casters for `light`.
    ///
    /// Without a shadow-casting directional light every cascade is cleared
    /// and nothing is drawn.
    pub fn begin_shadow_pass(&mut self, light: Option<&Light>) -> RenderResult<()> {
        self.shadow_light = light.copied();
        self.advance(FramePhase::Shadow)
    }

    /// Queue an opaque draw into every cascade, at its coarsest LOD.
    pub fn draw_shadow(&mut self, mesh: &Mesh, material: &Material, world: Mat4) -> RenderResult<()> {
        self.require_open(FramePhase::Shadow)?;
        if material.is_opaque() {
            self.renderer
                .shadows
                .queue(mesh.geometry(mesh.coarsest_lod()), world);
        }
        Ok(())
    }

    /// Record every cascade.
    pub fn end_shadow_pass(&mut self) -> RenderResult<()> {
        self.end_pass(FramePhase::Shadow)
    }

    pub fn begin_light_pass(&mut self) -> RenderResult<()> {
        self.advance(FramePhase::Light)
    }

    pub fn draw_light(&mut self, light: &Light) -> RenderResult<()> {
        self.require_open(FramePhase::Light)?;
        self.lights.push(*light);
        Ok(())
    }

    pub fn draw_lights(&mut self, lights: &[Light]) -> RenderResult<()> {
        self.require_open(FramePhase::Light)?;
        self.lights.extend_from_slice(lights);
        Ok(())
    }

    /// Upload the collected lights and cull them per tile.
    pub fn end_light_pass(&mut self) -> RenderResult<()> {
        self.end_pass(FramePhase::Light)
    }

    pub fn begin_forward_pass(&mut self) -> RenderResult<()> {
        self.advance(FramePhase::Forward)
    }

    /// Shade a draw with the pipeline variant of its material.
    pub fn draw_forward(&mut self, mesh: &Mesh, material: &Material, world: Mat4) -> RenderResult<()> {
        self.require_open(FramePhase::Forward)?;
        let environment = self.environment_group();
        let renderer = &mut *self.renderer;
        let pipeline = renderer
            .variants
            .get_pipeline(&mut renderer.ctx, material.signature())?;

        let device = renderer.ctx.device_mut();
        if self.forward_pipeline != Some(pipeline) {
            device.set_render_pipeline(pipeline);
            device.set_viewport(self.viewport.width(), self.viewport.height());
            device.set_bind_group(0, self.viewport.view_group());
            device.set_bind_group(1, environment);
            self.forward_pipeline = Some(pipeline);
        }
        device.set_bind_group(2, material.bind_group());
        device.push_constants(ShaderStages::VERTEX, 0, bytemuck::bytes_of(&world));
        mesh.geometry(mesh.lod(0)).record(device);
        self.stats.draw_calls += 1;
        Ok(())
    }

    /// Draw the skybox, if any, and close the forward image.
    pub fn end_forward_pass(&mut self) -> RenderResult<()> {
        self.end_pass(FramePhase::Forward)
    }

    pub fn begin_fill_pass(&mut self) -> RenderResult<()> {
        self.advance(FramePhase::Fill)
    }

    /// Mark a draw in the fill mask, for the outline step.
    pub fn draw_fill(&mut self, mesh: &Mesh, world: Mat4) -> RenderResult<()> {
        self.require_open(FramePhase::Fill)?;
        let device = self.renderer.ctx.device_mut();
        device.push_constants(ShaderStages::VERTEX, 0, bytemuck::bytes_of(&world));
        mesh.geometry(mesh.lod(0)).record(device);
        self.stats.draw_calls += 1;
        Ok(())
    }

    pub fn end_fill_pass(&mut self) -> RenderResult<()> {
        self.end_pass(FramePhase::Fill)
    }

    pub fn begin_post_pass(&mut self) -> RenderResult<()> {
        self.advance(FramePhase::Post)
    }

    /// Run one post-process step, flipping the viewport's ping-pong source.
    pub fn draw_post(&mut self, step: PostStep) -> RenderResult<()> {
        self.require_open(FramePhase::Post)?;
        let renderer = &mut *self.renderer;
        renderer
            .post
            .record_step(renderer.ctx.device_mut(), self.viewport, &step);
        self.stats.passes += 1;
        self.stats.draw_calls += 1;
        Ok(())
    }

    pub fn end_post_pass(&mut self) -> RenderResult<()> {
        self.end_pass(FramePhase::Post)
    }

    /// Run every step of `chain` in order.
    pub fn run_post_chain(&mut self, chain: &PostProcessChain) -> RenderResult<()> {
        if !(self.phase == FramePhase::Post && self.open) {
            self.begin_post_pass()?;
        }
        for step in chain.steps() {
            self.draw_post(*step)?;
        }
        self.end_post_pass()
    }

    /// Blit the viewport's final image to the next swapchain image.
    ///
    /// The image is handed to the presentation engine by
    /// [`Renderer::swap_buffers`] after [`Frame::end`].
    pub fn present(&mut self) -> RenderResult<()> {
        self.advance(FramePhase::Present)
    }

    /// Run the passes that were not recorded, then submit the frame.
    pub fn end(mut self) -> RenderResult<FrameStats> {
        if self.phase == FramePhase::Begun {
            self.finish()?;
            return Err(RenderError::InvalidState(
                "frame ended before set_camera".into(),
            ));
        }
        if self.phase < FramePhase::Post {
            self.advance(FramePhase::Post)?;
        }
        self.close_pass();
        self.finish()
    }

    fn environment_group(&self) -> BindGroupHandle {
        self.environment
            .unwrap_or(&self.renderer.neutral)
            .bind_group()
    }

    fn require_open(&self, phase: FramePhase) -> RenderResult<()> {
        if self.phase == phase && self.open {
            Ok(())
        } else {
            Err(RenderError::InvalidState(format!(
                "{phase:?} pass is not open (current: {:?})",
                self.phase
            )))
        }
    }

    fn end_pass(&mut self, phase: FramePhase) -> RenderResult<()> {
        self.require_open(phase)?;
        self.close_pass();
        Ok(())
    }

    /// Move forward to `target`, running every pass in between empty.
    fn advance(&mut self, target: FramePhase) -> RenderResult<()> {
        if self.phase == FramePhase::Begun {
            return Err(RenderError::InvalidState(format!(
                "{target:?} pass before set_camera"
            )));
        }
        if target <= self.phase {
            return Err(RenderError::InvalidState(format!(
                "{target:?} pass after the {:?} pass",
                self.phase
            )));
        }
        self.close_pass();
        while self.phase < target {
            let next = self.phase.next();
            self.phase = next;
            self.start(next)?;
            if next != target {
                self.close_pass();
            }
        }
        Ok(())
    }

    fn start(&mut self, phase: FramePhase) -> RenderResult<()> {
        self.open = true;
        match phase {
            FramePhase::Depth => self.start_depth(),
            FramePhase::Shadow => {
                let eye = self.viewport.camera_block().map(CameraBlock::eye).unwrap_or_default();
                let light = self.shadow_light.take();
                self.renderer.shadows.begin(light.as_ref(), eye)?;
            }
            FramePhase::Light => self.lights.clear(),
            FramePhase::Forward => self.start_forward(),
            FramePhase::Fill => self.start_fill(),
            FramePhase::Post => {}
            FramePhase::Present => {
                self.open = false;
                self.record_present()?;
            }
            FramePhase::Begun | FramePhase::Camera => self.open = false,
        }
        Ok(())
    }

    fn close_pass(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        match self.phase {
            FramePhase::Depth => self.finish_depth(),
            FramePhase::Shadow => self.finish_shadow(),
            FramePhase::Light => self.finish_light(),
            FramePhase::Forward => self.finish_forward(),
            FramePhase::Fill => self.finish_fill(),
            _ => {}
        }
    }

    fn start_depth(&mut self) {
        let viewport = &*self.viewport;
        let depth = viewport.depth();
        let device = self.renderer.ctx.device_mut();
        device.pipeline_barrier(&[Barrier::Texture {
            texture: depth.handle(),
            range: SubresourceRange::ALL,
            before: TextureState::Undefined,
            after: TextureState::DepthAttachment,
        }]);
        device.begin_render_pass(&RenderPassDescriptor {
            label: "depth",
            color_attachments: &[],
            depth_attachment: Some(DepthAttachment {
                view: depth.view(),
                load_op: LoadOp::Clear(1.0),
                store_op: StoreOp::Store,
                read_only: false,
            }),
            width: viewport.width(),
            height: viewport.height(),
        });
        device.set_render_pipeline(self.renderer.geometry.depth());
        device.set_viewport(viewport.width(), viewport.height());
        device.set_bind_group(0, viewport.camera_group());
        self.stats.passes += 1;
    }

    fn finish_depth(&mut self) {
        let device = self.renderer.ctx.device_mut();
        device.end_render_pass();
        // Light culling reads the depth bounds of each tile.
        device.pipeline_barrier(&[Barrier::Texture {
            texture: self.viewport.depth().handle(),
            range: SubresourceRange::ALL,
            before: TextureState::DepthAttachment,
            after: TextureState::ShaderRead,
        }]);
    }

    fn finish_shadow(&mut self) {
        let renderer = &mut *self.renderer;
        let draws = renderer
            .shadows
            .record(renderer.ctx.device_mut(), renderer.geometry.shadow());
        self.stats.passes += renderer.shadows.cascade_count();
        self.stats.draw_calls += draws as u32;

        let matrices = renderer.shadows.matrices();
        self.viewport.set_cascades(matrices);
        let buffer = self.viewport.camera_buffer();
        let device = renderer.ctx.device_mut();
        device.pipeline_barrier(&[Barrier::Buffer {
            buffer,
            before: BufferAccess::UniformRead,
            after: BufferAccess::TransferWrite,
        }]);
        device.update_buffer(buffer, CameraBlock::CASCADES_OFFSET, bytemuck::cast_slice(matrices));
        device.pipeline_barrier(&[Barrier::Buffer {
            buffer,
            before: BufferAccess::TransferWrite,
            after: BufferAccess::UniformRead,
        }]);
    }

    fn finish_light(&mut self) {
        let renderer = &mut *self.renderer;
        let device = renderer.ctx.device_mut();
        renderer.culler.upload(device, &self.lights);
        renderer.culler.dispatch(device, self.viewport);
        self.stats.dispatches += 1;
    }

    fn start_forward(&mut self) {
        let viewport = &*self.viewport;
        let (forward, depth) = (viewport.forward(), viewport.depth());
        let clear_color = self.renderer.config.clear_color;
        let device = self.renderer.ctx.device_mut();
        device.pipeline_barrier(&[
            Barrier::Texture {
                texture: forward.handle(),
                range: SubresourceRange::ALL,
                before: TextureState::Undefined,
                after: TextureState::ColorAttachment,
            },
            Barrier::Texture {
                texture: depth.handle(),
                range: SubresourceRange::ALL,
                before: TextureState::ShaderRead,
                after: TextureState::DepthAttachment,
            },
        ]);
        device.begin_render_pass(&RenderPassDescriptor {
            label: "forward",
            color_attachments: &[ColorAttachment {
                view: forward.view(),
                load_op: LoadOp::Clear(clear_color),
                store_op: StoreOp::Store,
            }],
            depth_attachment: Some(DepthAttachment {
                view: depth.view(),
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
                read_only: false,
            }),
            width: viewport.width(),
            height: viewport.height(),
        });
        self.forward_pipeline = None;
        self.stats.passes += 1;
    }

    fn finish_forward(&mut self) {
        let environment = self.environment.map(Environment::bind_group);
        let viewport = &*self.viewport;
        let device = self.renderer.ctx.device_mut();
        if let Some(environment) = environment {
            device.set_render_pipeline(self.renderer.geometry.skybox());
            device.set_viewport(viewport.width(), viewport.height());
            device.set_bind_group(0, viewport.view_group());
            device.set_bind_group(1, environment);
            device.draw(0..3, 0..1);
            self.stats.draw_calls += 1;
        }
        device.end_render_pass();
        device.pipeline_barrier(&[
            Barrier::Texture {
                texture: viewport.forward().handle(),
                range: SubresourceRange::ALL,
                before: TextureState::ColorAttachment,
                after: TextureState::ShaderRead,
            },
            Barrier::Texture {
                texture: viewport.depth().handle(),
                range: SubresourceRange::ALL,
                before: TextureState::DepthAttachment,
                after: TextureState::ShaderRead,
            },
        ]);
    }

    fn start_fill(&mut self) {
        let viewport = &*self.viewport;
        let fill = viewport.fill();
        let device = self.renderer.ctx.device_mut();
        device.pipeline_barrier(&[Barrier::Texture {
            texture: fill.handle(),
            range: SubresourceRange::ALL,
            before: TextureState::Undefined,
            after: TextureState::ColorAttachment,
        }]);
        device.begin_render_pass(&RenderPassDescriptor {
            label: "fill",
            color_attachments: &[ColorAttachment {
                view: fill.view(),
                load_op: LoadOp::Clear([0.0; 4]),
                store_op: StoreOp::Store,
            }],
            depth_attachment: None,
            width: viewport.width(),
            height: viewport.height(),
        });
        device.set_render_pipeline(self.renderer.geometry.fill());
        device.set_viewport(viewport.width(), viewport.height());
        device.set_bind_group(0, viewport.camera_group());
        self.stats.passes += 1;
    }

    fn finish_fill(&mut self) {
        let device = self.renderer.ctx.device_mut();
        device.end_render_pass();
        device.pipeline_barrier(&[Barrier::Texture {
            texture: self.viewport.fill().handle(),
            range: SubresourceRange::ALL,
            before: TextureState::ColorAttachment,
            after: TextureState::ShaderRead,
        }]);
    }

    fn record_present(&mut self) -> RenderResult<()> {
        let image_available = match &self.active {
            Some(active) => active.image_available(),
            None => return Err(RenderError::InvalidState("frame already submitted".into())),
        };
        let renderer = &mut *self.renderer;
        let format = renderer.ctx.device().swapchain_format();
        let pipeline = renderer.post.present_pipeline(&mut renderer.ctx, format)?;

        let device = renderer.ctx.device_mut();
        let image = device.acquire_next_image(image_available)?;
        let extent = device.swapchain_extent();
        device.pipeline_barrier(&[Barrier::Texture {
            texture: image.texture,
            range: SubresourceRange::ALL,
            before: TextureState::Undefined,
            after: TextureState::ColorAttachment,
        }]);
        renderer
            .post
            .record_blit(device, self.viewport, pipeline, image.view, extent);
        device.pipeline_barrier(&[Barrier::Texture {
            texture: image.texture,
            range: SubresourceRange::ALL,
            before: TextureState::ColorAttachment,
            after: TextureState::Present,
        }]);
        self.stats.passes += 1;
        self.stats.draw_calls += 1;
        self.swapchain_image = Some(image);
        Ok(())
    }

    fn finish(&mut self) -> RenderResult<FrameStats> {
        let Some(active) = self.active.take() else {
            return Ok(self.stats);
        };
        let render_complete = active.render_complete();
        let image = self.swapchain_image.take();
        let renderer = &mut *self.renderer;
        renderer
            .frames
            .submit(renderer.ctx.device_mut(), active, image.is_some())?;
        if let Some(image) = image {
            renderer.pending_present = Some((image, render_complete));
        }
        renderer.last_stats = self.stats;
        Ok(self.stats)
    }
}

impl<D: RenderDevice> Drop for Frame<'_, D> {
    fn drop(&mut self) {
        if self.active.is_none() {
            return;
        }
        log::warn!("Frame dropped without end(); submitting what was recorded");
        self.close_pass();
        if let Err(e) = self.finish() {
            log::error!("Failed to submit dropped frame: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    fn renderer() -> Renderer<DummyDevice> {
        let config = RendererConfig {
            shadow_map_size: 256,
            brdf_lut_size: 32,
            ..Default::default()
        };
        Renderer::new(DummyDevice::new(), config).unwrap()
    }

    #[test]
    fn test_phases_are_ordered() {
        assert!(FramePhase::Camera < FramePhase::Depth);
        assert!(FramePhase::Forward < FramePhase::Post);
        assert_eq!(FramePhase::Fill.next(), FramePhase::Post);
        assert_eq!(FramePhase::Present.next(), FramePhase::Present);
    }

    #[test]
    fn test_passes_require_camera() {
        let mut renderer = renderer();
        let mut viewport = renderer
            .make_viewport(&ViewportDesc {
                width: 64,
                height: 64,
            })
            .unwrap();
        let mut frame = renderer.begin(&mut viewport).unwrap();
        assert!(matches!(
            frame.begin_depth_pass(),
            Err(RenderError::InvalidState(_))
        ));
        frame
            .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
            .unwrap();
        assert!(frame
            .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
            .is_err());
        frame.end().unwrap();
    }

    #[test]
    fn test_going_back_is_rejected() {
        let mut renderer = renderer();
        let mut viewport = renderer
            .make_viewport(&ViewportDesc {
                width: 64,
                height: 64,
            })
            .unwrap();
        let mut frame = renderer.begin(&mut viewport).unwrap();
        frame
            .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
            .unwrap();
        frame.begin_forward_pass().unwrap();
        assert_eq!(frame.phase(), FramePhase::Forward);
        assert!(frame.begin_depth_pass().is_err());
        assert!(frame.draw_lights(&[]).is_err());
        frame.end_forward_pass().unwrap();
        assert!(frame.end_forward_pass().is_err());
        frame.end().unwrap();
        assert!(renderer.device().validation_errors().is_empty());
    }

    #[test]
    fn test_dropped_frame_is_still_submitted() {
        let mut renderer = renderer();
        let mut viewport = renderer
            .make_viewport(&ViewportDesc {
                width: 64,
                height: 64,
            })
            .unwrap();
        for _ in 0..4 {
            let mut frame = renderer.begin(&mut viewport).unwrap();
            frame
                .set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, None)
                .unwrap();
            frame.begin_depth_pass().unwrap();
        }
        assert_eq!(renderer.frames.frame_count(), 4);
        assert!(renderer.device().validation_errors().is_empty());
    }

    #[test]
    fn test_rejects_device_without_push_constants() {
        let device = DummyDevice::new().with_limits(DeviceLimits {
            max_push_constant_size: 32,
            ..Default::default()
        });
        assert!(matches!(
            Renderer::new(device, RendererConfig::default()),
            Err(RenderError::Unsupported(_))
        ));
    }
}
