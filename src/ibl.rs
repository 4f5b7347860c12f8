//! Image-based lighting precomputation.
//!
//! An [`Environment`] is baked once from a source cubemap: a diffuse
//! irradiance cubemap and a specular cubemap prefiltered at increasing
//! roughness, one mip per roughness level. The split-sum BRDF lookup table
//! does not depend on the source and is baked once per renderer.
//!
//! Baking is synchronous. Every face is recorded, submitted and waited for
//! on its own, with the bake parameters rewritten in between.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RendererConfig;
use crate::context::GpuContext;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{pipeline_layout, PipelineBuilder};
use crate::resources::{
    builtin, Owned, ShaderData, ShaderDataDesc, ShaderDesc, Texture, TextureDesc, TextureKind,
};

/// Format of the baked cubemaps.
pub const ENVIRONMENT_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
/// Format of the BRDF lookup table.
pub const BRDF_LUT_FORMAT: TextureFormat = TextureFormat::Rg16Float;

/// GGX samples per prefiltered texel.
const PREFILTER_SAMPLES: u32 = 512;

/// Per-draw bake parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct BakeParams {
    face: u32,
    roughness: f32,
    sample_count: u32,
    source_size: f32,
}

/// A baked environment, ready to light a scene.
#[derive(Debug)]
pub struct Environment {
    source: Arc<Texture>,
    irradiance: Texture,
    prefilter: Texture,
    brdf: Arc<Texture>,
    bind_group: Owned<BindGroupHandle>,
}

impl Environment {
    fn new<D: RenderDevice>(
        ctx: &mut GpuContext<D>,
        source: Arc<Texture>,
        irradiance: Texture,
        prefilter: Texture,
        brdf: Arc<Texture>,
    ) -> RenderResult<Self> {
        let layout = ctx.layouts().environment.handle();
        let sampler = ctx.samplers().linear_clamp.handle();
        let bind_group = ctx.device_mut().create_bind_group(
            layout,
            &[
                BindGroupEntry::texture(0, irradiance.view()),
                BindGroupEntry::texture(1, prefilter.view()),
                BindGroupEntry::texture(2, brdf.view()),
                BindGroupEntry::sampler(3, sampler),
            ],
        )?;
        Ok(Self {
            source,
            irradiance,
            prefilter,
            brdf,
            bind_group: ctx.own(bind_group),
        })
    }

    pub fn source(&self) -> &Arc<Texture> {
        &self.source
    }

    pub fn irradiance(&self) -> &Texture {
        &self.irradiance
    }

    pub fn prefilter(&self) -> &Texture {
        &self.prefilter
    }

    /// Roughness levels of the prefiltered cubemap.
    pub fn roughness_levels(&self) -> u32 {
        self.prefilter.mip_levels()
    }

    pub fn brdf_lut(&self) -> &Arc<Texture> {
        &self.brdf
    }

    /// Irradiance, prefiltered specular, BRDF LUT and sampler.
    pub fn bind_group(&self) -> BindGroupHandle {
        self.bind_group.handle()
    }
}

/// Bakes environments. Owns the bake pipelines and the BRDF lookup table.
#[derive(Debug)]
pub struct IblBaker {
    irradiance_pipeline: Owned<RenderPipelineHandle>,
    prefilter_pipeline: Owned<RenderPipelineHandle>,
    _layouts: [Owned<PipelineLayoutHandle>; 2],
    params: ShaderData,
    command_buffer: Owned<CommandBufferHandle>,
    brdf: Arc<Texture>,
    irradiance_size: u32,
    prefilter_size: u32,
    prefilter_levels: u32,
}

impl IblBaker {
    /// Compile the bake pipelines and bake the BRDF lookup table.
    pub fn new<D: RenderDevice>(
        ctx: &mut GpuContext<D>,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let shader = ctx.make_shader(&ShaderDesc {
            label: "ibl",
            source: builtin::IBL,
            defines: &[],
        })?;
        let ibl = ctx.layouts().ibl.handle();
        let bake_layout = pipeline_layout(ctx, "ibl bake", &[ibl], false)?;
        let brdf_layout = pipeline_layout(ctx, "brdf lut", &[], false)?;

        let no_constants = SpecializationConstants::new();
        let mut pipeline = |label: &str,
                            layout: PipelineLayoutHandle,
                            entry: &str,
                            format: TextureFormat| {
            let state = PipelineBuilder::new()
                .color_target(format)
                .cull_mode(CullMode::None)
                .build();
            let handle = ctx.device_mut().create_render_pipeline(&RenderPipelineDescriptor {
                label,
                layout,
                vertex: shader.entry("vs_fullscreen"),
                fragment: Some(shader.entry(entry)),
                state: &state,
                constants: &no_constants,
            })?;
            RenderResult::Ok(ctx.own(handle))
        };
        let irradiance_pipeline =
            pipeline("irradiance", bake_layout.handle(), "fs_irradiance", ENVIRONMENT_FORMAT)?;
        let prefilter_pipeline =
            pipeline("prefilter", bake_layout.handle(), "fs_prefilter", ENVIRONMENT_FORMAT)?;
        let brdf_pipeline = pipeline("brdf lut", brdf_layout.handle(), "fs_brdf", BRDF_LUT_FORMAT)?;

        let params = ctx.make_shader_data(&ShaderDataDesc {
            label: "ibl bake params",
            size: std::mem::size_of::<BakeParams>() as u64,
            contents: None,
        })?;
        let command_buffer = ctx.device_mut().create_command_buffer()?;
        let command_buffer = ctx.own(command_buffer);

        let brdf = Texture::create_target(
            ctx,
            &TextureDescriptor::render_target(
                "brdf lut",
                config.brdf_lut_size,
                config.brdf_lut_size,
                BRDF_LUT_FORMAT,
            ),
            TextureViewDimension::D2,
        )?;
        bake_face(
            ctx,
            command_buffer.handle(),
            &brdf,
            (0, 0),
            brdf_pipeline.handle(),
            None,
        )?;
        log::info!("Baked {0}x{0} BRDF lookup table", config.brdf_lut_size);

        Ok(Self {
            irradiance_pipeline,
            prefilter_pipeline,
            _layouts: [bake_layout, brdf_layout],
            params,
            command_buffer,
            brdf: Arc::new(brdf),
            irradiance_size: config.irradiance_size,
            prefilter_size: config.prefilter_size,
            prefilter_levels: config.prefilter_mip_levels,
        })
    }

    pub fn brdf_lut(&self) -> &Arc<Texture> {
        &self.brdf
    }

    /// Bake irradiance and prefiltered specular cubemaps from `source`.
    ///
    /// Blocks until the GPU has finished every face. No frame may be
    /// recording.
    pub fn bake<D: RenderDevice>(
        &self,
        ctx: &mut GpuContext<D>,
        source: Arc<Texture>,
    ) -> RenderResult<Environment> {
        if source.layers() != 6 || source.width() != source.height() {
            return Err(RenderError::resource(
                "environment",
                "source must be a cube texture with square faces",
            ));
        }

        let irradiance = Texture::create_target(
            ctx,
            &TextureDescriptor::cube("irradiance", self.irradiance_size, 1, ENVIRONMENT_FORMAT),
            TextureViewDimension::Cube,
        )?;
        let prefilter = Texture::create_target(
            ctx,
            &TextureDescriptor::cube(
                "prefiltered specular",
                self.prefilter_size,
                self.prefilter_levels,
                ENVIRONMENT_FORMAT,
            ),
            TextureViewDimension::Cube,
        )?;

        let layout = ctx.layouts().ibl.handle();
        let sampler = ctx.samplers().linear_clamp.handle();
        let group = ctx.device_mut().create_bind_group(
            layout,
            &[
                BindGroupEntry::buffer(0, self.params.buffer()),
                BindGroupEntry::texture(1, source.view()),
                BindGroupEntry::sampler(2, sampler),
            ],
        )?;
        let group = ctx.own(group);
        let source_size = source.width() as f32;

        for face in 0..6 {
            let params = BakeParams {
                face,
                roughness: 0.0,
                sample_count: 0,
                source_size,
            };
            self.params.write(ctx, 0, bytemuck::bytes_of(&params))?;
            bake_face(
                ctx,
                self.command_buffer.handle(),
                &irradiance,
                (0, face),
                self.irradiance_pipeline.handle(),
                Some(group.handle()),
            )?;
        }

        let levels = self.prefilter_levels;
        for mip in 0..levels {
            let roughness = mip as f32 / (levels - 1).max(1) as f32;
            for face in 0..6 {
                let params = BakeParams {
                    face,
                    roughness,
                    sample_count: PREFILTER_SAMPLES,
                    source_size,
                };
                self.params.write(ctx, 0, bytemuck::bytes_of(&params))?;
                bake_face(
                    ctx,
                    self.command_buffer.handle(),
                    &prefilter,
                    (mip, face),
                    self.prefilter_pipeline.handle(),
                    Some(group.handle()),
                )?;
            }
        }
        log::info!(
            "Baked environment: {0}x{0} irradiance, {1}x{1} specular with {2} roughness levels",
            self.irradiance_size,
            self.prefilter_size,
            levels
        );

        Environment::new(ctx, source, irradiance, prefilter, Arc::clone(&self.brdf))
    }

    /// An environment that contributes no light, for scenes without one.
    pub fn neutral<D: RenderDevice>(&self, ctx: &mut GpuContext<D>) -> RenderResult<Environment> {
        let black = |ctx: &mut GpuContext<D>, label: &str| {
            ctx.make_texture(&TextureDesc {
                label,
                width: 1,
                height: 1,
                format: ENVIRONMENT_FORMAT,
                kind: TextureKind::Cube,
                data: None,
            })
        };
        let source = Arc::new(black(ctx, "neutral source")?);
        let irradiance = black(ctx, "neutral irradiance")?;
        let prefilter = black(ctx, "neutral specular")?;
        Environment::new(ctx, source, irradiance, prefilter, Arc::clone(&self.brdf))
    }
}

/// Render one full-screen triangle into `(mip, layer)` of `target` and wait
/// for it.
fn bake_face<D: RenderDevice>(
    ctx: &mut GpuContext<D>,
    command_buffer: CommandBufferHandle,
    target: &Texture,
    (mip, layer): (u32, u32),
    pipeline: RenderPipelineHandle,
    group: Option<BindGroupHandle>,
) -> RenderResult<()> {
    let view = ctx.device_mut().create_texture_view(
        target.handle(),
        &TextureViewDescriptor::attachment(mip, layer),
    )?;
    // Released on every exit, including a failed submit or wait.
    let view = ctx.own(view);
    let device = ctx.device_mut();
    let width = (target.width() >> mip).max(1);
    let height = (target.height() >> mip).max(1);
    let range = SubresourceRange::single(mip, layer);

    device.begin_commands(command_buffer)?;
    device.pipeline_barrier(&[Barrier::Texture {
        texture: target.handle(),
        range,
        before: TextureState::Undefined,
        after: TextureState::ColorAttachment,
    }]);
    device.begin_render_pass(&RenderPassDescriptor {
        label: "ibl bake",
        color_attachments: &[ColorAttachment {
            view: view.handle(),
            load_op: LoadOp::Clear([0.0; 4]),
            store_op: StoreOp::Store,
        }],
        depth_attachment: None,
        width,
        height,
    });
    device.set_render_pipeline(pipeline);
    device.set_viewport(width, height);
    if let Some(group) = group {
        device.set_bind_group(0, group);
    }
    device.draw(0..3, 0..1);
    device.end_render_pass();
    device.pipeline_barrier(&[Barrier::Texture {
        texture: target.handle(),
        range,
        before: TextureState::ColorAttachment,
        after: TextureState::ShaderRead,
    }]);
    device.end_commands()?;
    device.submit(&SubmitInfo {
        command_buffer,
        wait: None,
        signal: None,
        fence: None,
    })?;
    device.queue_wait_idle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    fn small_config() -> RendererConfig {
        RendererConfig {
            irradiance_size: 8,
            prefilter_size: 32,
            prefilter_mip_levels: 6,
            brdf_lut_size: 16,
            ..Default::default()
        }
    }

    fn source(ctx: &mut GpuContext<DummyDevice>, value: u8) -> Arc<Texture> {
        let data = vec![value; 4 * 4 * 4 * 6];
        Arc::new(
            ctx.make_texture(&TextureDesc {
                label: "sky",
                width: 4,
                height: 4,
                format: TextureFormat::Rgba8Unorm,
                kind: TextureKind::Cube,
                data: Some(&data),
            })
            .unwrap(),
        )
    }

    fn fingerprints(ctx: &GpuContext<DummyDevice>, texture: &Texture) -> Vec<u64> {
        let mut prints = Vec::new();
        for mip in 0..texture.mip_levels() {
            for layer in 0..texture.layers() {
                prints.push(
                    ctx.device()
                        .subresource_fingerprint(texture.handle(), mip, layer)
                        .unwrap(),
                );
            }
        }
        prints
    }

    #[test]
    fn test_bake_draw_counts() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let baker = IblBaker::new(&mut ctx, &small_config()).unwrap();
        assert_eq!(ctx.device().submissions().len(), 1);
        ctx.device_mut().clear_submissions();

        let sky = source(&mut ctx, 200);
        let environment = baker.bake(&mut ctx, sky).unwrap();

        // 6 irradiance faces + 6 levels x 6 faces
        let submissions = ctx.device().submissions();
        assert_eq!(submissions.len(), 6 + 36);
        assert!(submissions.iter().all(|s| s.draw_count() == 1));
        assert_eq!(environment.roughness_levels(), 6);
        assert!(ctx.device().validation_errors().is_empty());

        for mip in 0..6 {
            for face in 0..6 {
                assert_eq!(
                    ctx.device()
                        .texture_state(environment.prefilter().handle(), mip, face),
                    Some(TextureState::ShaderRead)
                );
            }
        }
    }

    #[test]
    fn test_baking_twice_is_deterministic() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let baker = IblBaker::new(&mut ctx, &small_config()).unwrap();
        let sky = source(&mut ctx, 90);

        let first = baker.bake(&mut ctx, Arc::clone(&sky)).unwrap();
        let second = baker.bake(&mut ctx, sky).unwrap();

        assert_eq!(
            fingerprints(&ctx, first.irradiance()),
            fingerprints(&ctx, second.irradiance())
        );
        assert_eq!(
            fingerprints(&ctx, first.prefilter()),
            fingerprints(&ctx, second.prefilter())
        );
        assert!(Arc::ptr_eq(first.brdf_lut(), second.brdf_lut()));
    }

    #[test]
    fn test_different_sources_bake_differently() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let baker = IblBaker::new(&mut ctx, &small_config()).unwrap();

        let (bright_sky, dark_sky) = (source(&mut ctx, 250), source(&mut ctx, 5));
        let bright = baker.bake(&mut ctx, bright_sky).unwrap();
        let dark = baker.bake(&mut ctx, dark_sky).unwrap();
        assert_ne!(
            fingerprints(&ctx, bright.irradiance()),
            fingerprints(&ctx, dark.irradiance())
        );
    }

    #[test]
    fn test_flat_source_is_rejected() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let baker = IblBaker::new(&mut ctx, &small_config()).unwrap();
        let flat = ctx
            .make_texture(&TextureDesc {
                label: "flat",
                width: 2,
                height: 2,
                format: TextureFormat::Rgba8Unorm,
                kind: TextureKind::Flat,
                data: None,
            })
            .unwrap();
        assert!(baker.bake(&mut ctx, Arc::new(flat)).is_err());
    }

    #[test]
    fn test_failed_bake_releases_its_views() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let baker = IblBaker::new(&mut ctx, &small_config()).unwrap();
        let sky = source(&mut ctx, 120);
        let live = ctx.device().live_resources();

        ctx.device_mut().set_stalled(true);
        assert!(matches!(
            baker.bake(&mut ctx, Arc::clone(&sky)),
            Err(RenderError::DeviceLost)
        ));
        ctx.device_mut().set_stalled(false);
        ctx.destroy_pending();
        assert_eq!(ctx.device().live_resources(), live);

        // A successful bake keeps only what the environment holds.
        let environment = baker.bake(&mut ctx, Arc::clone(&sky)).unwrap();
        drop(environment);
        ctx.destroy_pending();
        assert_eq!(ctx.device().live_resources(), live);
    }
}
