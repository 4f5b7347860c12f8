//! Ping-pong post-process chain.
//!
//! Each step is a full-screen triangle that samples the viewport's current
//! colour image and writes the other ping-pong image, which then becomes the
//! current one. The first step reads the forward image. Presenting blits the
//! current image into the swapchain with tone mapping.

use bytemuck::{Pod, Zeroable};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::cache::MemoCache;
use crate::context::GpuContext;
use crate::error::RenderResult;
use crate::pipeline::{PipelineBuilder, HDR_FORMAT};
use crate::resources::{builtin, Owned, Shader, ShaderDesc};
use crate::viewport::Viewport;

/// Push constants shared by every post-process entry point.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PostConstants {
    /// Box blur radius in pixels, clamped to 8 by the shader.
    pub blur_strength: i32,
    pub sharpen_strength: f32,
}

/// One step of a post-process chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostStep {
    /// Screen-space ambient occlusion from the depth image.
    Ssao,
    Fxaa,
    Blur { strength: i32 },
    Sharpen { strength: f32 },
    /// Reprojects depth with the previous frame's camera.
    MotionBlur,
    /// Overlays an outline around the fill mask.
    Outline,
}

impl PostStep {
    const COUNT: usize = 6;

    fn index(&self) -> usize {
        match self {
            PostStep::Ssao => 0,
            PostStep::Fxaa => 1,
            PostStep::Blur { .. } => 2,
            PostStep::Sharpen { .. } => 3,
            PostStep::MotionBlur => 4,
            PostStep::Outline => 5,
        }
    }

    fn entry_point(index: usize) -> &'static str {
        ["fs_ssao", "fs_fxaa", "fs_blur", "fs_sharpen", "fs_motion_blur", "fs_outline"][index]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PostStep::Ssao => "ssao",
            PostStep::Fxaa => "fxaa",
            PostStep::Blur { .. } => "blur",
            PostStep::Sharpen { .. } => "sharpen",
            PostStep::MotionBlur => "motion blur",
            PostStep::Outline => "outline",
        }
    }

    pub fn constants(&self) -> PostConstants {
        match *self {
            PostStep::Blur { strength } => PostConstants {
                blur_strength: strength,
                ..Default::default()
            },
            PostStep::Sharpen { strength } => PostConstants {
                sharpen_strength: strength,
                ..Default::default()
            },
            _ => PostConstants::default(),
        }
    }
}

/// Ordered list of post-process steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostProcessChain {
    steps: Vec<PostStep>,
}

impl PostProcessChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, step: PostStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn push(&mut self, step: PostStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[PostStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromIterator<PostStep> for PostProcessChain {
    fn from_iter<I: IntoIterator<Item = PostStep>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

/// Pipelines of every post-process step and of the final blit.
#[derive(Debug)]
pub struct PostProcessor {
    shader: Shader,
    layout: Owned<PipelineLayoutHandle>,
    steps: Vec<Owned<RenderPipelineHandle>>,
    /// Blit pipelines per presentation format.
    present: MemoCache<TextureFormat, Owned<RenderPipelineHandle>>,
}

impl PostProcessor {
    pub fn new<D: RenderDevice>(ctx: &mut GpuContext<D>) -> RenderResult<Self> {
        let shader = ctx.make_shader(&ShaderDesc {
            label: "postprocess",
            source: builtin::POSTPROCESS,
            defines: &[],
        })?;
        let post = ctx.layouts().post.handle();
        let layout = ctx.device_mut().create_pipeline_layout(&PipelineLayoutDescriptor {
            label: "postprocess",
            bind_group_layouts: &[post],
            push_constant_ranges: &[PushConstantRange {
                stages: ShaderStages::FRAGMENT,
                offset: 0,
                size: std::mem::size_of::<PostConstants>() as u32,
            }],
        })?;
        let layout = ctx.own(layout);

        let steps = (0..PostStep::COUNT)
            .map(|index| {
                let entry = PostStep::entry_point(index);
                create_fullscreen(ctx, &shader, layout.handle(), entry, HDR_FORMAT)
            })
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(Self {
            shader,
            layout,
            steps,
            present: MemoCache::new(),
        })
    }

    pub fn step_pipeline(&self, step: &PostStep) -> RenderPipelineHandle {
        self.steps[step.index()].handle()
    }

    /// Blit pipeline writing `format`, compiled on first use.
    pub fn present_pipeline<D: RenderDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        format: TextureFormat,
    ) -> RenderResult<RenderPipelineHandle> {
        let shader = &self.shader;
        let layout = self.layout.handle();
        let pipeline = self.present.get_or_try_insert_with(format, |format| {
            log::debug!("Compiling present pipeline for {format:?}");
            create_fullscreen(ctx, shader, layout, "fs_blit", format)
        })?;
        Ok(pipeline.handle())
    }

    /// Record `step` into the viewport's next ping-pong image and make it
    /// the current source.
    ///
    /// The depth and fill images must already be readable.
    pub fn record_step<D: RenderDevice>(
        &self,
        device: &mut D,
        viewport: &mut Viewport,
        step: &PostStep,
    ) {
        let source = viewport.current_source();
        let target = viewport.ping(viewport.next_target());
        let (width, height) = viewport.size();

        device.pipeline_barrier(&[Barrier::Texture {
            texture: target.handle(),
            range: SubresourceRange::ALL,
            before: TextureState::Undefined,
            after: TextureState::ColorAttachment,
        }]);
        device.begin_render_pass(&RenderPassDescriptor {
            label: &format!("post {}", step.name()),
            color_attachments: &[ColorAttachment {
                view: target.view(),
                load_op: LoadOp::DontCare,
                store_op: StoreOp::Store,
            }],
            depth_attachment: None,
            width,
            height,
        });
        device.set_render_pipeline(self.step_pipeline(step));
        device.set_viewport(width, height);
        device.set_bind_group(0, viewport.post_group(source));
        device.push_constants(ShaderStages::FRAGMENT, 0, bytemuck::bytes_of(&step.constants()));
        device.draw(0..3, 0..1);
        device.end_render_pass();
        device.pipeline_barrier(&[Barrier::Texture {
            texture: target.handle(),
            range: SubresourceRange::ALL,
            before: TextureState::ColorAttachment,
            after: TextureState::ShaderRead,
        }]);

        viewport.flip();
    }

    /// Tone map the viewport's current image into `target`, which must be in
    /// the colour attachment state.
    pub fn record_blit<D: RenderDevice>(
        &self,
        device: &mut D,
        viewport: &Viewport,
        pipeline: RenderPipelineHandle,
        target: TextureViewHandle,
        extent: (u32, u32),
    ) {
        device.begin_render_pass(&RenderPassDescriptor {
            label: "present",
            color_attachments: &[ColorAttachment {
                view: target,
                load_op: LoadOp::DontCare,
                store_op: StoreOp::Store,
            }],
            depth_attachment: None,
            width: extent.0,
            height: extent.1,
        });
        device.set_render_pipeline(pipeline);
        device.set_viewport(extent.0, extent.1);
        device.set_bind_group(0, viewport.post_group(viewport.current_source()));
        device.push_constants(
            ShaderStages::FRAGMENT,
            0,
            bytemuck::bytes_of(&PostConstants::default()),
        );
        device.draw(0..3, 0..1);
        device.end_render_pass();
    }
}

fn create_fullscreen<D: RenderDevice>(
    ctx: &mut GpuContext<D>,
    shader: &Shader,
    layout: PipelineLayoutHandle,
    entry: &str,
    format: TextureFormat,
) -> RenderResult<Owned<RenderPipelineHandle>> {
    let state = PipelineBuilder::new()
        .color_target(format)
        .cull_mode(CullMode::None)
        .build();
    let pipeline = ctx.device_mut().create_render_pipeline(&RenderPipelineDescriptor {
        label: entry,
        layout,
        vertex: shader.entry("vs_fullscreen"),
        fragment: Some(shader.entry(entry)),
        state: &state,
        constants: &SpecializationConstants::new(),
    })?;
    Ok(ctx.own(pipeline))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_constants_layout() {
        assert_eq!(std::mem::size_of::<PostConstants>(), 8);
        let blur = PostStep::Blur { strength: 3 }.constants();
        assert_eq!(blur.blur_strength, 3);
        assert_eq!(blur.sharpen_strength, 0.0);
        let sharpen = PostStep::Sharpen { strength: 0.5 }.constants();
        assert_eq!(sharpen.sharpen_strength, 0.5);
        assert_eq!(PostStep::Fxaa.constants(), PostConstants::default());
    }

    #[test]
    fn test_chain_keeps_order() {
        let chain = PostProcessChain::new()
            .with(PostStep::Ssao)
            .with(PostStep::Blur { strength: 2 })
            .with(PostStep::Outline);
        let names: Vec<_> = chain.steps().iter().map(PostStep::name).collect();
        assert_eq!(names, ["ssao", "blur", "outline"]);
        assert!(PostProcessChain::default().is_empty());
    }

    #[test]
    fn test_every_step_has_its_own_pipeline() {
        use crate::backend::DummyDevice;

        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let mut post = PostProcessor::new(&mut ctx).unwrap();
        let steps = [
            PostStep::Ssao,
            PostStep::Fxaa,
            PostStep::Blur { strength: 1 },
            PostStep::Sharpen { strength: 1.0 },
            PostStep::MotionBlur,
            PostStep::Outline,
        ];
        let labels: Vec<_> = steps
            .iter()
            .map(|s| ctx.device().render_pipeline_label(post.step_pipeline(s)))
            .collect();
        assert_eq!(
            labels,
            [
                Some("fs_ssao"),
                Some("fs_fxaa"),
                Some("fs_blur"),
                Some("fs_sharpen"),
                Some("fs_motion_blur"),
                Some("fs_outline"),
            ]
        );

        let first = post.present_pipeline(&mut ctx, TextureFormat::Bgra8UnormSrgb).unwrap();
        let again = post.present_pipeline(&mut ctx, TextureFormat::Bgra8UnormSrgb).unwrap();
        let other = post.present_pipeline(&mut ctx, TextureFormat::Rgba8Unorm).unwrap();
        assert_eq!(first, again);
        assert_ne!(first, other);
    }
}
