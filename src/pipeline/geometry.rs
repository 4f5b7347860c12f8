//! Fixed pipelines that draw scene geometry outside the forward pass.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::context::GpuContext;
use crate::error::RenderResult;
use crate::pipeline::{PipelineBuilder, DEPTH_FORMAT, DRAW_CONSTANTS_SIZE, HDR_FORMAT, MASK_FORMAT};
use crate::resources::{builtin, Owned, ShaderDesc, Vertex};

/// Constant and slope depth bias of the shadow pipeline.
const SHADOW_DEPTH_BIAS: (i32, u32) = (2, 2);

/// Depth pre-pass, shadow, fill and skybox pipelines.
#[derive(Debug)]
pub struct GeometryPipelines {
    depth: Owned<RenderPipelineHandle>,
    shadow: Owned<RenderPipelineHandle>,
    fill: Owned<RenderPipelineHandle>,
    skybox: Owned<RenderPipelineHandle>,
    _layouts: Vec<Owned<PipelineLayoutHandle>>,
}

impl GeometryPipelines {
    pub fn new<D: RenderDevice>(ctx: &mut GpuContext<D>) -> RenderResult<Self> {
        let depth_shader = ctx.make_shader(&ShaderDesc {
            label: "depth",
            source: builtin::DEPTH,
            defines: &[],
        })?;
        let fill_shader = ctx.make_shader(&ShaderDesc {
            label: "fill",
            source: builtin::FILL,
            defines: &[],
        })?;
        let skybox_shader = ctx.make_shader(&ShaderDesc {
            label: "skybox",
            source: builtin::SKYBOX,
            defines: &[],
        })?;

        let camera = ctx.layouts().camera.handle();
        let view = ctx.layouts().view.handle();
        let environment = ctx.layouts().environment.handle();

        let camera_layout = pipeline_layout(ctx, "camera draw", &[camera], true)?;
        let shadow_layout = pipeline_layout(ctx, "shadow", &[], true)?;
        let skybox_layout = pipeline_layout(ctx, "skybox", &[view, environment], false)?;

        let no_constants = SpecializationConstants::new();

        let depth_state = PipelineBuilder::new()
            .vertex_layout(Vertex::layout())
            .depth(DEPTH_FORMAT, true, CompareFunction::Less)
            .build();
        let depth = ctx.device_mut().create_render_pipeline(&RenderPipelineDescriptor {
            label: "depth",
            layout: camera_layout.handle(),
            vertex: depth_shader.entry("vs_depth"),
            fragment: None,
            state: &depth_state,
            constants: &no_constants,
        })?;

        let shadow_state = PipelineBuilder::new()
            .vertex_layout(Vertex::layout())
            .depth(DEPTH_FORMAT, true, CompareFunction::LessEqual)
            .depth_bias(SHADOW_DEPTH_BIAS.0, SHADOW_DEPTH_BIAS.1)
            .build();
        let shadow = ctx.device_mut().create_render_pipeline(&RenderPipelineDescriptor {
            label: "shadow",
            layout: shadow_layout.handle(),
            vertex: depth_shader.entry("vs_shadow"),
            fragment: None,
            state: &shadow_state,
            constants: &no_constants,
        })?;

        let fill_state = PipelineBuilder::new()
            .vertex_layout(Vertex::layout())
            .color_target(MASK_FORMAT)
            .build();
        let fill = ctx.device_mut().create_render_pipeline(&RenderPipelineDescriptor {
            label: "fill",
            layout: camera_layout.handle(),
            vertex: fill_shader.entry("vs_fill"),
            fragment: Some(fill_shader.entry("fs_fill")),
            state: &fill_state,
            constants: &no_constants,
        })?;

        // Drawn at the far plane after the opaque geometry.
        let skybox_state = PipelineBuilder::new()
            .color_target(HDR_FORMAT)
            .depth(DEPTH_FORMAT, false, CompareFunction::LessEqual)
            .cull_mode(CullMode::None)
            .build();
        let skybox = ctx.device_mut().create_render_pipeline(&RenderPipelineDescriptor {
            label: "skybox",
            layout: skybox_layout.handle(),
            vertex: skybox_shader.entry("vs_main"),
            fragment: Some(skybox_shader.entry("fs_main")),
            state: &skybox_state,
            constants: &no_constants,
        })?;

        Ok(Self {
            depth: ctx.own(depth),
            shadow: ctx.own(shadow),
            fill: ctx.own(fill),
            skybox: ctx.own(skybox),
            _layouts: vec![camera_layout, shadow_layout, skybox_layout],
        })
    }

    pub fn depth(&self) -> RenderPipelineHandle {
        self.depth.handle()
    }

    pub fn shadow(&self) -> RenderPipelineHandle {
        self.shadow.handle()
    }

    pub fn fill(&self) -> RenderPipelineHandle {
        self.fill.handle()
    }

    pub fn skybox(&self) -> RenderPipelineHandle {
        self.skybox.handle()
    }
}

/// Pipeline layout over `groups`, optionally with the per-draw matrix push
/// constant.
pub(crate) fn pipeline_layout<D: RenderDevice>(
    ctx: &mut GpuContext<D>,
    label: &str,
    groups: &[BindGroupLayoutHandle],
    draw_constants: bool,
) -> RenderResult<Owned<PipelineLayoutHandle>> {
    let range = PushConstantRange {
        stages: ShaderStages::VERTEX,
        offset: 0,
        size: DRAW_CONSTANTS_SIZE,
    };
    let ranges: &[PushConstantRange] = if draw_constants { &[range] } else { &[] };
    let layout = ctx.device_mut().create_pipeline_layout(&PipelineLayoutDescriptor {
        label,
        bind_group_layouts: groups,
        push_constant_ranges: ranges,
    })?;
    Ok(ctx.own(layout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    #[test]
    fn test_geometry_pipelines_compile() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let pipelines = GeometryPipelines::new(&mut ctx).unwrap();

        let device = ctx.device();
        assert_eq!(device.render_pipeline_label(pipelines.depth()), Some("depth"));
        assert_eq!(device.render_pipeline_label(pipelines.shadow()), Some("shadow"));
        assert_eq!(device.render_pipeline_label(pipelines.fill()), Some("fill"));
        assert_eq!(device.render_pipeline_label(pipelines.skybox()), Some("skybox"));
        assert_eq!(device.pipeline_layouts_created(), 3);
    }
}
