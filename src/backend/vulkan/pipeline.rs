//! WGSL to SPIR-V compilation and Vulkan pipeline creation.

use std::ffi::CString;

use ash::vk;

use crate::backend::shader::ParsedShader;
use crate::backend::types::{PipelineState, SpecializationConstants};
use crate::error::{RenderError, RenderResult};

use super::conversion::*;

/// A compiled stage, alive until its pipeline is created.
pub struct CompiledStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: CString,
}

/// Specialize `shader` and compile one entry point to a Vulkan module.
pub fn compile_stage(
    device: &ash::Device,
    shader: &ParsedShader,
    entry_point: &str,
    stage: naga::ShaderStage,
    constants: &SpecializationConstants,
) -> RenderResult<CompiledStage> {
    shader.require_entry_point(entry_point, stage)?;
    let (module, info) = shader.specialize(constants)?;

    let options = naga::back::spv::Options {
        lang_version: (1, 3),
        flags: naga::back::spv::WriterFlags::empty(),
        ..Default::default()
    };
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: stage,
        entry_point: entry_point.to_string(),
    };

    let spv = naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| RenderError::ShaderCompilation {
            label: shader.label.clone(),
            message: format!("SPIR-V generation error: {e}"),
        })?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(&spv);
    let module = unsafe { device.create_shader_module(&create_info, None) }.map_err(|e| {
        RenderError::ShaderCompilation {
            label: shader.label.clone(),
            message: format!("Failed to create shader module: {:?}", e),
        }
    })?;

    let entry_point = CString::new(entry_point).map_err(|e| RenderError::ShaderCompilation {
        label: shader.label.clone(),
        message: format!("Invalid entry point name: {e}"),
    })?;

    let stage = match stage {
        naga::ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        naga::ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        naga::ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    };

    Ok(CompiledStage {
        stage,
        module,
        entry_point,
    })
}

/// Destroy the temporary shader modules of a pipeline.
pub fn destroy_stages(device: &ash::Device, stages: &[CompiledStage]) {
    for stage in stages {
        unsafe { device.destroy_shader_module(stage.module, None) };
    }
}

/// Create a graphics pipeline for dynamic rendering.
pub fn create_graphics_pipeline(
    device: &ash::Device,
    label: &str,
    layout: vk::PipelineLayout,
    stages: &[CompiledStage],
    state: &PipelineState,
) -> RenderResult<vk::Pipeline> {
    let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = stages
        .iter()
        .map(|s| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(s.stage)
                .module(s.module)
                .name(&s.entry_point)
        })
        .collect();

    let binding_descriptions: Vec<vk::VertexInputBindingDescription> = state
        .vertex_layouts
        .iter()
        .enumerate()
        .map(|(i, buffer)| {
            vk::VertexInputBindingDescription::default()
                .binding(i as u32)
                .stride(buffer.array_stride as u32)
                .input_rate(match buffer.step_mode {
                    crate::backend::types::VertexStepMode::Vertex => vk::VertexInputRate::VERTEX,
                    crate::backend::types::VertexStepMode::Instance => {
                        vk::VertexInputRate::INSTANCE
                    }
                })
        })
        .collect();

    let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = state
        .vertex_layouts
        .iter()
        .enumerate()
        .flat_map(|(i, buffer)| {
            buffer.attributes.iter().map(move |attr| {
                vk::VertexInputAttributeDescription::default()
                    .location(attr.location)
                    .binding(i as u32)
                    .format(convert_vertex_format(attr.format))
                    .offset(attr.offset as u32)
            })
        })
        .collect();

    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(state.primitive.topology))
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let depth_bias = state
        .depth_stencil
        .map(|d| (d.depth_bias, d.depth_bias_slope_scale))
        .filter(|&(constant, slope)| constant != 0 || slope != 0);

    // Front face is flipped to compensate for the negative viewport height
    let mut rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(convert_cull_mode(state.primitive.cull_mode))
        .front_face(convert_front_face(state.primitive.front_face))
        .depth_bias_enable(depth_bias.is_some());
    if let Some((constant, slope)) = depth_bias {
        rasterization_state = rasterization_state
            .depth_bias_constant_factor(constant as f32)
            .depth_bias_slope_factor(slope as f32);
    }

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil_state = match &state.depth_stencil {
        Some(depth) => vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(depth.depth_write_enabled)
            .depth_compare_op(convert_compare_function(depth.depth_compare)),
        None => vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false),
    };

    let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = state
        .color_targets
        .iter()
        .map(convert_color_target)
        .collect();

    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_attachment_formats: Vec<vk::Format> = state
        .color_targets
        .iter()
        .map(|t| convert_texture_format(t.format))
        .collect();
    let depth_attachment_format = state
        .depth_stencil
        .map(|d| convert_texture_format(d.format))
        .unwrap_or(vk::Format::UNDEFINED);

    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_attachment_formats)
        .depth_attachment_format(depth_attachment_format);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| RenderError::PipelineCreation {
        label: label.to_string(),
        message: format!("Failed to create graphics pipeline: {:?}", e),
    })?;

    Ok(pipelines[0])
}

pub fn create_compute_pipeline(
    device: &ash::Device,
    label: &str,
    layout: vk::PipelineLayout,
    stage: &CompiledStage,
) -> RenderResult<vk::Pipeline> {
    let stage_info = vk::PipelineShaderStageCreateInfo::default()
        .stage(stage.stage)
        .module(stage.module)
        .name(&stage.entry_point);

    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage_info)
        .layout(layout);

    let pipelines = unsafe {
        device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| RenderError::PipelineCreation {
        label: label.to_string(),
        message: format!("Failed to create compute pipeline: {:?}", e),
    })?;

    Ok(pipelines[0])
}
