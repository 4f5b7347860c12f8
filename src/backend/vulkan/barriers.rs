//! Barrier generation for Vulkan.
//!
//! Renderer-level [`TextureState`] and [`BufferAccess`] values map to image
//! layouts, access masks and pipeline stages here. Barriers recorded together
//! are submitted as a single `vkCmdPipelineBarrier`.

use ash::vk;

use crate::backend::types::{BufferAccess, SubresourceRange, TextureFormat, TextureState};

use super::conversion::convert_subresource_range;

/// Image layout for a texture state.
///
/// Sampled depth textures stay in the read-only depth layout so they can be
/// depth-tested and sampled at once.
pub fn texture_layout(state: TextureState, format: TextureFormat) -> vk::ImageLayout {
    match state {
        TextureState::Undefined => vk::ImageLayout::UNDEFINED,
        TextureState::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        TextureState::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        TextureState::DepthReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        TextureState::ShaderRead if format.is_depth() => {
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        }
        TextureState::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        TextureState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        TextureState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

fn texture_access(state: TextureState) -> vk::AccessFlags {
    match state {
        TextureState::Undefined | TextureState::Present => vk::AccessFlags::empty(),
        TextureState::ColorAttachment => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        TextureState::DepthAttachment => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        TextureState::DepthReadOnly => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::SHADER_READ
        }
        TextureState::ShaderRead => vk::AccessFlags::SHADER_READ,
        TextureState::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
    }
}

fn texture_stage(state: TextureState, is_source: bool) -> vk::PipelineStageFlags {
    match state {
        TextureState::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
        TextureState::Present if is_source => vk::PipelineStageFlags::TOP_OF_PIPE,
        TextureState::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        TextureState::ColorAttachment => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        TextureState::DepthAttachment => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        }
        TextureState::DepthReadOnly => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COMPUTE_SHADER
        }
        TextureState::ShaderRead => {
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER
        }
        TextureState::TransferDst => vk::PipelineStageFlags::TRANSFER,
    }
}

fn buffer_access(access: BufferAccess) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match access {
        BufferAccess::HostWrite => (vk::AccessFlags::HOST_WRITE, vk::PipelineStageFlags::HOST),
        BufferAccess::TransferWrite => {
            (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER)
        }
        BufferAccess::UniformRead => (
            vk::AccessFlags::UNIFORM_READ,
            vk::PipelineStageFlags::VERTEX_SHADER
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        BufferAccess::ShaderRead => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        BufferAccess::ShaderWrite => (
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
    }
}

/// A batch of memory barriers to submit together.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    image_barriers: Vec<vk::ImageMemoryBarrier<'static>>,
    buffer_barriers: Vec<vk::BufferMemoryBarrier<'static>>,
    src_stage_mask: vk::PipelineStageFlags,
    dst_stage_mask: vk::PipelineStageFlags,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image layout transition.
    pub fn add_image_barrier(
        &mut self,
        image: vk::Image,
        format: TextureFormat,
        range: SubresourceRange,
        before: TextureState,
        after: TextureState,
    ) {
        self.image_barriers.push(
            vk::ImageMemoryBarrier::default()
                .old_layout(texture_layout(before, format))
                .new_layout(texture_layout(after, format))
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(convert_subresource_range(range, format))
                .src_access_mask(texture_access(before))
                .dst_access_mask(texture_access(after)),
        );
        self.src_stage_mask |= texture_stage(before, true);
        self.dst_stage_mask |= texture_stage(after, false);
    }

    /// Add an execution and memory dependency on a whole buffer.
    pub fn add_buffer_barrier(&mut self, buffer: vk::Buffer, before: BufferAccess, after: BufferAccess) {
        let (src_access, src_stage) = buffer_access(before);
        let (dst_access, dst_stage) = buffer_access(after);
        self.buffer_barriers.push(
            vk::BufferMemoryBarrier::default()
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE)
                .src_access_mask(src_access)
                .dst_access_mask(dst_access),
        );
        self.src_stage_mask |= src_stage;
        self.dst_stage_mask |= dst_stage;
    }

    pub fn is_empty(&self) -> bool {
        self.image_barriers.is_empty() && self.buffer_barriers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.image_barriers.len() + self.buffer_barriers.len()
    }

    /// Submit all barriers in a single pipeline barrier command.
    ///
    /// Does nothing if the batch is empty.
    pub fn submit(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src_stage_mask,
                self.dst_stage_mask,
                vk::DependencyFlags::empty(),
                &[],
                &self.buffer_barriers,
                &self.image_barriers,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_barrier_batch_empty() {
        let batch = BarrierBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn test_sampled_depth_uses_read_only_layout() {
        assert_eq!(
            texture_layout(TextureState::ShaderRead, TextureFormat::Depth32Float),
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );
        assert_eq!(
            texture_layout(TextureState::ShaderRead, TextureFormat::Rgba16Float),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_stage_masks_accumulate() {
        let mut batch = BarrierBatch::new();
        batch.add_image_barrier(
            vk::Image::from_raw(1),
            TextureFormat::Depth32Float,
            SubresourceRange::ALL,
            TextureState::DepthAttachment,
            TextureState::DepthReadOnly,
        );
        batch.add_buffer_barrier(
            vk::Buffer::from_raw(2),
            BufferAccess::ShaderWrite,
            BufferAccess::ShaderRead,
        );
        assert_eq!(batch.len(), 2);
        assert!(batch
            .src_stage_mask
            .contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS | vk::PipelineStageFlags::COMPUTE_SHADER));
        assert!(batch
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
    }
}
