//! Core backend abstraction traits
//!
//! These traits define the interface that both the Vulkan and the dummy
//! backends implement. Command recording targets an implicit "current"
//! command buffer opened with [`RenderDevice::begin_commands`].

use std::ops::Range;
use std::time::Duration;

use crate::backend::types::*;
use crate::error::RenderResult;

macro_rules! handles {
    ($($(#[$meta:meta])* $name:ident => $variant:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) u64);

            impl $name {
                /// Raw backend id, stable for the handle's lifetime.
                pub fn id(&self) -> u64 {
                    self.0
                }
            }

            impl From<$name> for AnyHandle {
                fn from(handle: $name) -> Self {
                    AnyHandle::$variant(handle)
                }
            }
        )*

        /// Any destroyable device object.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum AnyHandle {
            $($variant($name),)*
        }
    };
}

handles! {
    /// Handle to a GPU buffer
    BufferHandle => Buffer,
    /// Handle to a GPU texture
    TextureHandle => Texture,
    /// Handle to a texture view
    TextureViewHandle => TextureView,
    /// Handle to a sampler
    SamplerHandle => Sampler,
    /// Handle to a parsed and validated shader module
    ShaderModuleHandle => ShaderModule,
    /// Handle to a bind group layout
    BindGroupLayoutHandle => BindGroupLayout,
    /// Handle to a bind group
    BindGroupHandle => BindGroup,
    /// Handle to a pipeline layout
    PipelineLayoutHandle => PipelineLayout,
    /// Handle to a render pipeline
    RenderPipelineHandle => RenderPipeline,
    /// Handle to a compute pipeline
    ComputePipelineHandle => ComputePipeline,
    /// Handle to a primary command buffer
    CommandBufferHandle => CommandBuffer,
    /// Handle to a CPU-waitable fence
    FenceHandle => Fence,
    /// Handle to a GPU-GPU semaphore
    SemaphoreHandle => Semaphore,
}

/// Largest inline buffer update, matching `vkCmdUpdateBuffer`.
pub const MAX_INLINE_UPDATE: usize = 65536;

/// Main device trait.
///
/// All creation calls are synchronous. Destruction is immediate; callers
/// that may still have work in flight go through
/// [`DeferredDestructor`](crate::resources::DeferredDestructor).
pub trait RenderDevice {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    fn limits(&self) -> DeviceLimits;

    // Resource creation

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> RenderResult<BufferHandle>;

    /// Write data to a host-visible buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()>;

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> RenderResult<TextureHandle>;

    /// Upload pixel data into one mip of one layer, blocking until done.
    fn write_texture(
        &mut self,
        texture: TextureHandle,
        region: TextureRegion,
        data: &[u8],
    ) -> RenderResult<()>;

    /// Create a texture view
    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> RenderResult<TextureViewHandle>;

    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> RenderResult<SamplerHandle>;

    // Pipeline creation

    /// Parse and validate a WGSL module.
    fn create_shader_module(
        &mut self,
        desc: &ShaderModuleDescriptor<'_>,
    ) -> RenderResult<ShaderModuleHandle>;

    /// Create a bind group layout
    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> RenderResult<BindGroupLayoutHandle>;

    fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDescriptor<'_>,
    ) -> RenderResult<PipelineLayoutHandle>;

    /// Create a bind group
    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[BindGroupEntry],
    ) -> RenderResult<BindGroupHandle>;

    /// Create a render pipeline, resolving specialization constants.
    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor<'_>,
    ) -> RenderResult<RenderPipelineHandle>;

    /// Create a compute pipeline
    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor<'_>,
    ) -> RenderResult<ComputePipelineHandle>;

    // Synchronization

    fn create_command_buffer(&mut self) -> RenderResult<CommandBufferHandle>;

    fn create_fence(&mut self, signaled: bool) -> RenderResult<FenceHandle>;

    fn create_semaphore(&mut self) -> RenderResult<SemaphoreHandle>;

    /// Block until the fence signals or `timeout` elapses.
    ///
    /// Returns [`RenderError::FenceTimeout`](crate::RenderError::FenceTimeout)
    /// on expiry.
    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> RenderResult<()>;

    fn reset_fence(&mut self, fence: FenceHandle) -> RenderResult<()>;

    // Command recording and execution

    /// Reset `command_buffer` and make it the current recording target.
    fn begin_commands(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()>;

    /// Close the current recording target.
    fn end_commands(&mut self) -> RenderResult<()>;

    /// Submit a closed command buffer to the graphics queue.
    fn submit(&mut self, info: &SubmitInfo) -> RenderResult<()>;

    /// Block until the graphics queue is idle.
    fn queue_wait_idle(&mut self) -> RenderResult<()>;

    /// Begin a render pass
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor<'_>);

    /// End the current render pass
    fn end_render_pass(&mut self);

    /// Set the render pipeline
    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    /// Set the compute pipeline
    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle);

    /// Bind a group against the layout of the current pipeline.
    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle);

    /// Push constants through the layout of the current pipeline.
    fn push_constants(&mut self, stages: ShaderStages, offset: u32, data: &[u8]);

    /// Set vertex buffer
    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);

    /// Set index buffer
    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat);

    /// Set viewport and a matching scissor rect.
    fn set_viewport(&mut self, width: u32, height: u32);

    /// Draw primitives
    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);

    /// Draw indexed primitives
    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);

    /// Dispatch compute work
    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    /// Record an inline buffer update (at most [`MAX_INLINE_UPDATE`] bytes,
    /// 4-byte aligned).
    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Record a pipeline barrier. Must not be called inside a render pass.
    fn pipeline_barrier(&mut self, barriers: &[Barrier]);

    // Presentation

    fn swapchain_format(&self) -> TextureFormat;

    fn swapchain_extent(&self) -> (u32, u32);

    /// Acquire the next swapchain image, signalling `signal` when it is ready.
    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> RenderResult<SwapchainImage>;

    /// Queue presentation of an acquired image after `wait` signals.
    fn present(&mut self, image: &SwapchainImage, wait: SemaphoreHandle) -> RenderResult<()>;

    // Resource cleanup

    /// Destroy an object immediately. The GPU must no longer use it.
    fn destroy(&mut self, handle: AnyHandle);
}
