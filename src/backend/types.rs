//! Common types shared between backends

use std::collections::BTreeMap;

use bitflags::bitflags;

use super::traits::{
    BindGroupLayoutHandle, BufferHandle, CommandBufferHandle, FenceHandle, PipelineLayoutHandle,
    SamplerHandle, SemaphoreHandle, ShaderModuleHandle, TextureHandle, TextureViewHandle,
};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rg16Float,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Rg16Float
            | TextureFormat::R32Float
            | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Texture usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const STORAGE_BINDING = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

bitflags! {
    /// Buffer usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Host-visible memory, written through `write_buffer`.
        const MAP_WRITE = 1 << 0;
        const COPY_SRC = 1 << 1;
        const COPY_DST = 1 << 2;
        const INDEX = 1 << 3;
        const VERTEX = 1 << 4;
        const UNIFORM = 1 << 5;
        const STORAGE = 1 << 6;
    }
}

bitflags! {
    /// Shader stages a binding or push constant range is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
        const VERTEX_FRAGMENT = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWrites: u32 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const ALL = 0xF;
    }
}

/// Shape of a texture's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D2,
    /// Layered 2D texture; `layers` on the descriptor gives the count.
    D2Array,
    /// Six-layer cube texture.
    Cube,
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub mip_levels: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            layers: 1,
            mip_levels: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        }
    }
}

impl TextureDescriptor {
    /// A six-face cube texture with a full usage set for render-to-cubemap.
    pub fn cube(label: &str, size: u32, mip_levels: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width: size,
            height: size,
            layers: 6,
            mip_levels,
            dimension: TextureDimension::Cube,
            format,
            usage: TextureUsage::TEXTURE_BINDING
                | TextureUsage::RENDER_ATTACHMENT
                | TextureUsage::COPY_DST,
        }
    }

    /// A single-mip 2D render target that later passes sample.
    pub fn render_target(label: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width,
            height,
            layers: 1,
            mip_levels: 1,
            dimension: TextureDimension::D2,
            format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT,
        }
    }
}

/// How a view interprets its texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureViewDimension {
    D2,
    D2Array,
    Cube,
}

/// Mip and layer range covered by a view or a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl SubresourceRange {
    /// Count value meaning "up to the last mip/layer".
    pub const REMAINING: u32 = u32::MAX;

    /// Every mip and layer of the texture.
    pub const ALL: Self = Self {
        base_mip: 0,
        mip_count: Self::REMAINING,
        base_layer: 0,
        layer_count: Self::REMAINING,
    };

    /// One mip of one layer.
    pub fn single(mip: u32, layer: u32) -> Self {
        Self {
            base_mip: mip,
            mip_count: 1,
            base_layer: layer,
            layer_count: 1,
        }
    }

    /// Resolve `REMAINING` counts against the texture's real extent.
    pub fn resolve(self, mip_levels: u32, layers: u32) -> Self {
        let mip_count = if self.mip_count == Self::REMAINING {
            mip_levels.saturating_sub(self.base_mip)
        } else {
            self.mip_count
        };
        let layer_count = if self.layer_count == Self::REMAINING {
            layers.saturating_sub(self.base_layer)
        } else {
            self.layer_count
        };
        Self {
            mip_count,
            layer_count,
            ..self
        }
    }
}

/// Texture view descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewDescriptor {
    pub dimension: TextureViewDimension,
    pub range: SubresourceRange,
}

impl TextureViewDescriptor {
    /// A view over the whole texture.
    pub fn whole(dimension: TextureViewDimension) -> Self {
        Self {
            dimension,
            range: SubresourceRange::ALL,
        }
    }

    /// A 2D view of a single mip of a single layer, for use as an attachment.
    pub fn attachment(mip: u32, layer: u32) -> Self {
        Self {
            dimension: TextureViewDimension::D2,
            range: SubresourceRange::single(mip, layer),
        }
    }
}

/// Destination of a `write_texture` upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub mip: u32,
    pub layer: u32,
    pub width: u32,
    pub height: u32,
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

/// Vertex attribute description
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Vertex buffer layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexStepMode {
    Vertex,
    Instance,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    TriangleList,
    TriangleStrip,
}

/// Front face winding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    Ccw,
    Cw,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Compare function for depth tests and comparison samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Blend operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Add,
    Subtract,
    Min,
    Max,
}

/// Blend component state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOperation,
}

impl Default for BlendComponent {
    fn default() -> Self {
        Self {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
            operation: BlendOperation::Add,
        }
    }
}

/// Blend state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    pub fn alpha_blending() -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::SrcAlpha,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
                operation: BlendOperation::Add,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
                operation: BlendOperation::Add,
            },
        }
    }
}

/// Rasterization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveState {
    pub topology: PrimitiveTopology,
    pub front_face: FrontFace,
    pub cull_mode: CullMode,
}

impl Default for PrimitiveState {
    fn default() -> Self {
        Self {
            topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::Back,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
    /// Constant depth bias, used by shadow passes.
    pub depth_bias: i32,
    pub depth_bias_slope_scale: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
    pub write_mask: ColorWrites,
}

/// Fixed-function state of a render pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineState {
    pub primitive: PrimitiveState,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_targets: Vec<ColorTargetState>,
    pub vertex_layouts: Vec<VertexBufferLayout>,
}

/// Pipeline-overridable constants, by WGSL `override` name.
///
/// Booleans are passed as `0.0` / `1.0`.
pub type SpecializationConstants = BTreeMap<String, f64>;

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Sampler descriptor
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub compare: Option<CompareFunction>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            compare: None,
        }
    }
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// WGSL shader module source
#[derive(Debug, Clone)]
pub struct ShaderModuleDescriptor<'a> {
    pub label: &'a str,
    pub source: &'a str,
}

/// A shader entry point within a module.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoint<'a> {
    pub module: ShaderModuleHandle,
    pub name: &'a str,
}

/// Binding type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer { read_only: bool },
    Texture {
        sample_type: TextureSampleType,
        dimension: TextureViewDimension,
    },
    Sampler { comparison: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSampleType {
    Float,
    Depth,
}

/// Bind group layout entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStages,
    pub ty: BindingType,
}

impl BindGroupLayoutEntry {
    pub fn uniform(binding: u32, visibility: ShaderStages) -> Self {
        Self {
            binding,
            visibility,
            ty: BindingType::UniformBuffer,
        }
    }

    pub fn storage(binding: u32, visibility: ShaderStages, read_only: bool) -> Self {
        Self {
            binding,
            visibility,
            ty: BindingType::StorageBuffer { read_only },
        }
    }

    pub fn texture(binding: u32, visibility: ShaderStages, dimension: TextureViewDimension) -> Self {
        Self {
            binding,
            visibility,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float,
                dimension,
            },
        }
    }

    pub fn depth_texture(
        binding: u32,
        visibility: ShaderStages,
        dimension: TextureViewDimension,
    ) -> Self {
        Self {
            binding,
            visibility,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Depth,
                dimension,
            },
        }
    }

    pub fn sampler(binding: u32, visibility: ShaderStages, comparison: bool) -> Self {
        Self {
            binding,
            visibility,
            ty: BindingType::Sampler { comparison },
        }
    }
}

/// Resource bound at one binding of a bind group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingResource {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
    Texture(TextureViewHandle),
    Sampler(SamplerHandle),
}

/// Bind group entry for creating bind groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupEntry {
    pub binding: u32,
    pub resource: BindingResource,
}

impl BindGroupEntry {
    pub fn buffer(binding: u32, buffer: BufferHandle) -> Self {
        Self {
            binding,
            resource: BindingResource::Buffer {
                buffer,
                offset: 0,
                size: None,
            },
        }
    }

    pub fn texture(binding: u32, view: TextureViewHandle) -> Self {
        Self {
            binding,
            resource: BindingResource::Texture(view),
        }
    }

    pub fn sampler(binding: u32, sampler: SamplerHandle) -> Self {
        Self {
            binding,
            resource: BindingResource::Sampler(sampler),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    pub stages: ShaderStages,
    pub offset: u32,
    pub size: u32,
}

/// Pipeline layout descriptor
#[derive(Debug, Clone)]
pub struct PipelineLayoutDescriptor<'a> {
    pub label: &'a str,
    pub bind_group_layouts: &'a [BindGroupLayoutHandle],
    pub push_constant_ranges: &'a [PushConstantRange],
}

/// Render pipeline descriptor
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor<'a> {
    pub label: &'a str,
    pub layout: PipelineLayoutHandle,
    pub vertex: EntryPoint<'a>,
    pub fragment: Option<EntryPoint<'a>>,
    pub state: &'a PipelineState,
    pub constants: &'a SpecializationConstants,
}

/// Compute pipeline descriptor
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor<'a> {
    pub label: &'a str,
    pub layout: PipelineLayoutHandle,
    pub compute: EntryPoint<'a>,
    pub constants: &'a SpecializationConstants,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp<T> {
    Clear(T),
    Load,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    Discard,
}

/// Color attachment for render pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub load_op: LoadOp<[f32; 4]>,
    pub store_op: StoreOp,
}

/// Depth attachment for render pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    pub view: TextureViewHandle,
    pub load_op: LoadOp<f32>,
    pub store_op: StoreOp,
    /// Attachment is only depth-tested, never written.
    pub read_only: bool,
}

/// Render pass descriptor
#[derive(Debug, Clone)]
pub struct RenderPassDescriptor<'a> {
    pub label: &'a str,
    pub color_attachments: &'a [ColorAttachment],
    pub depth_attachment: Option<DepthAttachment>,
    pub width: u32,
    pub height: u32,
}

/// How a texture is being used; barriers move textures between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureState {
    /// Contents undefined. Valid only as a barrier source.
    #[default]
    Undefined,
    ColorAttachment,
    DepthAttachment,
    /// Depth-tested without writes and sampled by shaders.
    DepthReadOnly,
    /// Sampled by fragment or compute shaders.
    ShaderRead,
    TransferDst,
    Present,
}

/// How a buffer is being accessed; barriers order accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferAccess {
    /// Written by the host before submission.
    HostWrite,
    /// Written by an inline `update_buffer`.
    TransferWrite,
    /// Read as a uniform buffer by any stage.
    UniformRead,
    /// Read as a storage buffer by fragment or compute shaders.
    ShaderRead,
    /// Written as a storage buffer by compute shaders.
    ShaderWrite,
}

/// A pipeline barrier between two uses of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Barrier {
    Texture {
        texture: TextureHandle,
        range: SubresourceRange,
        before: TextureState,
        after: TextureState,
    },
    Buffer {
        buffer: BufferHandle,
        before: BufferAccess,
        after: BufferAccess,
    },
}

/// Queue submission of one recorded command buffer.
#[derive(Debug, Clone, Copy)]
pub struct SubmitInfo {
    pub command_buffer: CommandBufferHandle,
    /// Semaphore waited on before colour output.
    pub wait: Option<SemaphoreHandle>,
    pub signal: Option<SemaphoreHandle>,
    pub fence: Option<FenceHandle>,
}

/// Swapchain image handed out by `acquire_next_image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainImage {
    pub index: u32,
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
}

/// Device limits the renderer validates its configuration against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_texture_array_layers: u32,
    pub max_push_constant_size: u32,
    pub max_compute_workgroups_per_dimension: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_texture_array_layers: 256,
            max_push_constant_size: 128,
            max_compute_workgroups_per_dimension: 65535,
        }
    }
}
