//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. Commands are recorded
//! into command buffers and replayed on submission against a CPU model of
//! the device:
//!
//! - buffers hold real bytes, updated by `write_buffer` and `update_buffer`
//! - every texture subresource carries a content fingerprint that changes
//!   deterministically with each clear, upload and draw that writes it
//! - texture states are tracked, so a missing or wrong barrier is reported
//!   as a validation error the way the Vulkan validation layers would
//!
//! Fences signal on submission and waits never block. A stalled device
//! (see [`DummyDevice::set_stalled`]) stops signalling, which turns the
//! next reuse of a frame slot into a fence timeout.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::time::Duration;

use crate::backend::shader::ParsedShader;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{RenderError, RenderResult};

/// A recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginRenderPass {
        label: String,
        color: Vec<ColorAttachment>,
        depth: Option<DepthAttachment>,
    },
    EndRenderPass,
    SetRenderPipeline(RenderPipelineHandle),
    SetComputePipeline(ComputePipelineHandle),
    SetBindGroup {
        index: u32,
        group: BindGroupHandle,
    },
    PushConstants {
        stages: ShaderStages,
        offset: u32,
        data: Vec<u8>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    },
    SetViewport {
        width: u32,
        height: u32,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    UpdateBuffer {
        buffer: BufferHandle,
        offset: u64,
        data: Vec<u8>,
    },
    Barrier(Vec<Barrier>),
}

impl Command {
    fn is_draw(&self) -> bool {
        matches!(self, Command::Draw { .. } | Command::DrawIndexed { .. })
    }
}

/// A render pass found in a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRecord {
    pub label: String,
    pub draws: usize,
}

/// One queue submission as the dummy device executed it.
#[derive(Debug, Clone)]
pub struct Submission {
    pub commands: Vec<Command>,
    pub signaled_fence: Option<FenceHandle>,
}

impl Submission {
    /// Render passes in recording order with their draw counts.
    pub fn render_passes(&self) -> Vec<PassRecord> {
        let mut passes = Vec::new();
        let mut current: Option<PassRecord> = None;
        for command in &self.commands {
            match command {
                Command::BeginRenderPass { label, .. } => {
                    current = Some(PassRecord {
                        label: label.clone(),
                        draws: 0,
                    });
                }
                Command::EndRenderPass => passes.extend(current.take()),
                c if c.is_draw() => {
                    if let Some(pass) = current.as_mut() {
                        pass.draws += 1;
                    }
                }
                _ => {}
            }
        }
        passes
    }

    pub fn dispatches(&self) -> Vec<(u32, u32, u32)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Dispatch { x, y, z } => Some((*x, *y, *z)),
                _ => None,
            })
            .collect()
    }

    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_draw()).count()
    }
}

/// A completed presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentRecord {
    pub image_index: u32,
    pub fingerprint: u64,
}

struct DummyBuffer {
    label: Option<String>,
    usage: BufferUsage,
    data: Vec<u8>,
}

struct DummyTexture {
    desc: TextureDescriptor,
    /// Indexed by `mip * layers + layer`.
    fingerprints: Vec<u64>,
    states: Vec<TextureState>,
}

impl DummyTexture {
    fn index(&self, mip: u32, layer: u32) -> usize {
        (mip * self.desc.layers + layer) as usize
    }

    fn subresources(&self, range: SubresourceRange) -> Vec<usize> {
        let range = range.resolve(self.desc.mip_levels, self.desc.layers);
        let mut indices = Vec::new();
        for mip in range.base_mip..range.base_mip + range.mip_count {
            for layer in range.base_layer..range.base_layer + range.layer_count {
                if mip < self.desc.mip_levels && layer < self.desc.layers {
                    indices.push(self.index(mip, layer));
                }
            }
        }
        indices
    }

    fn name(&self) -> &str {
        self.desc.label.as_deref().unwrap_or("texture")
    }
}

struct DummyView {
    texture: TextureHandle,
    range: SubresourceRange,
}

struct DummyPipelineLayout {
    groups: Vec<BindGroupLayoutHandle>,
    push_constant_ranges: Vec<PushConstantRange>,
}

struct DummyBindGroup {
    entries: Vec<BindGroupEntry>,
}

struct DummyPipeline {
    label: String,
    layout: PipelineLayoutHandle,
    constants: SpecializationConstants,
}

#[derive(Default)]
struct DummyCommandBuffer {
    commands: Vec<Command>,
    recording: bool,
}

/// Bound state while replaying a command buffer.
#[derive(Default)]
struct Replay {
    render_pipeline: Option<RenderPipelineHandle>,
    compute_pipeline: Option<ComputePipelineHandle>,
    bind_groups: BTreeMap<u32, BindGroupHandle>,
    push_constants: Vec<u8>,
    vertex_buffers: BTreeMap<u32, (BufferHandle, u64)>,
    index_buffer: Option<(BufferHandle, u64)>,
    /// Colour and depth attachment subresources of the open pass.
    targets: Vec<(TextureHandle, usize)>,
}

/// Dummy GPU device.
pub struct DummyDevice {
    next_id: u64,
    limits: DeviceLimits,
    buffers: HashMap<u64, DummyBuffer>,
    textures: HashMap<u64, DummyTexture>,
    views: HashMap<u64, DummyView>,
    samplers: HashMap<u64, SamplerDescriptor>,
    shaders: HashMap<u64, ParsedShader>,
    bind_group_layouts: HashMap<u64, Vec<BindGroupLayoutEntry>>,
    pipeline_layouts: HashMap<u64, DummyPipelineLayout>,
    bind_groups: HashMap<u64, DummyBindGroup>,
    render_pipelines: HashMap<u64, DummyPipeline>,
    compute_pipelines: HashMap<u64, DummyPipeline>,
    command_buffers: HashMap<u64, DummyCommandBuffer>,
    fences: HashMap<u64, bool>,
    semaphores: HashMap<u64, bool>,

    // Recording state
    recording: Option<CommandBufferHandle>,
    in_render_pass: bool,
    current_layout: Option<PipelineLayoutHandle>,

    // Swapchain
    swapchain: Vec<(TextureHandle, TextureViewHandle)>,
    swapchain_format: TextureFormat,
    swapchain_extent: (u32, u32),
    next_image: u32,

    stalled: bool,
    submissions: Vec<Submission>,
    presents: Vec<PresentRecord>,
    validation_errors: Vec<String>,
    render_pipelines_created: usize,
    pipeline_layouts_created: usize,
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyDevice {
    /// Number of swapchain images the dummy surface exposes.
    pub const SWAPCHAIN_IMAGES: usize = 3;

    /// Create a dummy device with a 640x480 surface.
    pub fn new() -> Self {
        Self::with_surface(640, 480)
    }

    /// Create a dummy device whose surface has the given size.
    pub fn with_surface(width: u32, height: u32) -> Self {
        let mut device = Self {
            next_id: 1,
            limits: DeviceLimits::default(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            samplers: HashMap::new(),
            shaders: HashMap::new(),
            bind_group_layouts: HashMap::new(),
            pipeline_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            command_buffers: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            recording: None,
            in_render_pass: false,
            current_layout: None,
            swapchain: Vec::new(),
            swapchain_format: TextureFormat::Bgra8UnormSrgb,
            swapchain_extent: (width, height),
            next_image: 0,
            stalled: false,
            submissions: Vec::new(),
            presents: Vec::new(),
            validation_errors: Vec::new(),
            render_pipelines_created: 0,
            pipeline_layouts_created: 0,
        };

        let format = device.swapchain_format;
        for i in 0..Self::SWAPCHAIN_IMAGES {
            let texture = device.insert_texture(TextureDescriptor {
                usage: TextureUsage::RENDER_ATTACHMENT,
                ..TextureDescriptor::render_target(&format!("swapchain image {i}"), width, height, format)
            });
            let view = device.insert_view(texture, SubresourceRange::single(0, 0));
            device.swapchain.push((texture, view));
        }

        device
    }

    /// Override the reported device limits.
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Simulate a hung GPU: submissions stop signalling fences and semaphores.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Every submission executed so far, oldest first.
    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn clear_submissions(&mut self) {
        self.submissions.clear();
        self.presents.clear();
    }

    pub fn presents(&self) -> &[PresentRecord] {
        &self.presents
    }

    /// Misuse detected so far, in the order it happened.
    pub fn validation_errors(&self) -> &[String] {
        &self.validation_errors
    }

    /// Combined fingerprint of every subresource of `texture`.
    pub fn texture_fingerprint(&self, texture: TextureHandle) -> Option<u64> {
        self.textures
            .get(&texture.0)
            .map(|t| hash_of(&t.fingerprints))
    }

    pub fn subresource_fingerprint(
        &self,
        texture: TextureHandle,
        mip: u32,
        layer: u32,
    ) -> Option<u64> {
        let t = self.textures.get(&texture.0)?;
        t.fingerprints.get(t.index(mip, layer)).copied()
    }

    /// Fingerprint a subresource holds right after being cleared to `color`.
    pub fn cleared_fingerprint(color: [f32; 4]) -> u64 {
        hash_of(&("clear", color.map(f32::to_bits)))
    }

    pub fn texture_state(&self, texture: TextureHandle, mip: u32, layer: u32) -> Option<TextureState> {
        let t = self.textures.get(&texture.0)?;
        t.states.get(t.index(mip, layer)).copied()
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| &t.desc)
    }

    /// Texture a view was created from.
    pub fn view_texture(&self, view: TextureViewHandle) -> Option<TextureHandle> {
        self.views.get(&view.0).map(|v| v.texture)
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    pub fn render_pipeline_label(&self, pipeline: RenderPipelineHandle) -> Option<&str> {
        self.render_pipelines
            .get(&pipeline.0)
            .map(|p| p.label.as_str())
    }

    pub fn render_pipeline_constants(
        &self,
        pipeline: RenderPipelineHandle,
    ) -> Option<&SpecializationConstants> {
        self.render_pipelines.get(&pipeline.0).map(|p| &p.constants)
    }

    pub fn render_pipelines_created(&self) -> usize {
        self.render_pipelines_created
    }

    pub fn pipeline_layouts_created(&self) -> usize {
        self.pipeline_layouts_created
    }

    /// Live buffers, textures and views, excluding the swapchain.
    pub fn live_resources(&self) -> usize {
        self.buffers.len() + self.textures.len() + self.views.len()
            - 2 * self.swapchain.len()
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn validation_error(&mut self, message: String) {
        log::error!("[Dummy Validation] {message}");
        self.validation_errors.push(message);
    }

    fn insert_texture(&mut self, desc: TextureDescriptor) -> TextureHandle {
        let count = (desc.mip_levels * desc.layers) as usize;
        let id = self.alloc_id();
        self.textures.insert(
            id,
            DummyTexture {
                desc,
                fingerprints: vec![0; count],
                states: vec![TextureState::Undefined; count],
            },
        );
        TextureHandle(id)
    }

    fn insert_view(&mut self, texture: TextureHandle, range: SubresourceRange) -> TextureViewHandle {
        let id = self.alloc_id();
        self.views.insert(id, DummyView { texture, range });
        TextureViewHandle(id)
    }

    fn record(&mut self, command: Command) {
        let Some(cmd) = self.recording else {
            self.validation_error(format!("{command:?} recorded outside begin_commands"));
            return;
        };
        log::trace!("DummyDevice: record {:?}", command);
        if let Some(buffer) = self.command_buffers.get_mut(&cmd.0) {
            buffer.commands.push(command);
        }
    }

    fn require_pass(&mut self, what: &str, inside: bool) -> bool {
        if self.in_render_pass != inside {
            let place = if inside { "outside" } else { "inside" };
            self.validation_error(format!("{what} recorded {place} a render pass"));
            false
        } else {
            true
        }
    }

    fn check_pipeline_layout(&self, layout: PipelineLayoutHandle) -> RenderResult<()> {
        if self.pipeline_layouts.contains_key(&layout.0) {
            Ok(())
        } else {
            Err(RenderError::InvalidState(format!(
                "unknown pipeline layout {}",
                layout.0
            )))
        }
    }

    fn check_entry_point(
        &self,
        label: &str,
        entry: &EntryPoint<'_>,
        stage: naga::ShaderStage,
        constants: &SpecializationConstants,
    ) -> RenderResult<()> {
        let shader = self.shaders.get(&entry.module.0).ok_or_else(|| {
            RenderError::PipelineCreation {
                label: label.to_string(),
                message: format!("unknown shader module {}", entry.module.0),
            }
        })?;
        shader.require_entry_point(entry.name, stage)?;
        shader.specialize(constants)?;
        Ok(())
    }

    // Replay

    fn execute(&mut self, commands: &[Command]) {
        let mut replay = Replay::default();
        for command in commands {
            match command {
                Command::BeginRenderPass { label, color, depth } => {
                    self.begin_pass_targets(&mut replay, label, color, depth.as_ref());
                }
                Command::EndRenderPass => replay.targets.clear(),
                Command::SetRenderPipeline(p) => {
                    replay.render_pipeline = Some(*p);
                    replay.bind_groups.clear();
                }
                Command::SetComputePipeline(p) => {
                    replay.compute_pipeline = Some(*p);
                    replay.bind_groups.clear();
                }
                Command::SetBindGroup { index, group } => {
                    replay.bind_groups.insert(*index, *group);
                }
                Command::PushConstants { offset, data, .. } => {
                    let end = *offset as usize + data.len();
                    if replay.push_constants.len() < end {
                        replay.push_constants.resize(end, 0);
                    }
                    replay.push_constants[*offset as usize..end].copy_from_slice(data);
                }
                Command::SetVertexBuffer {
                    slot,
                    buffer,
                    offset,
                } => {
                    replay.vertex_buffers.insert(*slot, (*buffer, *offset));
                }
                Command::SetIndexBuffer { buffer, offset, .. } => {
                    replay.index_buffer = Some((*buffer, *offset));
                }
                Command::SetViewport { .. } => {}
                Command::Draw { .. } | Command::DrawIndexed { .. } => {
                    self.check_sampled_states(&replay, "draw");
                    let signature = self.draw_signature(&replay, command);
                    for &(texture, index) in &replay.targets {
                        if let Some(t) = self.textures.get_mut(&texture.0) {
                            t.fingerprints[index] = hash_of(&(t.fingerprints[index], signature));
                        }
                    }
                }
                Command::Dispatch { .. } => {
                    self.check_sampled_states(&replay, "dispatch");
                }
                Command::UpdateBuffer {
                    buffer,
                    offset,
                    data,
                } => {
                    if let Some(b) = self.buffers.get_mut(&buffer.0) {
                        let start = *offset as usize;
                        b.data[start..start + data.len()].copy_from_slice(data);
                    }
                }
                Command::Barrier(barriers) => {
                    for barrier in barriers {
                        self.apply_barrier(barrier);
                    }
                }
            }
        }
    }

    fn begin_pass_targets(
        &mut self,
        replay: &mut Replay,
        label: &str,
        color: &[ColorAttachment],
        depth: Option<&DepthAttachment>,
    ) {
        replay.targets.clear();
        let mut targets = Vec::new();
        for attachment in color {
            targets.push((attachment.view, Some(attachment.load_op), None));
        }
        if let Some(depth) = depth {
            targets.push((depth.view, None, Some(*depth)));
        }

        for (view, color_load, depth) in targets {
            let Some(v) = self.views.get(&view.0) else {
                self.validation_error(format!("pass '{label}' uses an unknown view"));
                continue;
            };
            let (texture, range) = (v.texture, v.range);
            let Some(t) = self.textures.get_mut(&texture.0) else {
                continue;
            };
            let mut errors = Vec::new();
            for index in t.subresources(range) {
                let state = t.states[index];
                let expected: &[TextureState] = match depth {
                    None => &[TextureState::ColorAttachment],
                    Some(d) if d.read_only => {
                        &[TextureState::DepthReadOnly, TextureState::DepthAttachment]
                    }
                    Some(_) => &[TextureState::DepthAttachment],
                };
                if !expected.contains(&state) {
                    errors.push(format!(
                        "pass '{label}' attaches '{}' in state {state:?}",
                        t.name()
                    ));
                }

                let load = match (color_load, depth) {
                    (Some(LoadOp::Clear(c)), _) => Some(hash_of(&("clear", c.map(f32::to_bits)))),
                    (_, Some(DepthAttachment { load_op: LoadOp::Clear(d), .. })) => {
                        Some(hash_of(&("clear", d.to_bits())))
                    }
                    (Some(LoadOp::DontCare), _)
                    | (_, Some(DepthAttachment { load_op: LoadOp::DontCare, .. })) => {
                        Some(hash_of(&"undefined"))
                    }
                    _ => None,
                };
                if let Some(fingerprint) = load {
                    t.fingerprints[index] = fingerprint;
                }
                if depth.map_or(true, |d| !d.read_only) {
                    replay.targets.push((texture, index));
                }
            }
            for error in errors {
                self.validation_error(error);
            }
        }
    }

    fn apply_barrier(&mut self, barrier: &Barrier) {
        let Barrier::Texture {
            texture,
            range,
            before,
            after,
        } = barrier
        else {
            return;
        };
        let Some(t) = self.textures.get_mut(&texture.0) else {
            self.validation_error(format!("barrier on unknown texture {}", texture.0));
            return;
        };
        let mut errors = Vec::new();
        if *after == TextureState::Undefined {
            errors.push(format!("barrier transitions '{}' to Undefined", t.name()));
        }
        for index in t.subresources(*range) {
            let state = t.states[index];
            if *before != TextureState::Undefined && state != *before {
                errors.push(format!(
                    "barrier on '{}' expects {before:?} but subresource {index} is {state:?}",
                    t.name()
                ));
            }
            t.states[index] = *after;
        }
        for error in errors {
            self.validation_error(error);
        }
    }

    fn bound_textures(&self, replay: &Replay) -> Vec<(TextureHandle, SubresourceRange)> {
        replay
            .bind_groups
            .values()
            .filter_map(|g| self.bind_groups.get(&g.0))
            .flat_map(|g| g.entries.iter())
            .filter_map(|e| match e.resource {
                BindingResource::Texture(view) => self.views.get(&view.0),
                _ => None,
            })
            .map(|v| (v.texture, v.range))
            .collect()
    }

    fn check_sampled_states(&mut self, replay: &Replay, what: &str) {
        let mut errors = Vec::new();
        for (texture, range) in self.bound_textures(replay) {
            let Some(t) = self.textures.get(&texture.0) else {
                continue;
            };
            for index in t.subresources(range) {
                let state = t.states[index];
                if !matches!(state, TextureState::ShaderRead | TextureState::DepthReadOnly) {
                    errors.push(format!("{what} samples '{}' in state {state:?}", t.name()));
                }
            }
        }
        for error in errors {
            self.validation_error(error);
        }
    }

    fn draw_signature(&self, replay: &Replay, draw: &Command) -> u64 {
        let mut h = DefaultHasher::new();
        if let Some(p) = replay
            .render_pipeline
            .and_then(|p| self.render_pipelines.get(&p.0))
        {
            p.label.hash(&mut h);
            for (name, value) in &p.constants {
                name.hash(&mut h);
                value.to_bits().hash(&mut h);
            }
        }
        for (index, group) in &replay.bind_groups {
            index.hash(&mut h);
            if let Some(group) = self.bind_groups.get(&group.0) {
                for entry in &group.entries {
                    entry.binding.hash(&mut h);
                    self.hash_resource(&entry.resource, &mut h);
                }
            }
        }
        replay.push_constants.hash(&mut h);
        for (slot, (buffer, offset)) in &replay.vertex_buffers {
            slot.hash(&mut h);
            offset.hash(&mut h);
            self.hash_buffer(*buffer, 0, None, &mut h);
        }
        if let Some((buffer, offset)) = replay.index_buffer {
            offset.hash(&mut h);
            self.hash_buffer(buffer, 0, None, &mut h);
        }
        match draw {
            Command::Draw {
                vertices,
                instances,
            } => (vertices, instances).hash(&mut h),
            Command::DrawIndexed {
                indices,
                base_vertex,
                instances,
            } => (indices, base_vertex, instances).hash(&mut h),
            _ => {}
        }
        h.finish()
    }

    fn hash_resource(&self, resource: &BindingResource, h: &mut DefaultHasher) {
        match resource {
            BindingResource::Buffer {
                buffer,
                offset,
                size,
            } => self.hash_buffer(*buffer, *offset, *size, h),
            BindingResource::Texture(view) => {
                if let Some(v) = self.views.get(&view.0) {
                    if let Some(t) = self.textures.get(&v.texture.0) {
                        for index in t.subresources(v.range) {
                            t.fingerprints[index].hash(h);
                        }
                    }
                }
            }
            BindingResource::Sampler(_) => "sampler".hash(h),
        }
    }

    fn hash_buffer(&self, buffer: BufferHandle, offset: u64, size: Option<u64>, h: &mut DefaultHasher) {
        if let Some(b) = self.buffers.get(&buffer.0) {
            let start = (offset as usize).min(b.data.len());
            let end = size.map_or(b.data.len(), |s| (start + s as usize).min(b.data.len()));
            b.data[start..end].hash(h);
        }
    }
}

fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut h = DefaultHasher::new();
    value.hash(&mut h);
    h.finish()
}

fn missing(kind: &'static str, id: u64) -> RenderError {
    RenderError::InvalidState(format!("unknown {kind} {id}"))
}

impl RenderDevice for DummyDevice {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> RenderResult<BufferHandle> {
        log::trace!(
            "DummyDevice: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        if desc.size == 0 {
            return Err(RenderError::resource("buffer", "zero-sized buffer"));
        }
        let id = self.alloc_id();
        self.buffers.insert(
            id,
            DummyBuffer {
                label: desc.label.clone(),
                usage: desc.usage,
                data: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let b = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| missing("buffer", buffer.0))?;
        if !b.usage.contains(BufferUsage::MAP_WRITE) {
            return Err(RenderError::InvalidState(format!(
                "buffer {:?} is not host-visible",
                b.label
            )));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > b.data.len() {
            return Err(RenderError::InvalidState(format!(
                "write of {} bytes at {offset} overflows buffer {:?}",
                data.len(),
                b.label
            )));
        }
        b.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> RenderResult<TextureHandle> {
        log::trace!(
            "DummyDevice: creating texture {:?} ({}x{}, {} layers, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.layers,
            desc.mip_levels
        );
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 || desc.mip_levels == 0 {
            return Err(RenderError::resource("texture", "zero-sized texture"));
        }
        if desc.dimension == TextureDimension::Cube && desc.layers != 6 {
            return Err(RenderError::resource("texture", "cube textures need 6 layers"));
        }
        if desc.layers > self.limits.max_texture_array_layers {
            return Err(RenderError::resource("texture", "too many array layers"));
        }
        let max_mips = 32 - desc.width.max(desc.height).leading_zeros();
        if desc.mip_levels > max_mips {
            return Err(RenderError::resource("texture", "mip chain longer than the base size"));
        }
        Ok(self.insert_texture(desc.clone()))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        region: TextureRegion,
        data: &[u8],
    ) -> RenderResult<()> {
        let t = self
            .textures
            .get_mut(&texture.0)
            .ok_or_else(|| missing("texture", texture.0))?;
        let expected = (region.width * region.height * t.desc.format.bytes_per_pixel()) as usize;
        if data.len() != expected {
            return Err(RenderError::InvalidState(format!(
                "upload to '{}' has {} bytes, expected {expected}",
                t.name(),
                data.len()
            )));
        }
        if region.mip >= t.desc.mip_levels || region.layer >= t.desc.layers {
            return Err(RenderError::InvalidState(format!(
                "upload to '{}' outside its subresources",
                t.name()
            )));
        }
        let index = t.index(region.mip, region.layer);
        t.fingerprints[index] = hash_of(data);
        t.states[index] = TextureState::ShaderRead;
        Ok(())
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> RenderResult<TextureViewHandle> {
        let t = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| missing("texture", texture.0))?;
        let range = desc.range.resolve(t.desc.mip_levels, t.desc.layers);
        if range.mip_count == 0
            || range.layer_count == 0
            || range.base_mip + range.mip_count > t.desc.mip_levels
            || range.base_layer + range.layer_count > t.desc.layers
        {
            return Err(RenderError::resource("texture view", "range outside the texture"));
        }
        let layers_ok = match desc.dimension {
            TextureViewDimension::D2 => range.layer_count == 1,
            TextureViewDimension::Cube => range.layer_count == 6,
            TextureViewDimension::D2Array => true,
        };
        if !layers_ok {
            return Err(RenderError::resource(
                "texture view",
                format!("{:?} view over {} layers", desc.dimension, range.layer_count),
            ));
        }
        Ok(self.insert_view(texture, range))
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> RenderResult<SamplerHandle> {
        log::trace!("DummyDevice: creating sampler {:?}", desc.label);
        let id = self.alloc_id();
        self.samplers.insert(id, desc.clone());
        Ok(SamplerHandle(id))
    }

    fn create_shader_module(
        &mut self,
        desc: &ShaderModuleDescriptor<'_>,
    ) -> RenderResult<ShaderModuleHandle> {
        log::trace!("DummyDevice: parsing shader '{}'", desc.label);
        let parsed = ParsedShader::parse(desc.label, desc.source)?;
        let id = self.alloc_id();
        self.shaders.insert(id, parsed);
        Ok(ShaderModuleHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> RenderResult<BindGroupLayoutHandle> {
        let mut bindings: Vec<u32> = entries.iter().map(|e| e.binding).collect();
        bindings.sort_unstable();
        bindings.dedup();
        if bindings.len() != entries.len() {
            return Err(RenderError::resource("bind group layout", "duplicate binding"));
        }
        let id = self.alloc_id();
        self.bind_group_layouts.insert(id, entries.to_vec());
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDescriptor<'_>,
    ) -> RenderResult<PipelineLayoutHandle> {
        for layout in desc.bind_group_layouts {
            if !self.bind_group_layouts.contains_key(&layout.0) {
                return Err(missing("bind group layout", layout.0));
            }
        }
        let push_size: u32 = desc
            .push_constant_ranges
            .iter()
            .map(|r| r.offset + r.size)
            .max()
            .unwrap_or(0);
        if push_size > self.limits.max_push_constant_size {
            return Err(RenderError::resource(
                "pipeline layout",
                format!("{push_size} bytes of push constants exceed the device limit"),
            ));
        }
        let id = self.alloc_id();
        self.pipeline_layouts.insert(
            id,
            DummyPipelineLayout {
                groups: desc.bind_group_layouts.to_vec(),
                push_constant_ranges: desc.push_constant_ranges.to_vec(),
            },
        );
        self.pipeline_layouts_created += 1;
        log::trace!("DummyDevice: created pipeline layout '{}'", desc.label);
        Ok(PipelineLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[BindGroupEntry],
    ) -> RenderResult<BindGroupHandle> {
        let layout_entries = self
            .bind_group_layouts
            .get(&layout.0)
            .ok_or_else(|| missing("bind group layout", layout.0))?;

        for layout_entry in layout_entries {
            let entry = entries
                .iter()
                .find(|e| e.binding == layout_entry.binding)
                .ok_or_else(|| {
                    RenderError::resource(
                        "bind group",
                        format!("binding {} left empty", layout_entry.binding),
                    )
                })?;
            let compatible = match (&layout_entry.ty, &entry.resource) {
                (
                    BindingType::UniformBuffer | BindingType::StorageBuffer { .. },
                    BindingResource::Buffer { buffer, .. },
                ) => self.buffers.contains_key(&buffer.0),
                (BindingType::Texture { .. }, BindingResource::Texture(view)) => {
                    self.views.contains_key(&view.0)
                }
                (BindingType::Sampler { .. }, BindingResource::Sampler(sampler)) => {
                    self.samplers.contains_key(&sampler.0)
                }
                _ => false,
            };
            if !compatible {
                return Err(RenderError::resource(
                    "bind group",
                    format!("binding {} does not match its layout", entry.binding),
                ));
            }
        }
        if entries.len() != layout_entries.len() {
            return Err(RenderError::resource("bind group", "entries not in the layout"));
        }

        let id = self.alloc_id();
        self.bind_groups.insert(
            id,
            DummyBindGroup {
                entries: entries.to_vec(),
            },
        );
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor<'_>,
    ) -> RenderResult<RenderPipelineHandle> {
        log::trace!("DummyDevice: creating render pipeline '{}'", desc.label);
        self.check_pipeline_layout(desc.layout)?;
        self.check_entry_point(desc.label, &desc.vertex, naga::ShaderStage::Vertex, desc.constants)?;
        if let Some(fragment) = &desc.fragment {
            self.check_entry_point(desc.label, fragment, naga::ShaderStage::Fragment, desc.constants)?;
        }
        let id = self.alloc_id();
        self.render_pipelines.insert(
            id,
            DummyPipeline {
                label: desc.label.to_string(),
                layout: desc.layout,
                constants: desc.constants.clone(),
            },
        );
        self.render_pipelines_created += 1;
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor<'_>,
    ) -> RenderResult<ComputePipelineHandle> {
        log::trace!("DummyDevice: creating compute pipeline '{}'", desc.label);
        self.check_pipeline_layout(desc.layout)?;
        self.check_entry_point(desc.label, &desc.compute, naga::ShaderStage::Compute, desc.constants)?;
        let id = self.alloc_id();
        self.compute_pipelines.insert(
            id,
            DummyPipeline {
                label: desc.label.to_string(),
                layout: desc.layout,
                constants: desc.constants.clone(),
            },
        );
        Ok(ComputePipelineHandle(id))
    }

    fn create_command_buffer(&mut self) -> RenderResult<CommandBufferHandle> {
        let id = self.alloc_id();
        self.command_buffers.insert(id, DummyCommandBuffer::default());
        Ok(CommandBufferHandle(id))
    }

    fn create_fence(&mut self, signaled: bool) -> RenderResult<FenceHandle> {
        let id = self.alloc_id();
        self.fences.insert(id, signaled);
        Ok(FenceHandle(id))
    }

    fn create_semaphore(&mut self) -> RenderResult<SemaphoreHandle> {
        let id = self.alloc_id();
        self.semaphores.insert(id, false);
        Ok(SemaphoreHandle(id))
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> RenderResult<()> {
        match self.fences.get(&fence.0) {
            Some(true) => Ok(()),
            Some(false) => Err(RenderError::FenceTimeout(timeout)),
            None => Err(missing("fence", fence.0)),
        }
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> RenderResult<()> {
        let signaled = self
            .fences
            .get_mut(&fence.0)
            .ok_or_else(|| missing("fence", fence.0))?;
        *signaled = false;
        Ok(())
    }

    fn begin_commands(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        if let Some(current) = self.recording {
            return Err(RenderError::InvalidState(format!(
                "command buffer {} is still recording",
                current.0
            )));
        }
        let buffer = self
            .command_buffers
            .get_mut(&command_buffer.0)
            .ok_or_else(|| missing("command buffer", command_buffer.0))?;
        buffer.commands.clear();
        buffer.recording = true;
        self.recording = Some(command_buffer);
        self.current_layout = None;
        Ok(())
    }

    fn end_commands(&mut self) -> RenderResult<()> {
        let cmd = self
            .recording
            .take()
            .ok_or_else(|| RenderError::InvalidState("no command buffer is recording".into()))?;
        if self.in_render_pass {
            self.in_render_pass = false;
            return Err(RenderError::InvalidState(
                "command buffer closed inside a render pass".into(),
            ));
        }
        if let Some(buffer) = self.command_buffers.get_mut(&cmd.0) {
            buffer.recording = false;
        }
        Ok(())
    }

    fn submit(&mut self, info: &SubmitInfo) -> RenderResult<()> {
        let buffer = self
            .command_buffers
            .get(&info.command_buffer.0)
            .ok_or_else(|| missing("command buffer", info.command_buffer.0))?;
        if buffer.recording {
            return Err(RenderError::Submission(
                "command buffer submitted while recording".into(),
            ));
        }
        let commands = buffer.commands.clone();

        if let Some(wait) = info.wait {
            match self.semaphores.get_mut(&wait.0) {
                Some(signaled) if *signaled => *signaled = false,
                _ => self.validation_error(format!("submit waits on unsignaled semaphore {}", wait.0)),
            }
        }
        if let Some(fence) = info.fence {
            if self.fences.get(&fence.0).copied().unwrap_or(false) {
                self.validation_error(format!("submit with fence {} still signaled", fence.0));
            }
        }

        log::trace!("DummyDevice: submit {} commands", commands.len());
        self.execute(&commands);

        if !self.stalled {
            if let Some(signal) = info.signal {
                self.semaphores.insert(signal.0, true);
            }
            if let Some(fence) = info.fence {
                self.fences.insert(fence.0, true);
            }
        }
        self.submissions.push(Submission {
            commands,
            signaled_fence: info.fence,
        });
        Ok(())
    }

    fn queue_wait_idle(&mut self) -> RenderResult<()> {
        if self.stalled {
            Err(RenderError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor<'_>) {
        if !self.require_pass("begin_render_pass", false) {
            return;
        }
        if desc.color_attachments.is_empty() && desc.depth_attachment.is_none() {
            self.validation_error(format!("pass '{}' has no attachments", desc.label));
        }
        self.in_render_pass = true;
        self.record(Command::BeginRenderPass {
            label: desc.label.to_string(),
            color: desc.color_attachments.to_vec(),
            depth: desc.depth_attachment,
        });
    }

    fn end_render_pass(&mut self) {
        if self.require_pass("end_render_pass", true) {
            self.in_render_pass = false;
            self.record(Command::EndRenderPass);
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        match self.render_pipelines.get(&pipeline.0) {
            Some(p) => self.current_layout = Some(p.layout),
            None => self.validation_error(format!("unknown render pipeline {}", pipeline.0)),
        }
        self.record(Command::SetRenderPipeline(pipeline));
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.require_pass("set_compute_pipeline", false);
        match self.compute_pipelines.get(&pipeline.0) {
            Some(p) => self.current_layout = Some(p.layout),
            None => self.validation_error(format!("unknown compute pipeline {}", pipeline.0)),
        }
        self.record(Command::SetComputePipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        let groups = self
            .current_layout
            .and_then(|l| self.pipeline_layouts.get(&l.0))
            .map(|l| l.groups.len());
        match groups {
            None => self.validation_error("set_bind_group without a pipeline".into()),
            Some(n) if index as usize >= n => {
                self.validation_error(format!("bind group index {index} beyond layout ({n} groups)"))
            }
            Some(_) if !self.bind_groups.contains_key(&bind_group.0) => {
                self.validation_error(format!("unknown bind group {}", bind_group.0))
            }
            Some(_) => {}
        }
        self.record(Command::SetBindGroup {
            index,
            group: bind_group,
        });
    }

    fn push_constants(&mut self, stages: ShaderStages, offset: u32, data: &[u8]) {
        let end = offset + data.len() as u32;
        let covered = self
            .current_layout
            .and_then(|l| self.pipeline_layouts.get(&l.0))
            .map(|l| {
                l.push_constant_ranges
                    .iter()
                    .any(|r| r.stages.contains(stages) && r.offset <= offset && end <= r.offset + r.size)
            })
            .unwrap_or(false);
        if !covered {
            self.validation_error(format!(
                "push constants {offset}..{end} for {stages:?} outside the pipeline layout"
            ));
        }
        self.record(Command::PushConstants {
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record(Command::SetVertexBuffer {
            slot,
            buffer,
            offset,
        });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        self.record(Command::SetIndexBuffer {
            buffer,
            offset,
            format,
        });
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.record(Command::SetViewport { width, height });
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.require_pass("draw", true);
        if self.current_layout.is_none() {
            self.validation_error("draw without a pipeline".into());
        }
        self.record(Command::Draw {
            vertices,
            instances,
        });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.require_pass("draw_indexed", true);
        if self.current_layout.is_none() {
            self.validation_error("draw_indexed without a pipeline".into());
        }
        self.record(Command::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.require_pass("dispatch", false);
        let max = self.limits.max_compute_workgroups_per_dimension;
        if x == 0 || y == 0 || z == 0 || x > max || y > max || z > max {
            self.validation_error(format!("dispatch ({x}, {y}, {z}) outside device limits"));
        }
        self.record(Command::Dispatch { x, y, z });
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        self.require_pass("update_buffer", false);
        if data.len() > MAX_INLINE_UPDATE || data.len() % 4 != 0 || offset % 4 != 0 {
            self.validation_error(format!(
                "inline update of {} bytes at {offset} violates size or alignment",
                data.len()
            ));
        }
        match self.buffers.get(&buffer.0) {
            Some(b) if offset as usize + data.len() > b.data.len() => {
                self.validation_error(format!("inline update overflows buffer {:?}", b.label))
            }
            Some(_) => {}
            None => self.validation_error(format!("update of unknown buffer {}", buffer.0)),
        }
        self.record(Command::UpdateBuffer {
            buffer,
            offset,
            data: data.to_vec(),
        });
    }

    fn pipeline_barrier(&mut self, barriers: &[Barrier]) {
        self.require_pass("pipeline_barrier", false);
        if !barriers.is_empty() {
            self.record(Command::Barrier(barriers.to_vec()));
        }
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.swapchain_format
    }

    fn swapchain_extent(&self) -> (u32, u32) {
        self.swapchain_extent
    }

    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> RenderResult<SwapchainImage> {
        match self.semaphores.get(&signal.0) {
            Some(false) => {}
            Some(true) => self.validation_error(format!(
                "acquire signals semaphore {} which is already signaled",
                signal.0
            )),
            None => return Err(missing("semaphore", signal.0)),
        }
        if !self.stalled {
            self.semaphores.insert(signal.0, true);
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.swapchain.len() as u32;
        let (texture, view) = self.swapchain[index as usize];
        Ok(SwapchainImage {
            index,
            texture,
            view,
        })
    }

    fn present(&mut self, image: &SwapchainImage, wait: SemaphoreHandle) -> RenderResult<()> {
        match self.semaphores.get_mut(&wait.0) {
            Some(signaled) if *signaled => *signaled = false,
            Some(_) => self.validation_error(format!("present waits on unsignaled semaphore {}", wait.0)),
            None => return Err(missing("semaphore", wait.0)),
        }
        if self.texture_state(image.texture, 0, 0) != Some(TextureState::Present) {
            self.validation_error(format!(
                "swapchain image {} presented in state {:?}",
                image.index,
                self.texture_state(image.texture, 0, 0)
            ));
        }
        let fingerprint = self.subresource_fingerprint(image.texture, 0, 0).unwrap_or(0);
        self.presents.push(PresentRecord {
            image_index: image.index,
            fingerprint,
        });
        Ok(())
    }

    fn destroy(&mut self, handle: AnyHandle) {
        let removed = match handle {
            AnyHandle::Buffer(h) => self.buffers.remove(&h.0).is_some(),
            AnyHandle::Texture(h) => self.textures.remove(&h.0).is_some(),
            AnyHandle::TextureView(h) => self.views.remove(&h.0).is_some(),
            AnyHandle::Sampler(h) => self.samplers.remove(&h.0).is_some(),
            AnyHandle::ShaderModule(h) => self.shaders.remove(&h.0).is_some(),
            AnyHandle::BindGroupLayout(h) => self.bind_group_layouts.remove(&h.0).is_some(),
            AnyHandle::BindGroup(h) => self.bind_groups.remove(&h.0).is_some(),
            AnyHandle::PipelineLayout(h) => self.pipeline_layouts.remove(&h.0).is_some(),
            AnyHandle::RenderPipeline(h) => self.render_pipelines.remove(&h.0).is_some(),
            AnyHandle::ComputePipeline(h) => self.compute_pipelines.remove(&h.0).is_some(),
            AnyHandle::CommandBuffer(h) => self.command_buffers.remove(&h.0).is_some(),
            AnyHandle::Fence(h) => self.fences.remove(&h.0).is_some(),
            AnyHandle::Semaphore(h) => self.semaphores.remove(&h.0).is_some(),
        };
        if !removed {
            self.validation_error(format!("destroy of unknown object {handle:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(index) - 1);
    let y = f32(i32(index & 1u) * 2 - 1);
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

    struct Target {
        texture: TextureHandle,
        view: TextureViewHandle,
        pipeline: RenderPipelineHandle,
    }

    fn setup(device: &mut DummyDevice) -> Target {
        let texture = device
            .create_texture(&TextureDescriptor::render_target(
                "target",
                4,
                4,
                TextureFormat::Rgba8Unorm,
            ))
            .unwrap();
        let view = device
            .create_texture_view(texture, &TextureViewDescriptor::attachment(0, 0))
            .unwrap();
        let module = device
            .create_shader_module(&ShaderModuleDescriptor {
                label: "triangle",
                source: TRIANGLE,
            })
            .unwrap();
        let layout = device
            .create_pipeline_layout(&PipelineLayoutDescriptor {
                label: "empty",
                bind_group_layouts: &[],
                push_constant_ranges: &[],
            })
            .unwrap();
        let state = PipelineState {
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            color_targets: vec![ColorTargetState {
                format: TextureFormat::Rgba8Unorm,
                blend: None,
                write_mask: ColorWrites::ALL,
            }],
            vertex_layouts: vec![],
        };
        let pipeline = device
            .create_render_pipeline(&RenderPipelineDescriptor {
                label: "triangle",
                layout,
                vertex: EntryPoint {
                    module,
                    name: "vs_main",
                },
                fragment: Some(EntryPoint {
                    module,
                    name: "fs_main",
                }),
                state: &state,
                constants: &SpecializationConstants::new(),
            })
            .unwrap();
        Target {
            texture,
            view,
            pipeline,
        }
    }

    fn draw_triangle(device: &mut DummyDevice, target: &Target, barrier: bool) {
        let cmd = device.create_command_buffer().unwrap();
        device.begin_commands(cmd).unwrap();
        if barrier {
            device.pipeline_barrier(&[Barrier::Texture {
                texture: target.texture,
                range: SubresourceRange::ALL,
                before: TextureState::Undefined,
                after: TextureState::ColorAttachment,
            }]);
        }
        device.begin_render_pass(&RenderPassDescriptor {
            label: "triangle pass",
            color_attachments: &[ColorAttachment {
                view: target.view,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_attachment: None,
            width: 4,
            height: 4,
        });
        device.set_render_pipeline(target.pipeline);
        device.draw(0..3, 0..1);
        device.end_render_pass();
        device.end_commands().unwrap();
        device
            .submit(&SubmitInfo {
                command_buffer: cmd,
                wait: None,
                signal: None,
                fence: None,
            })
            .unwrap();
    }

    #[test]
    fn test_draw_changes_fingerprint_deterministically() {
        let mut a = DummyDevice::new();
        let target_a = setup(&mut a);
        draw_triangle(&mut a, &target_a, true);

        let mut b = DummyDevice::new();
        let target_b = setup(&mut b);
        draw_triangle(&mut b, &target_b, true);

        let fp_a = a.subresource_fingerprint(target_a.texture, 0, 0).unwrap();
        let fp_b = b.subresource_fingerprint(target_b.texture, 0, 0).unwrap();
        assert_eq!(fp_a, fp_b);
        assert_ne!(fp_a, DummyDevice::cleared_fingerprint([0.0, 0.0, 0.0, 1.0]));
        assert!(a.validation_errors().is_empty());
    }

    #[test]
    fn test_missing_barrier_is_reported() {
        let mut device = DummyDevice::new();
        let target = setup(&mut device);
        draw_triangle(&mut device, &target, false);
        assert_eq!(device.validation_errors().len(), 1);
        assert!(device.validation_errors()[0].contains("Undefined"));
    }

    #[test]
    fn test_submission_summary() {
        let mut device = DummyDevice::new();
        let target = setup(&mut device);
        draw_triangle(&mut device, &target, true);
        let passes = device.submissions()[0].render_passes();
        assert_eq!(
            passes,
            vec![PassRecord {
                label: "triangle pass".into(),
                draws: 1
            }]
        );
    }

    #[test]
    fn test_unsignaled_fence_times_out() {
        let mut device = DummyDevice::new();
        let fence = device.create_fence(false).unwrap();
        let timeout = Duration::from_millis(10);
        assert_eq!(
            device.wait_fence(fence, timeout),
            Err(RenderError::FenceTimeout(timeout))
        );
    }

    #[test]
    fn test_submit_signals_fence_unless_stalled() {
        let mut device = DummyDevice::new();
        let cmd = device.create_command_buffer().unwrap();
        let fence = device.create_fence(false).unwrap();
        let info = SubmitInfo {
            command_buffer: cmd,
            wait: None,
            signal: None,
            fence: Some(fence),
        };

        device.begin_commands(cmd).unwrap();
        device.end_commands().unwrap();
        device.submit(&info).unwrap();
        assert!(device.wait_fence(fence, Duration::ZERO).is_ok());

        device.reset_fence(fence).unwrap();
        device.set_stalled(true);
        device.begin_commands(cmd).unwrap();
        device.end_commands().unwrap();
        device.submit(&info).unwrap();
        assert!(device.wait_fence(fence, Duration::ZERO).is_err());
    }

    #[test]
    fn test_inline_update_limits() {
        let mut device = DummyDevice::new();
        let buffer = device
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 16,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            })
            .unwrap();
        let cmd = device.create_command_buffer().unwrap();
        device.begin_commands(cmd).unwrap();
        device.update_buffer(buffer, 0, &[1, 2, 3, 4]);
        assert!(device.validation_errors().is_empty());
        device.update_buffer(buffer, 0, &[1, 2, 3]);
        assert_eq!(device.validation_errors().len(), 1);
    }

    #[test]
    fn test_cube_view_needs_six_layers() {
        let mut device = DummyDevice::new();
        let cube = device
            .create_texture(&TextureDescriptor::cube("env", 8, 1, TextureFormat::Rgba16Float))
            .unwrap();
        assert!(device
            .create_texture_view(cube, &TextureViewDescriptor::whole(TextureViewDimension::Cube))
            .is_ok());
        assert!(device
            .create_texture_view(
                cube,
                &TextureViewDescriptor {
                    dimension: TextureViewDimension::Cube,
                    range: SubresourceRange::single(0, 0),
                }
            )
            .is_err());
    }

    #[test]
    fn test_destroy_twice_is_reported() {
        let mut device = DummyDevice::new();
        let sampler = device.create_sampler(&SamplerDescriptor::default()).unwrap();
        device.destroy(sampler.into());
        assert!(device.validation_errors().is_empty());
        device.destroy(sampler.into());
        assert_eq!(device.validation_errors().len(), 1);
    }
}
