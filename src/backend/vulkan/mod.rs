//! Native Vulkan backend implementation using ash.
//!
//! This backend provides:
//! - Validation layers through the debug-utils messenger
//! - gpu-allocator for memory management
//! - Dynamic rendering (Vulkan 1.3 core)
//! - WGSL shaders compiled to SPIR-V with naga, specialized per pipeline

mod barriers;
mod conversion;
mod debug;
mod device;
mod instance;
mod pipeline;
mod swapchain;

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::ops::Range;
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::backend::shader::ParsedShader;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{RenderError, RenderResult};

use self::barriers::{texture_layout, BarrierBatch};
use self::conversion::*;
pub use self::swapchain::SurfaceConfig;
use self::swapchain::VulkanSwapchain;

struct VkBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

struct VkTexture {
    image: vk::Image,
    /// `None` for swapchain images, which the swapchain owns.
    allocation: Option<Allocation>,
    desc: TextureDescriptor,
}

struct VkView {
    view: vk::ImageView,
    format: TextureFormat,
    owned: bool,
}

struct VkSetLayout {
    layout: vk::DescriptorSetLayout,
    entries: Vec<BindGroupLayoutEntry>,
}

struct VkPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

/// Vulkan implementation of [`RenderDevice`].
pub struct VulkanDevice {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    limits: DeviceLimits,
    swapchain: Option<VulkanSwapchain>,
    swapchain_handles: Vec<(TextureHandle, TextureViewHandle)>,

    next_id: u64,
    buffers: HashMap<u64, VkBuffer>,
    textures: HashMap<u64, VkTexture>,
    views: HashMap<u64, VkView>,
    samplers: HashMap<u64, vk::Sampler>,
    shaders: HashMap<u64, ParsedShader>,
    set_layouts: HashMap<u64, VkSetLayout>,
    pipeline_layouts: HashMap<u64, vk::PipelineLayout>,
    bind_groups: HashMap<u64, vk::DescriptorSet>,
    render_pipelines: HashMap<u64, VkPipeline>,
    compute_pipelines: HashMap<u64, VkPipeline>,
    command_buffers: HashMap<u64, vk::CommandBuffer>,
    fences: HashMap<u64, vk::Fence>,
    semaphores: HashMap<u64, vk::Semaphore>,

    recording: Option<vk::CommandBuffer>,
    bound: Option<(vk::PipelineBindPoint, vk::PipelineLayout)>,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("validation", &self.debug.is_some())
            .field("surface", &self.swapchain.is_some())
            .finish()
    }
}

fn vk_error(what: &str) -> impl Fn(vk::Result) -> RenderError + '_ {
    move |e| match e {
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
        _ => RenderError::resource("vulkan", format!("Failed to {what}: {:?}", e)),
    }
}

impl VulkanDevice {
    /// Create a device presenting to `window`.
    pub fn new<W>(window: &W, surface: SurfaceConfig, validation: bool) -> RenderResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| RenderError::Surface(format!("display handle unavailable: {e}")))?
            .as_raw();
        let handle = window
            .window_handle()
            .map_err(|e| RenderError::Surface(format!("window handle unavailable: {e}")))?
            .as_raw();
        Self::init(Some((display, handle, surface)), validation)
    }

    /// Create a device without a surface, for offscreen work such as baking.
    pub fn headless(validation: bool) -> RenderResult<Self> {
        Self::init(None, validation)
    }

    fn init(
        window: Option<(RawDisplayHandle, RawWindowHandle, SurfaceConfig)>,
        validation: bool,
    ) -> RenderResult<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| RenderError::DeviceCreation(format!("Failed to load Vulkan: {e}")))?;

        let bundle = instance::create_instance(&entry, window.map(|w| w.0), validation)?;
        let instance = bundle.instance;

        let surface = match window {
            Some((display, handle, _)) => Some(
                unsafe { ash_window::create_surface(&entry, &instance, display, handle, None) }
                    .map_err(|e| RenderError::Surface(format!("Failed to create surface: {:?}", e)))?,
            ),
            None => None,
        };

        let physical_device = device::select_physical_device(&instance)?;
        let queue_family = device::find_graphics_queue_family(&instance, physical_device)?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        if let Some(surface) = surface {
            let supported = unsafe {
                surface_loader.get_physical_device_surface_support(
                    physical_device,
                    queue_family,
                    surface,
                )
            }
            .unwrap_or(false);
            if !supported {
                return Err(RenderError::Unsupported(
                    "graphics queue cannot present to the surface".into(),
                ));
            }
        }

        let device = device::create_logical_device(
            &instance,
            physical_device,
            queue_family,
            surface.is_some(),
        )?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| {
            RenderError::DeviceCreation(format!("Failed to create memory allocator: {e}"))
        })?;

        let command_pool = device::create_command_pool(&device, queue_family)?;
        let descriptor_pool = device::create_descriptor_pool(&device)?;
        let limits = device::query_limits(&instance, physical_device);

        let swapchain = match (surface, window) {
            (Some(surface), Some((_, _, config))) => Some(VulkanSwapchain::new(
                &instance,
                &device,
                physical_device,
                surface_loader,
                surface,
                config,
            )?),
            _ => None,
        };

        log::info!(
            "Vulkan device initialized (validation: {}, surface: {})",
            bundle.debug.is_some(),
            swapchain.is_some()
        );

        let mut this = Self {
            _entry: entry,
            instance,
            debug: bundle.debug,
            physical_device,
            device,
            queue,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            command_pool,
            descriptor_pool,
            limits,
            swapchain,
            swapchain_handles: Vec::new(),
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            samplers: HashMap::new(),
            shaders: HashMap::new(),
            set_layouts: HashMap::new(),
            pipeline_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            command_buffers: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            recording: None,
            bound: None,
        };
        this.register_swapchain_images();
        Ok(this)
    }

    /// Recreate the swapchain after the window changed size.
    pub fn resize_surface(&mut self, width: u32, height: u32) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(vk_error("wait for device idle"))?;
        self.unregister_swapchain_images();
        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.recreate(&self.device, self.physical_device, width, height)?;
        }
        self.register_swapchain_images();
        Ok(())
    }

    fn register_swapchain_images(&mut self) {
        let Some(swapchain) = self.swapchain.as_ref() else {
            return;
        };
        let images: Vec<_> = swapchain
            .images
            .iter()
            .copied()
            .zip(swapchain.image_views.iter().copied())
            .collect();
        let (format, extent) = (swapchain.format, swapchain.extent);

        for (i, (image, view)) in images.into_iter().enumerate() {
            let texture = TextureHandle(self.alloc_id());
            self.textures.insert(
                texture.0,
                VkTexture {
                    image,
                    allocation: None,
                    desc: TextureDescriptor {
                        usage: TextureUsage::RENDER_ATTACHMENT,
                        ..TextureDescriptor::render_target(
                            &format!("swapchain image {i}"),
                            extent.width,
                            extent.height,
                            format,
                        )
                    },
                },
            );
            let view_handle = TextureViewHandle(self.alloc_id());
            self.views.insert(
                view_handle.0,
                VkView {
                    view,
                    format,
                    owned: false,
                },
            );
            self.swapchain_handles.push((texture, view_handle));
        }
    }

    fn unregister_swapchain_images(&mut self) {
        for (texture, view) in self.swapchain_handles.drain(..) {
            self.textures.remove(&texture.0);
            self.views.remove(&view.0);
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn free_allocation(&self, allocation: Option<Allocation>) {
        if let Some(allocation) = allocation {
            if let Err(e) = self.allocator.lock().free(allocation) {
                log::error!("Failed to free allocation: {}", e);
            }
        }
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> RenderResult<Allocation> {
        self.allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| RenderError::resource("memory", format!("Failed to allocate {name}: {e}")))
    }

    fn create_raw_buffer(
        &self,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<(vk::Buffer, Allocation)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(vk_error("create buffer"))?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .map_err(vk_error("bind buffer memory"))?;
        Ok((buffer, allocation))
    }

    fn cmd(&self, what: &str) -> Option<vk::CommandBuffer> {
        if self.recording.is_none() {
            log::error!("{what} recorded outside begin_commands");
        }
        self.recording
    }

    /// Record and submit a one-off command buffer, then wait for the queue.
    fn one_time_submit(&self, record: impl FnOnce(vk::CommandBuffer)) -> RenderResult<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(vk_error("allocate command buffer"))?[0];

        let result = (|| {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
                .map_err(vk_error("begin command buffer"))?;
            record(cmd);
            unsafe { self.device.end_command_buffer(cmd) }
                .map_err(vk_error("end command buffer"))?;

            let cmds = [cmd];
            let submit = vk::SubmitInfo::default().command_buffers(&cmds);
            unsafe {
                self.device
                    .queue_submit(self.queue, &[submit], vk::Fence::null())
            }
            .map_err(|e| RenderError::Submission(format!("{:?}", e)))?;
            unsafe { self.device.queue_wait_idle(self.queue) }.map_err(vk_error("wait for queue"))
        })();

        unsafe { self.device.free_command_buffers(self.command_pool, &[cmd]) };
        result
    }

    fn set_full_viewport(&self, cmd: vk::CommandBuffer, width: u32, height: u32) {
        // Negative height keeps WGSL's y-up clip space
        let viewport = vk::Viewport {
            x: 0.0,
            y: height as f32,
            width: width as f32,
            height: -(height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D { width, height },
        };
        unsafe {
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }
}

fn missing(kind: &'static str, id: u64) -> RenderError {
    RenderError::InvalidState(format!("unknown {kind} {id}"))
}

impl RenderDevice for VulkanDevice {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> RenderResult<BufferHandle> {
        let location = if desc.usage.contains(BufferUsage::MAP_WRITE) {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };
        let (buffer, allocation) = self.create_raw_buffer(
            desc.label.as_deref().unwrap_or("buffer"),
            desc.size,
            convert_buffer_usage(desc.usage),
            location,
        )?;
        let id = self.alloc_id();
        self.buffers.insert(
            id,
            VkBuffer {
                buffer,
                allocation: Some(allocation),
                size: desc.size,
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let b = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| missing("buffer", buffer.0))?;
        if offset + data.len() as u64 > b.size {
            return Err(RenderError::InvalidState(format!(
                "write of {} bytes at {offset} overflows buffer",
                data.len()
            )));
        }
        let mapped = b
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| RenderError::InvalidState("buffer is not host-visible".into()))?;
        let start = offset as usize;
        mapped[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> RenderResult<TextureHandle> {
        let format = convert_texture_format(desc.format);
        let flags = if desc.dimension == TextureDimension::Cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(desc.usage, desc.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(vk_error("create image"))?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = match self.allocate(
            desc.label.as_deref().unwrap_or("texture"),
            requirements,
            MemoryLocation::GpuOnly,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(vk_error("bind image memory"))?;

        let id = self.alloc_id();
        self.textures.insert(
            id,
            VkTexture {
                image,
                allocation: Some(allocation),
                desc: desc.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        region: TextureRegion,
        data: &[u8],
    ) -> RenderResult<()> {
        let t = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| missing("texture", texture.0))?;
        let (image, format) = (t.image, t.desc.format);
        let expected = (region.width * region.height * format.bytes_per_pixel()) as usize;
        if data.len() != expected {
            return Err(RenderError::InvalidState(format!(
                "upload has {} bytes, expected {expected}",
                data.len()
            )));
        }

        let (staging, mut allocation) = self.create_raw_buffer(
            "staging",
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        if let Some(mapped) = allocation.mapped_slice_mut() {
            mapped[..data.len()].copy_from_slice(data);
        }

        let range = SubresourceRange::single(region.mip, region.layer);
        let result = self.one_time_submit(|cmd| {
            let mut to_transfer = BarrierBatch::new();
            to_transfer.add_image_barrier(
                image,
                format,
                range,
                TextureState::Undefined,
                TextureState::TransferDst,
            );
            to_transfer.submit(&self.device, cmd);

            let copy = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: aspect_mask(format),
                    mip_level: region.mip,
                    base_array_layer: region.layer,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: region.width,
                    height: region.height,
                    depth: 1,
                });
            unsafe {
                self.device.cmd_copy_buffer_to_image(
                    cmd,
                    staging,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy],
                );
            }

            let mut to_read = BarrierBatch::new();
            to_read.add_image_barrier(
                image,
                format,
                range,
                TextureState::TransferDst,
                TextureState::ShaderRead,
            );
            to_read.submit(&self.device, cmd);
        });

        self.free_allocation(Some(allocation));
        unsafe { self.device.destroy_buffer(staging, None) };
        result
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
        let format = t.desc.format;
        let range = desc.range.resolve(t.desc.mip_levels, t.desc.layers);
        let view_info = vk::ImageViewCreateInfo::default()
            .image(t.image)
            .view_type(convert_view_type(desc.dimension))
            .format(convert_texture_format(format))
            .subresource_range(convert_subresource_range(range, format));

        let view = unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(vk_error("create image view"))?;
        let id = self.alloc_id();
        self.views.insert(
            id,
            VkView {
                view,
                format,
                owned: true,
            },
        );
        Ok(TextureViewHandle(id))
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> RenderResult<SamplerHandle> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(desc.mag_filter))
            .min_filter(convert_filter_mode(desc.min_filter))
            .mipmap_mode(convert_mipmap_filter_mode(desc.mipmap_filter))
            .address_mode_u(convert_address_mode(desc.address_mode_u))
            .address_mode_v(convert_address_mode(desc.address_mode_v))
            .address_mode_w(convert_address_mode(desc.address_mode_w))
            .compare_enable(desc.compare.is_some())
            .compare_op(
                desc.compare
                    .map(convert_compare_function)
                    .unwrap_or(vk::CompareOp::ALWAYS),
            )
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(vk_error("create sampler"))?;
        let id = self.alloc_id();
        self.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn create_shader_module(
        &mut self,
        desc: &ShaderModuleDescriptor<'_>,
    ) -> RenderResult<ShaderModuleHandle> {
        let parsed = ParsedShader::parse(desc.label, desc.source)?;
        let id = self.alloc_id();
        self.shaders.insert(id, parsed);
        Ok(ShaderModuleHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> RenderResult<BindGroupLayoutHandle> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = entries
            .iter()
            .map(|entry| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(entry.binding)
                    .descriptor_type(convert_descriptor_type(entry.ty))
                    .descriptor_count(1)
                    .stage_flags(convert_shader_stages(entry.visibility))
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(vk_error("create descriptor set layout"))?;
        let id = self.alloc_id();
        self.set_layouts.insert(
            id,
            VkSetLayout {
                layout,
                entries: entries.to_vec(),
            },
        );
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDescriptor<'_>,
    ) -> RenderResult<PipelineLayoutHandle> {
        let set_layouts = desc
            .bind_group_layouts
            .iter()
            .map(|h| {
                self.set_layouts
                    .get(&h.0)
                    .map(|l| l.layout)
                    .ok_or_else(|| missing("bind group layout", h.0))
            })
            .collect::<RenderResult<Vec<_>>>()?;
        let push_constant_ranges: Vec<vk::PushConstantRange> = desc
            .push_constant_ranges
            .iter()
            .map(|r| vk::PushConstantRange {
                stage_flags: convert_shader_stages(r.stages),
                offset: r.offset,
                size: r.size,
            })
            .collect();

        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { self.device.create_pipeline_layout(&create_info, None) }
            .map_err(vk_error("create pipeline layout"))?;
        let id = self.alloc_id();
        self.pipeline_layouts.insert(id, layout);
        log::debug!("Created pipeline layout '{}'", desc.label);
        Ok(PipelineLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[BindGroupEntry],
    ) -> RenderResult<BindGroupHandle> {
        enum Slot {
            Buffer(usize),
            Image(usize),
        }

        let set_layout = self
            .set_layouts
            .get(&layout.0)
            .ok_or_else(|| missing("bind group layout", layout.0))?;

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        let mut slots = Vec::with_capacity(entries.len());

        for entry in entries {
            let layout_entry = set_layout
                .entries
                .iter()
                .find(|e| e.binding == entry.binding)
                .ok_or_else(|| {
                    RenderError::resource(
                        "bind group",
                        format!("binding {} not in layout", entry.binding),
                    )
                })?;
            let slot = match entry.resource {
                BindingResource::Buffer {
                    buffer,
                    offset,
                    size,
                } => {
                    let b = self
                        .buffers
                        .get(&buffer.0)
                        .ok_or_else(|| missing("buffer", buffer.0))?;
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: b.buffer,
                        offset,
                        range: size.unwrap_or(vk::WHOLE_SIZE),
                    });
                    Slot::Buffer(buffer_infos.len() - 1)
                }
                BindingResource::Texture(view) => {
                    let v = self
                        .views
                        .get(&view.0)
                        .ok_or_else(|| missing("texture view", view.0))?;
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: v.view,
                        image_layout: texture_layout(TextureState::ShaderRead, v.format),
                    });
                    Slot::Image(image_infos.len() - 1)
                }
                BindingResource::Sampler(sampler) => {
                    let s = self
                        .samplers
                        .get(&sampler.0)
                        .ok_or_else(|| missing("sampler", sampler.0))?;
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: *s,
                        image_view: vk::ImageView::null(),
                        image_layout: vk::ImageLayout::UNDEFINED,
                    });
                    Slot::Image(image_infos.len() - 1)
                }
            };
            slots.push((entry.binding, convert_descriptor_type(layout_entry.ty), slot));
        }

        let layouts = [set_layout.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(vk_error("allocate descriptor set"))?[0];

        let writes: Vec<vk::WriteDescriptorSet> = slots
            .iter()
            .map(|(binding, ty, slot)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty);
                match slot {
                    Slot::Buffer(i) => write.buffer_info(std::slice::from_ref(&buffer_infos[*i])),
                    Slot::Image(i) => write.image_info(std::slice::from_ref(&image_infos[*i])),
                }
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };

        let id = self.alloc_id();
        self.bind_groups.insert(id, set);
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor<'_>,
    ) -> RenderResult<RenderPipelineHandle> {
        let layout = *self
            .pipeline_layouts
            .get(&desc.layout.0)
            .ok_or_else(|| missing("pipeline layout", desc.layout.0))?;

        let mut stages = Vec::new();
        let mut entries = vec![(desc.vertex, naga::ShaderStage::Vertex)];
        entries.extend(desc.fragment.map(|f| (f, naga::ShaderStage::Fragment)));
        for (entry, stage) in entries {
            let shader = self
                .shaders
                .get(&entry.module.0)
                .ok_or_else(|| missing("shader module", entry.module.0));
            let compiled = shader.and_then(|shader| {
                pipeline::compile_stage(&self.device, shader, entry.name, stage, desc.constants)
            });
            match compiled {
                Ok(compiled) => stages.push(compiled),
                Err(e) => {
                    pipeline::destroy_stages(&self.device, &stages);
                    return Err(e);
                }
            }
        }

        let result =
            pipeline::create_graphics_pipeline(&self.device, desc.label, layout, &stages, desc.state);
        pipeline::destroy_stages(&self.device, &stages);
        let pipeline = result?;

        log::debug!("Created render pipeline '{}'", desc.label);
        let id = self.alloc_id();
        self.render_pipelines
            .insert(id, VkPipeline { pipeline, layout });
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor<'_>,
    ) -> RenderResult<ComputePipelineHandle> {
        let layout = *self
            .pipeline_layouts
            .get(&desc.layout.0)
            .ok_or_else(|| missing("pipeline layout", desc.layout.0))?;
        let shader = self
            .shaders
            .get(&desc.compute.module.0)
            .ok_or_else(|| missing("shader module", desc.compute.module.0))?;
        let stage = pipeline::compile_stage(
            &self.device,
            shader,
            desc.compute.name,
            naga::ShaderStage::Compute,
            desc.constants,
        )?;

        let result = pipeline::create_compute_pipeline(&self.device, desc.label, layout, &stage);
        pipeline::destroy_stages(&self.device, std::slice::from_ref(&stage));
        let pipeline = result?;

        log::debug!("Created compute pipeline '{}'", desc.label);
        let id = self.alloc_id();
        self.compute_pipelines
            .insert(id, VkPipeline { pipeline, layout });
        Ok(ComputePipelineHandle(id))
    }

    fn create_command_buffer(&mut self) -> RenderResult<CommandBufferHandle> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(vk_error("allocate command buffer"))?[0];
        let id = self.alloc_id();
        self.command_buffers.insert(id, cmd);
        Ok(CommandBufferHandle(id))
    }

    fn create_fence(&mut self, signaled: bool) -> RenderResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
        .map_err(vk_error("create fence"))?;
        let id = self.alloc_id();
        self.fences.insert(id, fence);
        Ok(FenceHandle(id))
    }

    fn create_semaphore(&mut self) -> RenderResult<SemaphoreHandle> {
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(vk_error("create semaphore"))?;
        let id = self.alloc_id();
        self.semaphores.insert(id, semaphore);
        Ok(SemaphoreHandle(id))
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> RenderResult<()> {
        let f = *self
            .fences
            .get(&fence.0)
            .ok_or_else(|| missing("fence", fence.0))?;
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(&[f], true, nanos) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RenderError::FenceTimeout(timeout)),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(RenderError::DeviceLost),
            Err(e) => Err(RenderError::Submission(format!("fence wait failed: {:?}", e))),
        }
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> RenderResult<()> {
        let f = *self
            .fences
            .get(&fence.0)
            .ok_or_else(|| missing("fence", fence.0))?;
        unsafe { self.device.reset_fences(&[f]) }.map_err(vk_error("reset fence"))
    }

    fn begin_commands(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        if self.recording.is_some() {
            return Err(RenderError::InvalidState(
                "a command buffer is already recording".into(),
            ));
        }
        let cmd = *self
            .command_buffers
            .get(&command_buffer.0)
            .ok_or_else(|| missing("command buffer", command_buffer.0))?;
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(vk_error("reset command buffer"))?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
            .map_err(vk_error("begin command buffer"))?;
        self.recording = Some(cmd);
        self.bound = None;
        Ok(())
    }

    fn end_commands(&mut self) -> RenderResult<()> {
        let cmd = self
            .recording
            .take()
            .ok_or_else(|| RenderError::InvalidState("no command buffer is recording".into()))?;
        unsafe { self.device.end_command_buffer(cmd) }.map_err(vk_error("end command buffer"))
    }

    fn submit(&mut self, info: &SubmitInfo) -> RenderResult<()> {
        let cmd = *self
            .command_buffers
            .get(&info.command_buffer.0)
            .ok_or_else(|| missing("command buffer", info.command_buffer.0))?;
        let lookup = |s: SemaphoreHandle| {
            self.semaphores
                .get(&s.0)
                .copied()
                .ok_or_else(|| missing("semaphore", s.0))
        };
        let wait_semaphores = info.wait.map(lookup).transpose()?.into_iter().collect::<Vec<_>>();
        let signal_semaphores = info.signal.map(lookup).transpose()?.into_iter().collect::<Vec<_>>();
        let wait_stages =
            vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];
        let fence = match info.fence {
            Some(f) => *self.fences.get(&f.0).ok_or_else(|| missing("fence", f.0))?,
            None => vk::Fence::null(),
        };

        let cmds = [cmd];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signal_semaphores);

        unsafe { self.device.queue_submit(self.queue, &[submit], fence) }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
            _ => {
                log::error!("Queue submission failed: {:?}", e);
                RenderError::Submission(format!("{:?}", e))
            }
        })
    }

    fn queue_wait_idle(&mut self) -> RenderResult<()> {
        unsafe { self.device.queue_wait_idle(self.queue) }.map_err(vk_error("wait for queue"))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor<'_>) {
        let Some(cmd) = self.cmd("begin_render_pass") else {
            return;
        };

        let color_infos: Vec<vk::RenderingAttachmentInfo> = desc
            .color_attachments
            .iter()
            .filter_map(|a| {
                let view = self.views.get(&a.view.0)?;
                let clear = match a.load_op {
                    LoadOp::Clear(c) => convert_clear_color(c),
                    _ => vk::ClearValue::default(),
                };
                Some(
                    vk::RenderingAttachmentInfo::default()
                        .image_view(view.view)
                        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .load_op(convert_load_op(&a.load_op))
                        .store_op(convert_store_op(a.store_op))
                        .clear_value(clear),
                )
            })
            .collect();

        let depth_info = desc.depth_attachment.and_then(|d| {
            let view = self.views.get(&d.view.0)?;
            let depth = match d.load_op {
                LoadOp::Clear(depth) => depth,
                _ => 1.0,
            };
            let layout = if d.read_only {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            };
            Some(
                vk::RenderingAttachmentInfo::default()
                    .image_view(view.view)
                    .image_layout(layout)
                    .load_op(convert_load_op(&d.load_op))
                    .store_op(convert_store_op(d.store_op))
                    .clear_value(vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
                    }),
            )
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: desc.width,
                    height: desc.height,
                },
            })
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(depth_info) = depth_info.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_info);
        }

        unsafe { self.device.cmd_begin_rendering(cmd, &rendering_info) };
        self.set_full_viewport(cmd, desc.width, desc.height);
    }

    fn end_render_pass(&mut self) {
        if let Some(cmd) = self.cmd("end_render_pass") {
            unsafe { self.device.cmd_end_rendering(cmd) };
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        let Some(cmd) = self.cmd("set_render_pipeline") else {
            return;
        };
        let Some(p) = self.render_pipelines.get(&pipeline.0) else {
            log::error!("unknown render pipeline {}", pipeline.0);
            return;
        };
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, p.pipeline)
        };
        self.bound = Some((vk::PipelineBindPoint::GRAPHICS, p.layout));
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        let Some(cmd) = self.cmd("set_compute_pipeline") else {
            return;
        };
        let Some(p) = self.compute_pipelines.get(&pipeline.0) else {
            log::error!("unknown compute pipeline {}", pipeline.0);
            return;
        };
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, p.pipeline)
        };
        self.bound = Some((vk::PipelineBindPoint::COMPUTE, p.layout));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        let Some(cmd) = self.cmd("set_bind_group") else {
            return;
        };
        let (Some((bind_point, layout)), Some(set)) = (self.bound, self.bind_groups.get(&bind_group.0))
        else {
            log::error!("set_bind_group without a pipeline or with an unknown group");
            return;
        };
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cmd, bind_point, layout, index, &[*set], &[])
        };
    }

    fn push_constants(&mut self, stages: ShaderStages, offset: u32, data: &[u8]) {
        let Some(cmd) = self.cmd("push_constants") else {
            return;
        };
        let Some((_, layout)) = self.bound else {
            log::error!("push_constants without a pipeline");
            return;
        };
        unsafe {
            self.device
                .cmd_push_constants(cmd, layout, convert_shader_stages(stages), offset, data)
        };
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        let Some(cmd) = self.cmd("set_vertex_buffer") else {
            return;
        };
        if let Some(b) = self.buffers.get(&buffer.0) {
            unsafe {
                self.device
                    .cmd_bind_vertex_buffers(cmd, slot, &[b.buffer], &[offset])
            };
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        let Some(cmd) = self.cmd("set_index_buffer") else {
            return;
        };
        if let Some(b) = self.buffers.get(&buffer.0) {
            unsafe {
                self.device.cmd_bind_index_buffer(
                    cmd,
                    b.buffer,
                    offset,
                    convert_index_format(format),
                )
            };
        }
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        if let Some(cmd) = self.cmd("set_viewport") {
            self.set_full_viewport(cmd, width, height);
        }
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        if let Some(cmd) = self.cmd("draw") {
            unsafe {
                self.device.cmd_draw(
                    cmd,
                    vertices.end - vertices.start,
                    instances.end - instances.start,
                    vertices.start,
                    instances.start,
                )
            };
        }
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        if let Some(cmd) = self.cmd("draw_indexed") {
            unsafe {
                self.device.cmd_draw_indexed(
                    cmd,
                    indices.end - indices.start,
                    instances.end - instances.start,
                    indices.start,
                    base_vertex,
                    instances.start,
                )
            };
        }
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        if let Some(cmd) = self.cmd("dispatch") {
            unsafe { self.device.cmd_dispatch(cmd, x, y, z) };
        }
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(cmd) = self.cmd("update_buffer") else {
            return;
        };
        if let Some(b) = self.buffers.get(&buffer.0) {
            unsafe { self.device.cmd_update_buffer(cmd, b.buffer, offset, data) };
        }
    }

    fn pipeline_barrier(&mut self, barriers: &[Barrier]) {
        let Some(cmd) = self.cmd("pipeline_barrier") else {
            return;
        };
        let mut batch = BarrierBatch::new();
        for barrier in barriers {
            match *barrier {
                Barrier::Texture {
                    texture,
                    range,
                    before,
                    after,
                } => {
                    if let Some(t) = self.textures.get(&texture.0) {
                        batch.add_image_barrier(t.image, t.desc.format, range, before, after);
                    }
                }
                Barrier::Buffer {
                    buffer,
                    before,
                    after,
                } => {
                    if let Some(b) = self.buffers.get(&buffer.0) {
                        batch.add_buffer_barrier(b.buffer, before, after);
                    }
                }
            }
        }
        batch.submit(&self.device, cmd);
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.swapchain
            .as_ref()
            .map(|s| s.format)
            .unwrap_or(TextureFormat::Bgra8UnormSrgb)
    }

    fn swapchain_extent(&self) -> (u32, u32) {
        self.swapchain
            .as_ref()
            .map(|s| (s.extent.width, s.extent.height))
            .unwrap_or((0, 0))
    }

    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> RenderResult<SwapchainImage> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| RenderError::Unsupported("device has no surface".into()))?;
        let semaphore = *self
            .semaphores
            .get(&signal.0)
            .ok_or_else(|| missing("semaphore", signal.0))?;
        let index = swapchain.acquire(semaphore)?;
        let (texture, view) = self.swapchain_handles[index as usize];
        Ok(SwapchainImage {
            index,
            texture,
            view,
        })
    }

    fn present(&mut self, image: &SwapchainImage, wait: SemaphoreHandle) -> RenderResult<()> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| RenderError::Unsupported("device has no surface".into()))?;
        let semaphore = *self
            .semaphores
            .get(&wait.0)
            .ok_or_else(|| missing("semaphore", wait.0))?;
        swapchain.present(self.queue, image.index, semaphore)
    }

    fn destroy(&mut self, handle: AnyHandle) {
        let device = &self.device;
        unsafe {
            match handle {
                AnyHandle::Buffer(h) => {
                    if let Some(b) = self.buffers.remove(&h.0) {
                        device.destroy_buffer(b.buffer, None);
                        self.free_allocation(b.allocation);
                    }
                }
                AnyHandle::Texture(h) => {
                    if let Some(t) = self.textures.remove(&h.0) {
                        if t.allocation.is_some() {
                            device.destroy_image(t.image, None);
                            self.free_allocation(t.allocation);
                        }
                    }
                }
                AnyHandle::TextureView(h) => {
                    if let Some(v) = self.views.remove(&h.0) {
                        if v.owned {
                            device.destroy_image_view(v.view, None);
                        }
                    }
                }
                AnyHandle::Sampler(h) => {
                    if let Some(s) = self.samplers.remove(&h.0) {
                        device.destroy_sampler(s, None);
                    }
                }
                AnyHandle::ShaderModule(h) => {
                    self.shaders.remove(&h.0);
                }
                AnyHandle::BindGroupLayout(h) => {
                    if let Some(l) = self.set_layouts.remove(&h.0) {
                        device.destroy_descriptor_set_layout(l.layout, None);
                    }
                }
                AnyHandle::BindGroup(h) => {
                    if let Some(set) = self.bind_groups.remove(&h.0) {
                        let _ = device.free_descriptor_sets(self.descriptor_pool, &[set]);
                    }
                }
                AnyHandle::PipelineLayout(h) => {
                    if let Some(l) = self.pipeline_layouts.remove(&h.0) {
                        device.destroy_pipeline_layout(l, None);
                    }
                }
                AnyHandle::RenderPipeline(h) => {
                    if let Some(p) = self.render_pipelines.remove(&h.0) {
                        device.destroy_pipeline(p.pipeline, None);
                    }
                }
                AnyHandle::ComputePipeline(h) => {
                    if let Some(p) = self.compute_pipelines.remove(&h.0) {
                        device.destroy_pipeline(p.pipeline, None);
                    }
                }
                AnyHandle::CommandBuffer(h) => {
                    if let Some(cmd) = self.command_buffers.remove(&h.0) {
                        device.free_command_buffers(self.command_pool, &[cmd]);
                    }
                }
                AnyHandle::Fence(h) => {
                    if let Some(f) = self.fences.remove(&h.0) {
                        device.destroy_fence(f, None);
                    }
                }
                AnyHandle::Semaphore(h) => {
                    if let Some(s) = self.semaphores.remove(&h.0) {
                        device.destroy_semaphore(s, None);
                    }
                }
            }
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }

        self.unregister_swapchain_images();
        let handles: Vec<AnyHandle> = self
            .render_pipelines
            .keys()
            .map(|&id| RenderPipelineHandle(id).into())
            .chain(self.compute_pipelines.keys().map(|&id| ComputePipelineHandle(id).into()))
            .chain(self.bind_groups.keys().map(|&id| BindGroupHandle(id).into()))
            .chain(self.pipeline_layouts.keys().map(|&id| PipelineLayoutHandle(id).into()))
            .chain(self.set_layouts.keys().map(|&id| BindGroupLayoutHandle(id).into()))
            .chain(self.views.keys().map(|&id| TextureViewHandle(id).into()))
            .chain(self.textures.keys().map(|&id| TextureHandle(id).into()))
            .chain(self.buffers.keys().map(|&id| BufferHandle(id).into()))
            .chain(self.samplers.keys().map(|&id| SamplerHandle(id).into()))
            .chain(self.command_buffers.keys().map(|&id| CommandBufferHandle(id).into()))
            .chain(self.fences.keys().map(|&id| FenceHandle(id).into()))
            .chain(self.semaphores.keys().map(|&id| SemaphoreHandle(id).into()))
            .collect();
        if !handles.is_empty() {
            log::debug!("Destroying {} objects still alive at shutdown", handles.len());
        }
        for handle in handles {
            self.destroy(handle);
        }

        unsafe {
            if let Some(mut swapchain) = self.swapchain.take() {
                swapchain.destroy(&self.device);
            }
            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_command_pool(self.command_pool, None);
            // The allocator must release its memory blocks before the device goes
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
                let errors = debug::validation_error_count();
                if errors > 0 {
                    log::warn!("Validation layers reported {errors} errors");
                }
            }
            self.instance.destroy_instance(None);
        }
    }
}
