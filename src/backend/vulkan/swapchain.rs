//! Vulkan surface and swapchain.

use ash::vk;

use crate::backend::types::TextureFormat;
use crate::error::{RenderError, RenderResult};

use super::conversion::texture_format_from_vk;

/// Swapchain over a window surface.
pub struct VulkanSwapchain {
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) swapchain: vk::SwapchainKHR,
    pub(crate) images: Vec<vk::Image>,
    pub(crate) image_views: Vec<vk::ImageView>,
    pub(crate) format: TextureFormat,
    pub(crate) vk_format: vk::Format,
    pub(crate) extent: vk::Extent2D,
    pub(crate) vsync: bool,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
}

/// Requested swapchain size and present mode.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
}

impl VulkanSwapchain {
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        surface_loader: ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        config: SurfaceConfig,
    ) -> RenderResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, device);
        let mut swapchain = Self {
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: TextureFormat::Bgra8UnormSrgb,
            vk_format: vk::Format::B8G8R8A8_SRGB,
            extent: vk::Extent2D {
                width: config.width,
                height: config.height,
            },
            vsync: config.vsync,
            surface_loader,
            swapchain_loader,
        };
        swapchain.recreate(device, physical_device, config.width, config.height)?;
        Ok(swapchain)
    }

    /// (Re)build the swapchain at the given size. The device must be idle.
    pub fn recreate(
        &mut self,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .map_err(|e| surface_error("get surface capabilities", e))?;

        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
        .map_err(|e| surface_error("get surface formats", e))?;

        let (surface_format, format) = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB]
            .iter()
            .find_map(|preferred| formats.iter().find(|f| f.format == *preferred))
            .or_else(|| {
                formats
                    .iter()
                    .find(|f| texture_format_from_vk(f.format).is_some())
            })
            .and_then(|f| texture_format_from_vk(f.format).map(|t| (*f, t)))
            .ok_or_else(|| RenderError::Surface("no supported surface format".into()))?;

        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .map_err(|e| surface_error("get present modes", e))?;

        let present_mode = if !self.vsync && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else if !self.vsync && present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
            vk::PresentModeKHR::IMMEDIATE
        } else {
            vk::PresentModeKHR::FIFO
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::Surface("surface has zero size".into()));
        }

        // Prefer triple buffering
        let image_count = (capabilities.min_image_count + 1).max(3).min(
            if capabilities.max_image_count > 0 {
                capabilities.max_image_count
            } else {
                u32::MAX
            },
        );

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| surface_error("create swapchain", e))?;

        self.destroy_views(device);
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(|e| surface_error("get swapchain images", e))?;

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { device.create_image_view(&view_info, None) }
                .map_err(|e| surface_error("create swapchain image view", e))?;
            self.image_views.push(view);
        }

        self.format = format;
        self.vk_format = surface_format.format;
        self.extent = extent;

        log::info!(
            "Created Vulkan swapchain: {}x{} with {} images ({:?})",
            extent.width,
            extent.height,
            self.images.len(),
            present_mode
        );
        Ok(())
    }

    /// Acquire the next image index, signalling `semaphore` when ready.
    pub fn acquire(&self, semaphore: vk::Semaphore) -> RenderResult<u32> {
        let (index, _suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .map_err(|e| surface_error("acquire swapchain image", e))?;
        Ok(index)
    }

    pub fn present(&self, queue: vk::Queue, index: u32, wait: vk::Semaphore) -> RenderResult<()> {
        let swapchains = [self.swapchain];
        let indices = [index];
        let wait_semaphores = [wait];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let suboptimal = unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
            .map_err(|e| surface_error("present", e))?;
        if suboptimal {
            return Err(RenderError::Surface("swapchain suboptimal".into()));
        }
        Ok(())
    }

    fn destroy_views(&mut self, device: &ash::Device) {
        for view in self.image_views.drain(..) {
            unsafe { device.destroy_image_view(view, None) };
        }
        self.images.clear();
    }

    /// Destroy the swapchain and its surface. The device must be idle.
    pub fn destroy(&mut self, device: &ash::Device) {
        self.destroy_views(device);
        unsafe {
            if self.swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

fn surface_error(what: &str, e: vk::Result) -> RenderError {
    match e {
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR => {
            RenderError::Surface(format!("Failed to {what}: {:?}", e))
        }
        _ => RenderError::Presentation(format!("Failed to {what}: {:?}", e)),
    }
}
