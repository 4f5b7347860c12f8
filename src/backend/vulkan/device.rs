//! Vulkan physical and logical device management.

use std::ffi::CStr;

use ash::vk;

use crate::backend::types::DeviceLimits;
use crate::error::{RenderError, RenderResult};

/// Select the best physical device for rendering.
///
/// Prefers discrete GPUs over integrated GPUs and skips devices below
/// Vulkan 1.3.
pub fn select_physical_device(instance: &ash::Instance) -> RenderResult<vk::PhysicalDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        RenderError::DeviceCreation(format!("Failed to enumerate physical devices: {:?}", e))
    })?;

    if devices.is_empty() {
        return Err(RenderError::DeviceCreation(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best_device = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };

        if properties.api_version < super::instance::REQUIRED_API_VERSION {
            log::info!("Skipping GPU {:?}: Vulkan 1.3 not supported", device_name);
            continue;
        }

        let mut score = 1;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }
        score += properties.limits.max_image_dimension2_d / 1024;

        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            device_name,
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device.ok_or_else(|| RenderError::DeviceCreation("No suitable GPU found".to_string()))
}

/// Find a queue family that supports graphics and compute.
pub fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> RenderResult<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
        .ok_or_else(|| RenderError::DeviceCreation("No graphics queue family found".to_string()))
}

/// Create a logical device with dynamic rendering enabled.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
    with_swapchain: bool,
) -> RenderResult<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(&queue_priorities)];

    let device_extensions = if with_swapchain {
        vec![ash::khr::swapchain::NAME.as_ptr()]
    } else {
        vec![]
    };

    let features = vk::PhysicalDeviceFeatures::default().depth_bias_clamp(true);
    let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_13_features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        RenderError::DeviceCreation(format!("Failed to create logical device: {:?}", e))
    })
}

/// Query the limits the renderer validates its configuration against.
pub fn query_limits(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> DeviceLimits {
    let limits = unsafe { instance.get_physical_device_properties(physical_device) }.limits;
    DeviceLimits {
        max_texture_array_layers: limits.max_image_array_layers,
        max_push_constant_size: limits.max_push_constants_size,
        max_compute_workgroups_per_dimension: limits
            .max_compute_work_group_count
            .iter()
            .copied()
            .min()
            .unwrap_or(65535),
    }
}

/// Create a command pool for graphics operations.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> RenderResult<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        RenderError::DeviceCreation(format!("Failed to create command pool: {:?}", e))
    })
}

/// Create the descriptor pool every bind group is allocated from.
pub fn create_descriptor_pool(device: &ash::Device) -> RenderResult<vk::DescriptorPool> {
    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 4096,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 1024,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: 8192,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: 4096,
        },
    ];

    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(4096)
        .pool_sizes(&pool_sizes);

    unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(|e| {
        RenderError::DeviceCreation(format!("Failed to create descriptor pool: {:?}", e))
    })
}
