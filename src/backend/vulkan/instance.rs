//! Vulkan instance creation and configuration.

use std::ffi::{c_char, CStr};

use ash::vk;
use raw_window_handle::RawDisplayHandle;

use crate::error::{RenderError, RenderResult};

use super::debug;

/// Dynamic rendering and synchronization come from Vulkan 1.3 core.
pub const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance plus the optional validation messenger.
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

/// Create a Vulkan instance with optional validation layers.
///
/// Surface extensions for `display` are enabled when a display is given.
pub fn create_instance(
    entry: &ash::Entry,
    display: Option<RawDisplayHandle>,
    validation_enabled: bool,
) -> RenderResult<InstanceBundle> {
    let validation_available = validation_enabled && check_validation_layer_support(entry);

    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"tiled-render-core")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"tiled-render-core")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions: Vec<*const c_char> = Vec::new();
    if let Some(display) = display {
        let required = ash_window::enumerate_required_extensions(display).map_err(|e| {
            RenderError::DeviceCreation(format!("Unsupported display for Vulkan: {:?}", e))
        })?;
        extensions.extend_from_slice(required);
    }
    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let layer_names: Vec<*const c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        RenderError::DeviceCreation(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let debug = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        let messenger = debug::create_debug_messenger(&debug_utils)?;
        Some((debug_utils, messenger))
    } else {
        None
    };

    Ok(InstanceBundle { instance, debug })
}

/// Check if the validation layer is available.
fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let Ok(available_layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };

    available_layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    })
}
