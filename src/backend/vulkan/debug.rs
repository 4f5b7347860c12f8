//! Validation layer messenger.
//!
//! Messages go to `log` under the `vulkan` target. Errors are also counted so
//! the device can report a total when it shuts down.

use std::ffi::{c_void, CStr};
use std::sync::atomic::{AtomicU32, Ordering};

use ash::vk;

use crate::error::{RenderError, RenderResult};

static VALIDATION_ERRORS: AtomicU32 = AtomicU32::new(0);

/// Validation errors reported since the process started.
pub fn validation_error_count() -> u32 {
    VALIDATION_ERRORS.load(Ordering::Relaxed)
}

pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> RenderResult<vk::DebugUtilsMessengerEXT> {
    type Severity = vk::DebugUtilsMessageSeverityFlagsEXT;
    type Kind = vk::DebugUtilsMessageTypeFlagsEXT;

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(Severity::ERROR | Severity::WARNING | Severity::INFO)
        .message_type(Kind::GENERAL | Kind::VALIDATION | Kind::PERFORMANCE)
        .pfn_user_callback(Some(on_message));

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(|e| RenderError::DeviceCreation(format!("debug messenger: {e:?}")))
}

unsafe extern "system" fn on_message(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the loader passes either null or a callback data struct that
    // lives for the duration of the call.
    let text = unsafe { data.as_ref() }
        .filter(|d| !d.p_message.is_null())
        .map(|d| unsafe { CStr::from_ptr(d.p_message) }.to_string_lossy())
        .unwrap_or_default();

    let level = if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        if kind.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
            VALIDATION_ERRORS.fetch_add(1, Ordering::Relaxed);
        }
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else {
        log::Level::Debug
    };
    log::log!(target: "vulkan", level, "[{kind:?}] {text}");

    vk::FALSE
}
