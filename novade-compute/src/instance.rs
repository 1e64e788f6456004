use ash::vk;
use std::borrow::Cow;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use tracing::info;

use crate::error::{Result, Stage, VkResultExt};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *p_callback_data;
    let message_id_number: i32 = callback_data.message_id_number;

    let message_id_name = if callback_data.p_message_id_name.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy()
    };

    let message = if callback_data.p_message.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::debug!(target: "vulkan", "[VERBOSE] type: {:?}, id: {} ({}), message: {}", message_type, message_id_name, message_id_number, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(target: "vulkan", "[INFO] type: {:?}, id: {} ({}), message: {}", message_type, message_id_name, message_id_number, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "vulkan", "[WARNING] type: {:?}, id: {} ({}), message: {}", message_type, message_id_name, message_id_number, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "vulkan", "[ERROR] type: {:?}, id: {} ({}), message: {}", message_type, message_id_name, message_id_number, message);
        }
        _ => {
            tracing::trace!(target: "vulkan", "[UNKNOWN] severity: {:?}, type: {:?}, id: {} ({}), message: {}", message_severity, message_type, message_id_name, message_id_number, message);
        }
    }
    vk::FALSE
}

/// Loader entry point, instance, and the optional validation messenger.
///
/// Dropped last: every logical device keeps an `Arc` to it.
pub struct VulkanInstance {
    #[allow(dead_code)]
    entry: ash::Entry,
    raw: ash::Instance,
    debug_utils_loader: Option<ash::extensions::ext::DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Creates a Vulkan 1.0 instance with no window-system extensions.
    pub fn new(application_name: &str, enable_validation_layers: bool) -> Result<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let app_name = CString::new(application_name)?;
        let engine_name = CString::new("novade-compute")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut instance_extensions: Vec<*const c_char> = Vec::new();
        if enable_validation_layers {
            instance_extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let validation_layer_name = CString::new(VALIDATION_LAYER)?;
        let mut enabled_layer_names: Vec<*const c_char> = Vec::new();
        if enable_validation_layers {
            enabled_layer_names.push(validation_layer_name.as_ptr());
        }

        let mut debug_messenger_create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let mut instance_create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&instance_extensions)
            .enabled_layer_names(&enabled_layer_names);
        if enable_validation_layers {
            instance_create_info = instance_create_info.push_next(&mut debug_messenger_create_info);
        }

        let raw = unsafe { entry.create_instance(&instance_create_info, None) }.at(Stage::InstanceCreation)?;
        info!("Vulkan instance created successfully.");

        let mut debug_utils_loader = None;
        let mut debug_messenger = None;
        if enable_validation_layers {
            let loader = ash::extensions::ext::DebugUtils::new(&entry, &raw);
            let messenger = match unsafe { loader.create_debug_utils_messenger(&debug_messenger_create_info, None) } {
                Ok(messenger) => messenger,
                Err(result) => {
                    unsafe { raw.destroy_instance(None) };
                    return Err(crate::error::ComputeError::Backend {
                        stage: Stage::DebugMessenger,
                        result,
                    });
                }
            };
            debug_utils_loader = Some(loader);
            debug_messenger = Some(messenger);
            info!("Vulkan debug messenger created successfully.");
        }

        Ok(Self {
            entry,
            raw,
            debug_utils_loader,
            debug_messenger,
        })
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.raw
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(loader), Some(messenger)) = (&self.debug_utils_loader, self.debug_messenger) {
                loader.destroy_debug_utils_messenger(messenger, None);
                info!("Vulkan debug messenger destroyed.");
            }
            self.raw.destroy_instance(None);
            info!("Vulkan instance destroyed.");
        }
    }
}
