//! Logical device creation and the per-run context.

use std::ops::Deref;
use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::capability::{self, DeviceCapabilities};
use crate::config::ExecutorConfig;
use crate::error::{Result, Stage, VkResultExt};
use crate::instance::VulkanInstance;
use crate::selector::{self, SelectionCriteria, SelectionResult};

/// A logical device with a single queue from the selected compute family.
///
/// Every resource created from the device holds an `Arc` to it, so the
/// device is destroyed only after all of them.
pub struct LogicalDevice {
    raw: ash::Device,
    queue: vk::Queue,
    queue_family_index: u32,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    // Keeps the instance alive until the device has been destroyed.
    _instance: Arc<VulkanInstance>,
}

impl LogicalDevice {
    pub fn new(instance: Arc<VulkanInstance>, selection: &SelectionResult) -> Result<Self> {
        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(selection.queue_family_index)
            .queue_priorities(&queue_priorities)
            .build();

        let physical_device_features = vk::PhysicalDeviceFeatures::builder();
        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_features(&physical_device_features);

        let raw = unsafe {
            instance
                .raw()
                .create_device(selection.physical_device, &device_create_info, None)
        }
        .at(Stage::DeviceCreation)?;
        info!("Logical device created successfully.");

        let queue = unsafe { raw.get_device_queue(selection.queue_family_index, 0) };
        let memory_properties =
            unsafe { instance.raw().get_physical_device_memory_properties(selection.physical_device) };

        Ok(Self {
            raw,
            queue,
            queue_family_index: selection.queue_family_index,
            memory_properties,
            _instance: instance,
        })
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Property flags of `memory_type_index`, if it exists.
    pub fn memory_type_flags(&self, memory_type_index: u32) -> Option<vk::MemoryPropertyFlags> {
        (memory_type_index < self.memory_properties.memory_type_count)
            .then(|| self.memory_properties.memory_types[memory_type_index as usize].property_flags)
    }
}

impl Deref for LogicalDevice {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            // Nothing is in flight once the last owner lets go, but a lost
            // device must not keep us from destroying it.
            let _ = self.raw.device_wait_idle();
            self.raw.destroy_device(None);
        }
        info!("Vulkan logical device destroyed.");
    }
}

/// Instance, selection and device for one compute run.
pub struct ComputeContext {
    device: Arc<LogicalDevice>,
    selection: SelectionResult,
    capabilities: DeviceCapabilities,
}

impl ComputeContext {
    /// Creates the instance, selects a device for `config`'s extent and opens it.
    ///
    /// No device or resource is created when selection fails.
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let instance = Arc::new(VulkanInstance::new(
            &config.instance.application_name,
            config.instance.enable_validation,
        )?);

        let mut candidates = capability::enumerate(instance.raw())?;
        let criteria = SelectionCriteria {
            width: config.image.width,
            height: config.image.height,
        };
        let selection = selector::select(&candidates, &criteria)?;
        let capabilities = candidates.swap_remove(selection.device_index);

        let device = Arc::new(LogicalDevice::new(instance, &selection)?);

        Ok(Self {
            device,
            selection,
            capabilities,
        })
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }

    pub fn selection(&self) -> &SelectionResult {
        &self.selection
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }
}
