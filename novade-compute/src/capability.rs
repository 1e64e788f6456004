//! Immutable capability records queried from physical devices.
//!
//! The records are plain data so that selection can be evaluated and tested
//! without a driver.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{Result, Stage, VkResultExt};

/// Classification of a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Discrete,
    Integrated,
    Virtual,
    /// CPU implementations such as llvmpipe or SwiftShader.
    Software,
    Other,
}

impl From<vk::PhysicalDeviceType> for DeviceKind {
    fn from(ty: vk::PhysicalDeviceType) -> Self {
        match ty {
            vk::PhysicalDeviceType::DISCRETE_GPU => DeviceKind::Discrete,
            vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceKind::Integrated,
            vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceKind::Virtual,
            vk::PhysicalDeviceType::CPU => DeviceKind::Software,
            _ => DeviceKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyDesc {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
}

impl QueueFamilyDesc {
    pub fn supports_compute(&self) -> bool {
        self.queue_count > 0 && self.flags.contains(vk::QueueFlags::COMPUTE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTypeDesc {
    pub flags: vk::MemoryPropertyFlags,
    pub heap_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeapDesc {
    pub size: vk::DeviceSize,
    pub device_local: bool,
}

/// Everything selection needs to know about one physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub kind: DeviceKind,
    pub vendor_id: u32,
    pub device_id: u32,
    pub api_version: u32,
    pub driver_version: u32,
    pub max_image_dimension_2d: u32,
    pub max_compute_work_group_count: [u32; 3],
    /// Whether `R32_SFLOAT` with linear tiling can back a storage image.
    pub linear_storage_image_r32f: bool,
    pub queue_families: Vec<QueueFamilyDesc>,
    pub memory_types: Vec<MemoryTypeDesc>,
    pub memory_heaps: Vec<MemoryHeapDesc>,
}

impl DeviceCapabilities {
    /// Reads the capability record for `physical_device`.
    ///
    /// # Safety
    ///
    /// `physical_device` must have been enumerated from `instance`.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let queue_families = instance
            .get_physical_device_queue_family_properties(physical_device)
            .iter()
            .map(|family| QueueFamilyDesc {
                flags: family.queue_flags,
                queue_count: family.queue_count,
            })
            .collect();

        let memory_properties = instance.get_physical_device_memory_properties(physical_device);
        let memory_types = memory_properties.memory_types[..memory_properties.memory_type_count as usize]
            .iter()
            .map(|ty| MemoryTypeDesc {
                flags: ty.property_flags,
                heap_index: ty.heap_index,
            })
            .collect();
        let memory_heaps = memory_properties.memory_heaps[..memory_properties.memory_heap_count as usize]
            .iter()
            .map(|heap| MemoryHeapDesc {
                size: heap.size,
                device_local: heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
            })
            .collect();

        let format_properties =
            instance.get_physical_device_format_properties(physical_device, vk::Format::R32_SFLOAT);

        Self {
            handle: physical_device,
            name,
            kind: properties.device_type.into(),
            vendor_id: properties.vendor_id,
            device_id: properties.device_id,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
            max_compute_work_group_count: properties.limits.max_compute_work_group_count,
            linear_storage_image_r32f: format_properties
                .linear_tiling_features
                .contains(vk::FormatFeatureFlags::STORAGE_IMAGE),
            queue_families,
            memory_types,
            memory_heaps,
        }
    }

    /// Dumps the record at debug level.
    pub fn log_summary(&self, index: usize) {
        debug!(
            "Device #{}: {} ({:?}) vendor {:#06x} device {:#06x} api {}.{}.{} driver {:#x}",
            index,
            self.name,
            self.kind,
            self.vendor_id,
            self.device_id,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.driver_version,
        );
        debug!(
            "  limits: maxImageDimension2D = {}, maxComputeWorkGroupCount = {:?}",
            self.max_image_dimension_2d, self.max_compute_work_group_count
        );
        for (i, family) in self.queue_families.iter().enumerate() {
            debug!("  queue family {}: {:?} x{}", i, family.flags, family.queue_count);
        }
        for (i, ty) in self.memory_types.iter().enumerate() {
            debug!("  memory type {}: heap {} {:?}", i, ty.heap_index, ty.flags);
        }
        for (i, heap) in self.memory_heaps.iter().enumerate() {
            debug!(
                "  memory heap {}: {} MiB{}",
                i,
                heap.size / (1024 * 1024),
                if heap.device_local { " (device-local)" } else { "" }
            );
        }
        if !self.linear_storage_image_r32f {
            warn!(
                "Device {} does not advertise linear R32_SFLOAT storage images; image creation may fail",
                self.name
            );
        }
    }
}

/// Enumerates and queries every physical device visible to `instance`.
pub fn enumerate(instance: &ash::Instance) -> Result<Vec<DeviceCapabilities>> {
    let physical_devices = unsafe { instance.enumerate_physical_devices() }.at(Stage::DeviceEnumeration)?;
    info!("Found {} physical devices.", physical_devices.len());

    let candidates: Vec<DeviceCapabilities> = physical_devices
        .into_iter()
        .map(|pdevice| unsafe { DeviceCapabilities::query(instance, pdevice) })
        .collect();
    for (index, caps) in candidates.iter().enumerate() {
        caps.log_summary(index);
    }
    Ok(candidates)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_kind_maps_cpu_to_software() {
        assert_eq!(DeviceKind::from(vk::PhysicalDeviceType::CPU), DeviceKind::Software);
        assert_eq!(DeviceKind::from(vk::PhysicalDeviceType::DISCRETE_GPU), DeviceKind::Discrete);
        assert_eq!(DeviceKind::from(vk::PhysicalDeviceType::OTHER), DeviceKind::Other);
    }

    #[test]
    fn empty_queue_family_does_not_support_compute() {
        let family = QueueFamilyDesc {
            flags: vk::QueueFlags::COMPUTE,
            queue_count: 0,
        };
        assert!(!family.supports_compute());
    }
}
