//! Device, queue family and memory type selection.
//!
//! Every choice is made by walking an ordered list of predicates and taking the
//! first candidate that satisfies the earliest one. Devices are tried in
//! enumeration order; the first device that passes every step wins.

use ash::vk;
use tracing::{debug, info};

use crate::capability::{DeviceCapabilities, DeviceKind, MemoryTypeDesc, QueueFamilyDesc};
use crate::error::{CapabilityError, DeviceRejection};

/// One rung of a fallback ladder over memory property flags.
#[derive(Clone, Copy)]
pub struct MemoryTier {
    pub name: &'static str,
    pub matches: fn(vk::MemoryPropertyFlags) -> bool,
}

impl std::fmt::Debug for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

fn exactly_device_local(flags: vk::MemoryPropertyFlags) -> bool {
    flags == vk::MemoryPropertyFlags::DEVICE_LOCAL
}

fn includes_device_local(flags: vk::MemoryPropertyFlags) -> bool {
    flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
}

fn visible_coherent_local(flags: vk::MemoryPropertyFlags) -> bool {
    flags.contains(
        vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT
            | vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
}

fn visible_coherent(flags: vk::MemoryPropertyFlags) -> bool {
    flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
}

fn visible(flags: vk::MemoryPropertyFlags) -> bool {
    flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
}

pub const DEVICE_LOCAL_TIERS: [MemoryTier; 2] = [
    MemoryTier {
        name: "device-local only",
        matches: exactly_device_local,
    },
    MemoryTier {
        name: "device-local",
        matches: includes_device_local,
    },
];

pub const HOST_VISIBLE_TIERS: [MemoryTier; 3] = [
    MemoryTier {
        name: "host-visible coherent device-local",
        matches: visible_coherent_local,
    },
    MemoryTier {
        name: "host-visible coherent",
        matches: visible_coherent,
    },
    MemoryTier {
        name: "host-visible",
        matches: visible,
    },
];

/// Tier index past which the host must invalidate before reading.
pub const FIRST_NON_COHERENT_HOST_TIER: usize = 2;

/// A memory type picked by [`find_memory_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryChoice {
    pub index: u32,
    pub tier: usize,
}

/// Returns the first memory type satisfying the earliest tier.
pub fn find_memory_type(types: &[MemoryTypeDesc], tiers: &[MemoryTier]) -> Option<MemoryChoice> {
    tiers.iter().enumerate().find_map(|(tier, predicate)| {
        types
            .iter()
            .position(|ty| (predicate.matches)(ty.flags))
            .map(|index| MemoryChoice {
                index: index as u32,
                tier,
            })
    })
}

/// A queue family picked by [`select_queue_family`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueChoice {
    pub index: u32,
    /// True when the family has compute but no graphics.
    pub dedicated: bool,
}

/// Prefers a compute family without graphics, then any compute family.
pub fn select_queue_family(families: &[QueueFamilyDesc]) -> Option<QueueChoice> {
    let dedicated = families
        .iter()
        .position(|f| f.supports_compute() && !f.flags.contains(vk::QueueFlags::GRAPHICS));
    if let Some(index) = dedicated {
        return Some(QueueChoice {
            index: index as u32,
            dedicated: true,
        });
    }
    families
        .iter()
        .position(QueueFamilyDesc::supports_compute)
        .map(|index| QueueChoice {
            index: index as u32,
            dedicated: false,
        })
}

/// Dimensions the job needs the device to support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionCriteria {
    pub width: u32,
    pub height: u32,
}

/// The immutable outcome of selection, threaded through every later stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionResult {
    pub physical_device: vk::PhysicalDevice,
    pub device_index: usize,
    pub queue_family_index: u32,
    pub device_local_memory_type: u32,
    pub host_visible_memory_type: u32,
    pub device_local_tier: usize,
    pub host_visible_tier: usize,
    pub dedicated_compute_queue: bool,
}

impl SelectionResult {
    /// Whether mapped reads need an explicit invalidate.
    pub fn host_memory_is_coherent(&self) -> bool {
        self.host_visible_tier < FIRST_NON_COHERENT_HOST_TIER
    }
}

fn check_limit(limit_name: &'static str, requested: u32, limit: u32) -> Result<(), CapabilityError> {
    if requested > limit {
        return Err(CapabilityError::ExtentExceedsLimit {
            limit_name,
            requested,
            limit,
        });
    }
    Ok(())
}

/// Runs every selection step against a single device.
pub fn evaluate_device(
    device_index: usize,
    caps: &DeviceCapabilities,
    criteria: &SelectionCriteria,
) -> Result<SelectionResult, CapabilityError> {
    if caps.kind == DeviceKind::Software {
        return Err(CapabilityError::SoftwareDevice);
    }

    let queue = select_queue_family(&caps.queue_families).ok_or(CapabilityError::NoComputeQueue)?;
    let device_local =
        find_memory_type(&caps.memory_types, &DEVICE_LOCAL_TIERS).ok_or(CapabilityError::NoDeviceLocalMemory)?;
    let host_visible =
        find_memory_type(&caps.memory_types, &HOST_VISIBLE_TIERS).ok_or(CapabilityError::NoHostVisibleMemory)?;

    check_limit("maxImageDimension2D", criteria.width, caps.max_image_dimension_2d)?;
    check_limit("maxImageDimension2D", criteria.height, caps.max_image_dimension_2d)?;
    check_limit("maxComputeWorkGroupCount[0]", criteria.width, caps.max_compute_work_group_count[0])?;
    check_limit("maxComputeWorkGroupCount[1]", criteria.height, caps.max_compute_work_group_count[1])?;

    Ok(SelectionResult {
        physical_device: caps.handle,
        device_index,
        queue_family_index: queue.index,
        device_local_memory_type: device_local.index,
        host_visible_memory_type: host_visible.index,
        device_local_tier: device_local.tier,
        host_visible_tier: host_visible.tier,
        dedicated_compute_queue: queue.dedicated,
    })
}

/// Picks the first device, in enumeration order, that passes every step.
///
/// Fails with [`CapabilityError::NoSuitableDevice`] only after all candidates
/// have been rejected; the error lists each rejection.
pub fn select(
    candidates: &[DeviceCapabilities],
    criteria: &SelectionCriteria,
) -> Result<SelectionResult, CapabilityError> {
    let mut rejections = Vec::new();

    for (device_index, caps) in candidates.iter().enumerate() {
        info!("Evaluating device: {}", caps.name);
        match evaluate_device(device_index, caps, criteria) {
            Ok(selection) => {
                info!(
                    "Selected device #{} {}: queue family {}{}, device-local type {} ({}), host-visible type {} ({})",
                    device_index,
                    caps.name,
                    selection.queue_family_index,
                    if selection.dedicated_compute_queue { " (compute-only)" } else { "" },
                    selection.device_local_memory_type,
                    DEVICE_LOCAL_TIERS[selection.device_local_tier].name,
                    selection.host_visible_memory_type,
                    HOST_VISIBLE_TIERS[selection.host_visible_tier].name,
                );
                return Ok(selection);
            }
            Err(reason) => {
                debug!("Device #{} {} rejected: {}", device_index, caps.name, reason);
                rejections.push(DeviceRejection {
                    device_index,
                    device_name: caps.name.clone(),
                    reason,
                });
            }
        }
    }

    Err(CapabilityError::NoSuitableDevice { rejections })
}
