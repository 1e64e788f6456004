//! Device selection over synthetic capability records.

use ash::vk::{self, Handle};
use novade_compute::capability::{DeviceCapabilities, DeviceKind, MemoryHeapDesc, MemoryTypeDesc, QueueFamilyDesc};
use novade_compute::selector::{self, SelectionCriteria, HOST_VISIBLE_TIERS};
use novade_compute::CapabilityError;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn device(raw: u64, kind: DeviceKind, queues: &[vk::QueueFlags], memory: &[vk::MemoryPropertyFlags]) -> DeviceCapabilities {
    DeviceCapabilities {
        handle: vk::PhysicalDevice::from_raw(raw),
        name: format!("device-{raw}"),
        kind,
        vendor_id: 0x10de,
        device_id: raw as u32,
        api_version: vk::API_VERSION_1_0,
        driver_version: 0,
        max_image_dimension_2d: 8192,
        max_compute_work_group_count: [65535; 3],
        linear_storage_image_r32f: true,
        queue_families: queues
            .iter()
            .map(|&flags| QueueFamilyDesc { flags, queue_count: 1 })
            .collect(),
        memory_types: memory
            .iter()
            .map(|&flags| MemoryTypeDesc { flags, heap_index: 0 })
            .collect(),
        memory_heaps: vec![MemoryHeapDesc {
            size: 256 << 20,
            device_local: true,
        }],
    }
}

const DL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
const HV: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
const HC: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_COHERENT;
const CACHED: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_CACHED;

fn criteria() -> SelectionCriteria {
    SelectionCriteria { width: 8, height: 8 }
}

/// Memory layouts seen on common drivers.
#[rstest]
#[case::discrete(vec![DL, HV | HC, HV | HC | CACHED, DL | HV | HC], 0, 3)]
#[case::integrated(vec![DL, DL | HV | HC, DL | HV | HC | CACHED], 0, 1)]
#[case::no_unified(vec![DL, HV | HC, HV | HC | CACHED], 0, 1)]
#[case::all_host_visible(vec![DL | HV | HC], 0, 0)]
fn memory_indices_follow_tiers(
    #[case] memory: Vec<vk::MemoryPropertyFlags>,
    #[case] device_local: u32,
    #[case] host_visible: u32,
) {
    let caps = device(1, DeviceKind::Discrete, &[vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE], &memory);
    let selection = selector::select(&[caps], &criteria()).unwrap();

    assert_eq!(selection.device_local_memory_type, device_local);
    assert_eq!(selection.host_visible_memory_type, host_visible);
    assert!((selection.host_visible_memory_type as usize) < memory.len());
    assert!(selection.host_memory_is_coherent());
}

#[test]
fn first_suitable_device_in_enumeration_order_wins() {
    let integrated = device(1, DeviceKind::Integrated, &[vk::QueueFlags::COMPUTE], &[DL | HV | HC]);
    let discrete = device(2, DeviceKind::Discrete, &[vk::QueueFlags::COMPUTE], &[DL, HV | HC]);

    let selection = selector::select(&[integrated, discrete], &criteria()).unwrap();
    assert_eq!(selection.device_index, 0);
    assert_eq!(selection.physical_device, vk::PhysicalDevice::from_raw(1));
}

#[test]
fn selection_is_deterministic() {
    let devices = vec![
        device(1, DeviceKind::Software, &[vk::QueueFlags::COMPUTE], &[DL, HV | HC]),
        device(2, DeviceKind::Discrete, &[vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, vk::QueueFlags::COMPUTE], &[DL, HV | HC]),
    ];
    let first = selector::select(&devices, &criteria()).unwrap();
    let second = selector::select(&devices, &criteria()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.queue_family_index, 1);
}

#[test]
fn cpu_only_system_has_no_suitable_device() {
    let devices = vec![device(1, DeviceKind::Software, &[vk::QueueFlags::COMPUTE], &[DL, HV | HC])];
    let err = selector::select(&devices, &criteria()).unwrap_err();
    assert!(matches!(err, CapabilityError::NoSuitableDevice { ref rejections } if rejections.len() == 1));
}

#[test]
fn oversized_extent_is_not_clamped() {
    let caps = device(1, DeviceKind::Discrete, &[vk::QueueFlags::COMPUTE], &[DL, HV | HC]);
    let huge = SelectionCriteria {
        width: 9000,
        height: 8,
    };
    let err = selector::select(&[caps], &huge).unwrap_err();
    let CapabilityError::NoSuitableDevice { rejections } = err else {
        panic!("expected NoSuitableDevice");
    };
    assert_eq!(
        rejections[0].reason,
        CapabilityError::ExtentExceedsLimit {
            limit_name: "maxImageDimension2D",
            requested: 9000,
            limit: 8192,
        }
    );
}

#[test]
fn host_visible_tiers_are_ordered_strongest_first() {
    let names: Vec<_> = HOST_VISIBLE_TIERS.iter().map(|t| t.name).collect();
    assert_eq!(
        names,
        vec!["host-visible coherent device-local", "host-visible coherent", "host-visible"]
    );
}
