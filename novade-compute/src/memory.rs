//! Single fixed-size device memory allocations and scoped host mappings.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::LogicalDevice;
use crate::error::{ComputeError, Result, Stage, VkResultExt};

/// What a resource needs from its backing allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: vk::DeviceSize,
    pub alignment: vk::DeviceSize,
    pub memory_type_bits: u32,
}

impl MemoryRequirements {
    /// Whether `memory_type_index` is permitted by the requirement bitmask.
    pub fn allows(&self, memory_type_index: u32) -> bool {
        memory_type_index < 32 && self.memory_type_bits & (1 << memory_type_index) != 0
    }

    /// Checks that `block` may back a resource with these requirements.
    pub fn check_block(&self, memory_type_index: u32, block_size: vk::DeviceSize) -> Result<()> {
        if !self.allows(memory_type_index) {
            return Err(ComputeError::MemoryTypeNotAllowed {
                index: memory_type_index,
                bitmask: self.memory_type_bits,
            });
        }
        if block_size < self.size {
            return Err(ComputeError::InsufficientAllocation {
                allocated: block_size,
                required: self.size,
            });
        }
        Ok(())
    }
}

impl From<vk::MemoryRequirements> for MemoryRequirements {
    fn from(req: vk::MemoryRequirements) -> Self {
        Self {
            size: req.size,
            alignment: req.alignment,
            memory_type_bits: req.memory_type_bits,
        }
    }
}

/// One `vkAllocateMemory` allocation, freed on drop.
pub struct DeviceMemoryBlock {
    device: Arc<LogicalDevice>,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    memory_type_index: u32,
}

impl DeviceMemoryBlock {
    /// Allocates `size` bytes from `memory_type_index`. No retry, no splitting.
    pub fn allocate(device: Arc<LogicalDevice>, size: vk::DeviceSize, memory_type_index: u32) -> Result<Self> {
        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.allocate_memory(&allocate_info, None) }.at(Stage::MemoryAllocation)?;
        debug!("Allocated {} bytes from memory type {}", size, memory_type_index);

        Ok(Self {
            device,
            memory,
            size,
            memory_type_index,
        })
    }

    pub fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Maps the whole allocation. The mapping is released when the guard drops.
    ///
    /// Non-coherent memory is invalidated after mapping so device writes that
    /// completed before the call are visible.
    pub fn map(&self) -> Result<MappedMemory<'_>> {
        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        }
        .at(Stage::Mapping)?;

        let mapping = MappedMemory {
            block: self,
            ptr: ptr.cast::<u8>(),
            len: self.size as usize,
        };

        let coherent = self
            .device
            .memory_type_flags(self.memory_type_index)
            .map_or(false, |flags| flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
        if !coherent {
            let range = vk::MappedMemoryRange::builder()
                .memory(self.memory)
                .offset(0)
                .size(vk::WHOLE_SIZE)
                .build();
            // `mapping` unmaps on the error path.
            unsafe { self.device.invalidate_mapped_memory_ranges(std::slice::from_ref(&range)) }
                .at(Stage::Invalidate)?;
            debug!("Invalidated non-coherent mapping of memory type {}", self.memory_type_index);
        }

        Ok(mapping)
    }
}

impl Drop for DeviceMemoryBlock {
    fn drop(&mut self) {
        unsafe {
            self.device.free_memory(self.memory, None);
        }
        info!("Device memory ({} bytes) freed.", self.size);
    }
}

/// A host mapping of a [`DeviceMemoryBlock`], unmapped on drop.
///
/// Borrowing the block keeps it from being freed while mapped.
pub struct MappedMemory<'a> {
    block: &'a DeviceMemoryBlock,
    ptr: *const u8,
    len: usize,
}

impl<'a> MappedMemory<'a> {
    pub fn as_bytes(&self) -> &[u8] {
        // Valid for `len` bytes until `unmap_memory` in `drop`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        unsafe {
            self.block.device.unmap_memory(self.block.memory);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn requirements(size: u64, bits: u32) -> MemoryRequirements {
        MemoryRequirements {
            size,
            alignment: 256,
            memory_type_bits: bits,
        }
    }

    #[rstest]
    #[case(0b0110, 1, true)]
    #[case(0b0110, 2, true)]
    #[case(0b0110, 0, false)]
    #[case(0b0110, 3, false)]
    #[case(u32::MAX, 31, true)]
    #[case(u32::MAX, 32, false)]
    fn bitmask_membership(#[case] bits: u32, #[case] index: u32, #[case] allowed: bool) {
        assert_eq!(requirements(64, bits).allows(index), allowed);
    }

    #[test]
    fn block_with_disallowed_type_is_rejected() {
        let err = requirements(256, 0b01).check_block(1, 256).unwrap_err();
        assert!(matches!(err, ComputeError::MemoryTypeNotAllowed { index: 1, bitmask: 0b01 }));
    }

    #[test]
    fn block_smaller_than_queried_size_is_rejected() {
        // width * height * 4 is not enough when the driver pads rows.
        let err = requirements(512, 0b10).check_block(1, 8 * 8 * 4).unwrap_err();
        assert!(matches!(
            err,
            ComputeError::InsufficientAllocation {
                allocated: 256,
                required: 512
            }
        ));
        assert!(requirements(512, 0b10).check_block(1, 512).is_ok());
    }
}
