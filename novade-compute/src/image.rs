//! Storage image creation, memory requirements and row layout.
//!
//! An image starts as [`UnboundImage`]. Binding consumes it together with its
//! memory block and yields a [`StorageImage`] with a view, so an image can be
//! bound at most once and a view never exists over unbound memory.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::LogicalDevice;
use crate::error::{ComputeError, Result, Stage, VkResultExt};
use crate::memory::{DeviceMemoryBlock, MemoryRequirements};

/// The only texel format this executor produces.
pub const IMAGE_FORMAT: vk::Format = vk::Format::R32_SFLOAT;
/// Bytes per `R32_SFLOAT` texel.
pub const TEXEL_SIZE: u64 = 4;

/// Logical width and height of a 2D image. Depth is always one.
///
/// Both dimensions are non-zero; the only constructor is [`ImageExtent::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageExtent {
    width: u32,
    height: u32,
}

impl ImageExtent {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ComputeError::InvalidExtent { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn to_vk(self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: 1,
        }
    }
}

/// Placement of texel rows inside the backing memory, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLayout {
    pub offset: u64,
    pub row_pitch: u64,
    pub size: u64,
}

impl RowLayout {
    /// Checks that the layout can hold `extent` texels.
    pub fn validate(&self, extent: ImageExtent) -> Result<()> {
        let Some(last_row) = extent.height.checked_sub(1).filter(|_| extent.width > 0) else {
            return Err(ComputeError::InvalidExtent {
                width: extent.width,
                height: extent.height,
            });
        };
        let packed_row = u64::from(extent.width) * TEXEL_SIZE;
        if self.row_pitch < packed_row {
            return Err(ComputeError::RowLayout(format!(
                "row pitch {} is smaller than a packed row of {} bytes",
                self.row_pitch, packed_row
            )));
        }
        let needed = u64::from(last_row) * self.row_pitch + packed_row;
        if needed > self.size {
            return Err(ComputeError::RowLayout(format!(
                "{} rows at pitch {} need {} bytes but the subresource is {} bytes",
                extent.height, self.row_pitch, needed, self.size
            )));
        }
        Ok(())
    }

    /// Byte offset of texel (`row`, `col`) from the start of the allocation.
    pub fn texel_offset(&self, row: u32, col: u32) -> u64 {
        self.offset + u64::from(row) * self.row_pitch + u64::from(col) * TEXEL_SIZE
    }
}

impl From<vk::SubresourceLayout> for RowLayout {
    fn from(layout: vk::SubresourceLayout) -> Self {
        Self {
            offset: layout.offset,
            row_pitch: layout.row_pitch,
            size: layout.size,
        }
    }
}

pub(crate) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// A linear `R32_SFLOAT` storage image with no memory bound yet.
pub struct UnboundImage {
    device: Arc<LogicalDevice>,
    image: vk::Image,
    extent: ImageExtent,
    requirements: MemoryRequirements,
    row_layout: RowLayout,
}

impl UnboundImage {
    /// Creates the image exclusively owned by `queue_family_index`.
    ///
    /// There is no format or tiling negotiation: a driver rejection is final.
    pub fn create(device: Arc<LogicalDevice>, extent: ImageExtent, queue_family_index: u32) -> Result<Self> {
        let queue_family_indices = [queue_family_index];
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(IMAGE_FORMAT)
            .extent(extent.to_vk())
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::LINEAR)
            .usage(vk::ImageUsageFlags::STORAGE)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_family_indices)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&image_info, None) }.at(Stage::ImageCreation)?;

        let requirements: MemoryRequirements = unsafe { device.get_image_memory_requirements(image) }.into();
        let subresource = vk::ImageSubresource {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            array_layer: 0,
        };
        let row_layout: RowLayout = unsafe { device.get_image_subresource_layout(image, subresource) }.into();

        let unbound = Self {
            device,
            image,
            extent,
            requirements,
            row_layout,
        };
        // Dropping `unbound` destroys the image if the layout is unusable.
        unbound.row_layout.validate(extent)?;

        info!(
            "Created {}x{} storage image: {} bytes (alignment {}, type bits {:#b}), row pitch {}",
            extent.width,
            extent.height,
            requirements.size,
            requirements.alignment,
            requirements.memory_type_bits,
            row_layout.row_pitch
        );
        Ok(unbound)
    }

    pub fn requirements(&self) -> &MemoryRequirements {
        &self.requirements
    }

    pub fn row_layout(&self) -> &RowLayout {
        &self.row_layout
    }

    pub fn extent(&self) -> ImageExtent {
        self.extent
    }

    /// Binds `memory` at offset zero and creates the storage view.
    ///
    /// Both the image and the block are consumed; on failure they are released.
    pub fn bind(mut self, memory: DeviceMemoryBlock) -> Result<StorageImage> {
        self.requirements
            .check_block(memory.memory_type_index(), memory.size())?;

        unsafe { self.device.bind_image_memory(self.image, memory.handle(), 0) }.at(Stage::MemoryBinding)?;
        debug!("Bound memory type {} to storage image", memory.memory_type_index());

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(IMAGE_FORMAT)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            })
            .subresource_range(color_subresource_range());
        let view = unsafe { self.device.create_image_view(&view_info, None) }.at(Stage::ImageViewCreation)?;

        let image = std::mem::replace(&mut self.image, vk::Image::null());
        Ok(StorageImage {
            device: Arc::clone(&self.device),
            image,
            view,
            extent: self.extent,
            row_layout: self.row_layout,
            memory,
        })
    }
}

impl Drop for UnboundImage {
    fn drop(&mut self) {
        if self.image != vk::Image::null() {
            unsafe {
                self.device.destroy_image(self.image, None);
            }
            debug!("Unbound image destroyed.");
        }
    }
}

/// A bound storage image with its view and backing memory.
pub struct StorageImage {
    device: Arc<LogicalDevice>,
    image: vk::Image,
    view: vk::ImageView,
    extent: ImageExtent,
    row_layout: RowLayout,
    // Freed after the image in `drop`.
    memory: DeviceMemoryBlock,
}

impl StorageImage {
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> ImageExtent {
        self.extent
    }

    pub fn row_layout(&self) -> &RowLayout {
        &self.row_layout
    }

    pub fn memory(&self) -> &DeviceMemoryBlock {
        &self.memory
    }
}

impl Drop for StorageImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
        }
        info!("Storage image and view destroyed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn extent(width: u32, height: u32) -> ImageExtent {
        ImageExtent::new(width, height).unwrap()
    }

    #[test]
    fn zero_extent_is_rejected() {
        assert!(matches!(
            ImageExtent::new(0, 8),
            Err(ComputeError::InvalidExtent { width: 0, height: 8 })
        ));
        assert!(ImageExtent::new(8, 0).is_err());
    }

    #[test]
    fn degenerate_extent_fails_validation_instead_of_underflowing() {
        let layout = RowLayout {
            offset: 0,
            row_pitch: 64,
            size: 512,
        };
        for (width, height) in [(0, 0), (0, 8), (8, 0)] {
            let degenerate = ImageExtent { width, height };
            assert!(matches!(
                layout.validate(degenerate),
                Err(ComputeError::InvalidExtent { .. })
            ));
        }
    }

    #[test]
    fn padded_rows_use_queried_pitch() {
        let layout = RowLayout {
            offset: 0,
            row_pitch: 64,
            size: 512,
        };
        layout.validate(extent(8, 8)).unwrap();
        assert_eq!(layout.texel_offset(0, 0), 0);
        assert_eq!(layout.texel_offset(0, 7), 28);
        assert_eq!(layout.texel_offset(1, 0), 64);
        assert_eq!(layout.texel_offset(3, 2), 3 * 64 + 8);
    }

    #[test]
    fn texel_offset_includes_base_offset() {
        let layout = RowLayout {
            offset: 128,
            row_pitch: 32,
            size: 256,
        };
        assert_eq!(layout.texel_offset(2, 1), 128 + 64 + 4);
    }

    #[test]
    fn pitch_smaller_than_packed_row_is_rejected() {
        let layout = RowLayout {
            offset: 0,
            row_pitch: 16,
            size: 1024,
        };
        assert!(matches!(layout.validate(extent(8, 8)), Err(ComputeError::RowLayout(_))));
    }

    #[test]
    fn last_row_only_needs_packed_width() {
        // 8 rows at pitch 64: the final row ends at 7 * 64 + 32.
        let layout = RowLayout {
            offset: 0,
            row_pitch: 64,
            size: 7 * 64 + 32,
        };
        layout.validate(extent(8, 8)).unwrap();

        let short = RowLayout { size: 7 * 64 + 31, ..layout };
        assert!(short.validate(extent(8, 8)).is_err());
    }
}
