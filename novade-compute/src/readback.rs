//! Host access to the result image.

use crate::error::{ComputeError, Result};
use crate::executor::ExecutionReceipt;
use crate::image::{ImageExtent, RowLayout, StorageImage, TEXEL_SIZE};
use crate::memory::MappedMemory;

/// Row-strided `R32_SFLOAT` texels over a byte buffer.
///
/// Element (`row`, `col`) is read at `offset + row * row_pitch + col * 4`.
#[derive(Debug, Clone, Copy)]
pub struct StridedView<'a> {
    bytes: &'a [u8],
    layout: RowLayout,
    extent: ImageExtent,
}

impl<'a> StridedView<'a> {
    pub fn new(bytes: &'a [u8], layout: RowLayout, extent: ImageExtent) -> Result<Self> {
        layout.validate(extent)?;
        // `validate` guarantees both dimensions are non-zero.
        let end = layout.texel_offset(extent.height() - 1, extent.width() - 1) + TEXEL_SIZE;
        if end > bytes.len() as u64 {
            return Err(ComputeError::RowLayout(format!(
                "last texel ends at byte {} but only {} bytes are mapped",
                end,
                bytes.len()
            )));
        }
        Ok(Self { bytes, layout, extent })
    }

    pub fn extent(&self) -> ImageExtent {
        self.extent
    }

    pub fn row_pitch(&self) -> u64 {
        self.layout.row_pitch
    }

    /// Reads one texel. Panics if (`row`, `col`) is outside the extent.
    pub fn get(&self, row: u32, col: u32) -> f32 {
        assert!(
            row < self.extent.height() && col < self.extent.width(),
            "texel ({row}, {col}) outside {}x{} image",
            self.extent.width(),
            self.extent.height()
        );
        let at = self.layout.texel_offset(row, col) as usize;
        let mut texel = [0u8; TEXEL_SIZE as usize];
        texel.copy_from_slice(&self.bytes[at..at + TEXEL_SIZE as usize]);
        f32::from_ne_bytes(texel)
    }

    /// The `width` texels of `row`, skipping any padding.
    pub fn row(&self, row: u32) -> impl Iterator<Item = f32> + '_ {
        (0..self.extent.width()).map(move |col| self.get(row, col))
    }

    /// Copies the texels into a tightly packed row-major vector.
    pub fn to_dense(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.extent.texel_count());
        for row in 0..self.extent.height() {
            out.extend(self.row(row));
        }
        out
    }
}

/// A mapped view of a finished [`StorageImage`].
///
/// The mapping is released when this value drops.
pub struct ImageReadback<'a> {
    mapping: MappedMemory<'a>,
    layout: RowLayout,
    extent: ImageExtent,
}

impl<'a> ImageReadback<'a> {
    /// Maps `image`'s memory. Fails unless `receipt` shows the image is `Readable`.
    pub fn map(image: &'a StorageImage, receipt: &ExecutionReceipt) -> Result<Self> {
        receipt.check_host_read()?;
        let mapping = image.memory().map()?;
        let readback = Self {
            mapping,
            layout: *image.row_layout(),
            extent: image.extent(),
        };
        // Validates the mapped length up front.
        readback.view()?;
        Ok(readback)
    }

    pub fn view(&self) -> Result<StridedView<'_>> {
        StridedView::new(self.mapping.as_bytes(), self.layout, self.extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Builds a buffer whose rows are padded to `pitch` bytes with NaNs in the gap.
    fn padded(extent: ImageExtent, offset: usize, pitch: usize, value: impl Fn(u32, u32) -> f32) -> Vec<u8> {
        let mut bytes = vec![0u8; offset + pitch * extent.height() as usize];
        for chunk in bytes[offset..].chunks_exact_mut(4) {
            chunk.copy_from_slice(&f32::NAN.to_ne_bytes());
        }
        for row in 0..extent.height() {
            for col in 0..extent.width() {
                let at = offset + row as usize * pitch + col as usize * 4;
                bytes[at..at + 4].copy_from_slice(&value(row, col).to_ne_bytes());
            }
        }
        bytes
    }

    #[test]
    fn padded_rows_are_skipped() {
        let extent = ImageExtent::new(3, 2).unwrap();
        let bytes = padded(extent, 0, 16, |r, c| (r * 10 + c) as f32);
        let layout = RowLayout {
            offset: 0,
            row_pitch: 16,
            size: bytes.len() as u64,
        };
        let view = StridedView::new(&bytes, layout, extent).unwrap();

        assert_eq!(view.get(1, 2), 12.0);
        assert_eq!(view.row(0).collect::<Vec<_>>(), vec![0.0, 1.0, 2.0]);
        assert_eq!(view.to_dense(), vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn subresource_offset_is_honoured() {
        let extent = ImageExtent::new(2, 2).unwrap();
        let bytes = padded(extent, 64, 8, |_, _| 1.0);
        let layout = RowLayout {
            offset: 64,
            row_pitch: 8,
            size: 16,
        };
        let view = StridedView::new(&bytes, layout, extent).unwrap();
        assert_eq!(view.to_dense(), vec![1.0; 4]);
    }

    #[test]
    fn eight_by_eight_ones() {
        let extent = ImageExtent::new(8, 8).unwrap();
        let bytes = padded(extent, 0, 64, |_, _| 1.0);
        let layout = RowLayout {
            offset: 0,
            row_pitch: 64,
            size: bytes.len() as u64,
        };
        let view = StridedView::new(&bytes, layout, extent).unwrap();
        assert!(view.row_pitch() >= 32);
        let dense = view.to_dense();
        assert_eq!(dense.len(), 64);
        assert!(dense.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let extent = ImageExtent::new(4, 4).unwrap();
        let layout = RowLayout {
            offset: 0,
            row_pitch: 16,
            size: 64,
        };
        let bytes = vec![0u8; 60];
        assert!(matches!(
            StridedView::new(&bytes, layout, extent),
            Err(ComputeError::RowLayout(_))
        ));
    }

    #[test]
    #[should_panic(expected = "outside 2x2 image")]
    fn out_of_range_texel_panics() {
        let extent = ImageExtent::new(2, 2).unwrap();
        let bytes = vec![0u8; 16];
        let layout = RowLayout {
            offset: 0,
            row_pitch: 8,
            size: 16,
        };
        let view = StridedView::new(&bytes, layout, extent).unwrap();
        view.get(0, 2);
    }
}
