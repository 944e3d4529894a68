//! Regular patch grid over an image.
//!
//! Both models take fixed-size square inputs, so every image is cut into
//! a grid of `size`×`size` crops whose origins are `stride` pixels apart.
//! With `stride == size` the crops tile the image without overlap;
//! trailing pixels that do not fill a whole patch are never visited.
//!
//! Crops are pixel-exact copies of the source region. Nothing is
//! resampled: the models were trained on un-scaled tissue.

use image::RgbaImage;

use crate::types::{Dimensions, PipelineError};

/// Grid of patch origins for one image.
///
/// `columns = floor((W - size) / stride) + 1` and
/// `rows = floor((H - size) / stride) + 1`. Patches are indexed
/// row-major: index `i` is column `i % columns` of row `i / columns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchGrid {
    columns: u32,
    rows: u32,
    size: u32,
    stride: u32,
}

impl PatchGrid {
    /// Compute the grid for an image of the given dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `size` or `stride` is
    /// zero, and [`PipelineError::ImageTooSmall`] if the image is
    /// narrower or shorter than one patch.
    pub fn new(dimensions: Dimensions, size: u32, stride: u32) -> Result<Self, PipelineError> {
        if size == 0 || stride == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "patch size and stride must be positive (size={size}, stride={stride})"
            )));
        }
        if dimensions.width < size || dimensions.height < size {
            return Err(PipelineError::ImageTooSmall {
                dimensions,
                patch_size: size,
            });
        }
        Ok(Self {
            columns: (dimensions.width - size) / stride + 1,
            rows: (dimensions.height - size) / stride + 1,
            size,
            stride,
        })
    }

    /// Patches per row (`wp`).
    #[must_use]
    pub const fn columns(&self) -> u32 {
        self.columns
    }

    /// Patch rows (`hp`).
    #[must_use]
    pub const fn rows(&self) -> u32 {
        self.rows
    }

    /// Patch edge length in pixels.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Distance between neighbouring origins in pixels.
    #[must_use]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    /// Total number of patches.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    /// Always `false`: construction rejects grids without patches.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pixel origin of the patch at `(column, row)`.
    #[must_use]
    pub const fn origin(&self, column: u32, row: u32) -> (u32, u32) {
        (column * self.stride, row * self.stride)
    }

    /// Grid cell of the row-major patch index.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn cell(&self, index: usize) -> (u32, u32) {
        let columns = self.columns as usize;
        ((index % columns) as u32, (index / columns) as u32)
    }

    /// Pixel origin of the row-major patch index.
    #[must_use]
    pub const fn offset(&self, index: usize) -> (u32, u32) {
        let (column, row) = self.cell(index);
        self.origin(column, row)
    }

    /// Size of the region the grid's patches cover, starting at the
    /// image origin.
    #[must_use]
    pub const fn covered(&self) -> Dimensions {
        Dimensions {
            width: (self.columns - 1) * self.stride + self.size,
            height: (self.rows - 1) * self.stride + self.size,
        }
    }
}

/// One square crop of the source image.
#[derive(Debug, Clone)]
pub struct Patch {
    /// Grid column (`w`).
    pub column: u32,
    /// Grid row (`h`).
    pub row: u32,
    /// Cropped pixels, `size`×`size`.
    pub image: RgbaImage,
}

/// Cuts an image into the patches of its [`PatchGrid`].
#[derive(Debug, Clone, Copy)]
pub struct PatchExtractor<'a> {
    image: &'a RgbaImage,
    grid: PatchGrid,
}

impl<'a> PatchExtractor<'a> {
    /// Prepare to cut `image` into `size`×`size` patches `stride` apart.
    ///
    /// # Errors
    ///
    /// Same as [`PatchGrid::new`].
    pub fn new(image: &'a RgbaImage, size: u32, stride: u32) -> Result<Self, PipelineError> {
        let grid = PatchGrid::new(Dimensions::of(image), size, stride)?;
        Ok(Self { image, grid })
    }

    /// Grid dimensions `(wp, hp)`.
    #[must_use]
    pub const fn shape(&self) -> (u32, u32) {
        (self.grid.columns, self.grid.rows)
    }

    /// The underlying grid.
    #[must_use]
    pub const fn grid(&self) -> PatchGrid {
        self.grid
    }

    /// Crop the patch at grid cell `(column, row)`.
    #[must_use]
    pub fn extract_patch(&self, (column, row): (u32, u32)) -> Patch {
        let (x, y) = self.grid.origin(column, row);
        let image =
            image::imageops::crop_imm(self.image, x, y, self.grid.size, self.grid.size).to_image();
        Patch { column, row, image }
    }

    /// Crop every patch, row by row (`h` outer, `w` inner).
    #[must_use]
    pub fn extract_patches(&self) -> Vec<Patch> {
        let mut patches = Vec::with_capacity(self.grid.len());
        for row in 0..self.grid.rows {
            for column in 0..self.grid.columns {
                patches.push(self.extract_patch((column, row)));
            }
        }
        patches
    }
}
