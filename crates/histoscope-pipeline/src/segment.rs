//! Patch-wise segmentation with a stitched mask overlay.
//!
//! Each image is cut into 256px patches, the segmentation network scores
//! every pixel of every patch, pixels scoring strictly above the
//! threshold are painted opaque black over the patch, and the processed
//! patches are copied back into a canvas the size of the original image.
//!
//! The canvas starts fully transparent. When the image dimensions are
//! not multiples of the patch size, the strip beyond the last whole
//! patch stays transparent.

use image::Rgba;
use rayon::prelude::*;

use crate::diagnostics::{ImageDiagnostics, PipelineKind, StageDiagnostics, StageMetrics, timed};
use crate::model::{Model, PatchTensor, check_output};
use crate::patch::{PatchExtractor, PatchGrid};
use crate::types::{Dimensions, InferenceError, PatchConfig, PipelineError, RgbaImage};

/// Colour painted over masked pixels.
pub const MASK_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Outcome of segmenting one image.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Stitched overlay at the original image dimensions.
    pub overlay: RgbaImage,
    /// Patches sent to the model.
    pub patch_count: usize,
    /// Patches stitched without a mask because inference failed.
    pub failed_patches: usize,
    /// Pixels painted across all patches.
    pub masked_pixels: u64,
    /// Per-stage timing and counts.
    pub diagnostics: ImageDiagnostics,
}

/// Paint every pixel whose mask score is strictly above `threshold`
/// with [`MASK_COLOR`]. Other pixels keep their original colour.
///
/// `mask` is row-major with one score per pixel. Returns the number of
/// pixels painted.
///
/// # Errors
///
/// Returns [`InferenceError::OutputShape`] if `mask` does not have
/// exactly one score per pixel.
pub fn apply_mask(
    patch: &mut RgbaImage,
    mask: &[f32],
    threshold: f32,
) -> Result<u64, InferenceError> {
    let expected = patch.width() as usize * patch.height() as usize;
    if mask.len() != expected {
        return Err(InferenceError::OutputShape {
            expected,
            actual: mask.len(),
        });
    }
    let mut painted = 0;
    for (pixel, score) in patch.pixels_mut().zip(mask) {
        if *score > threshold {
            *pixel = MASK_COLOR;
            painted += 1;
        }
    }
    Ok(painted)
}

/// Copy row-major patches onto a transparent canvas of `dimensions`.
///
/// Patch `i` lands at [`PatchGrid::offset`]`(i)`. Anything falling
/// outside the canvas is clipped.
#[must_use]
pub fn stitch(dimensions: Dimensions, grid: &PatchGrid, patches: &[RgbaImage]) -> RgbaImage {
    let mut canvas = RgbaImage::new(dimensions.width, dimensions.height);
    for (index, patch) in patches.iter().enumerate() {
        let (dx, dy) = grid.offset(index);
        image::imageops::replace(&mut canvas, patch, i64::from(dx), i64::from(dy));
    }
    canvas
}

/// Segment one image into a stitched overlay.
///
/// Patches are predicted in parallel. A patch whose inference fails is
/// logged and stitched back unmasked.
///
/// # Errors
///
/// Returns [`PipelineError::ImageTooSmall`] if the image cannot hold a
/// single patch, [`PipelineError::InvalidConfig`] for a zero patch size
/// or stride, and [`PipelineError::NoValidPredictions`] if every patch
/// failed.
pub fn segment_image<M: Model + ?Sized>(
    model: &M,
    image: &RgbaImage,
    patch: &PatchConfig,
    threshold: f32,
) -> Result<Segmentation, PipelineError> {
    let start = web_time::Instant::now();
    let dimensions = Dimensions::of(image);

    let (extracted, extraction_time) = timed(|| {
        PatchExtractor::new(image, patch.patch_size, patch.stride)
            .map(|extractor| (extractor.grid(), extractor.extract_patches()))
    });
    let (grid, patches) = extracted?;
    let patch_count = patches.len();
    let pixels_per_patch = grid.size() as usize * grid.size() as usize;

    let (masks, inference_time) = timed(|| {
        patches
            .par_iter()
            .map(|p| {
                let mask = model.predict(&PatchTensor::from_image(&p.image))?;
                check_output(&mask, pixels_per_patch)?;
                Ok(mask)
            })
            .collect::<Vec<Result<Vec<f32>, InferenceError>>>()
    });

    let ((overlay, failed_patches, masked_pixels), aggregation_time) = timed(|| {
        let mut failed = 0_usize;
        let mut painted = 0_u64;
        let processed: Vec<RgbaImage> = patches
            .into_iter()
            .zip(masks)
            .map(|(p, mask)| {
                let mut pixels = p.image;
                match mask.and_then(|m| apply_mask(&mut pixels, &m, threshold)) {
                    Ok(n) => painted += n,
                    Err(e) => {
                        log::warn!(
                            "segmentation left patch ({}, {}) unmasked: {e}",
                            p.column,
                            p.row
                        );
                        failed += 1;
                    }
                }
                pixels
            })
            .collect();
        (stitch(dimensions, &grid, &processed), failed, painted)
    });

    if failed_patches == patch_count {
        return Err(PipelineError::NoValidPredictions { patch_count });
    }

    let diagnostics = ImageDiagnostics {
        kind: PipelineKind::Segmentation,
        extraction: StageDiagnostics {
            duration: extraction_time,
            metrics: StageMetrics::Extraction {
                image: dimensions,
                patch_size: grid.size(),
                stride: grid.stride(),
                columns: grid.columns(),
                rows: grid.rows(),
            },
        },
        inference: StageDiagnostics {
            duration: inference_time,
            metrics: StageMetrics::Inference {
                patch_count,
                failed_count: failed_patches,
            },
        },
        aggregation: StageDiagnostics {
            duration: aggregation_time,
            metrics: StageMetrics::Stitch {
                masked_pixels,
                canvas: dimensions,
            },
        },
        total_duration: start.elapsed(),
    };

    Ok(Segmentation {
        overlay,
        patch_count,
        failed_patches,
        masked_pixels,
        diagnostics,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_possible_truncation)]
mod tests {
    use super::*;

    const GREY: Rgba<u8> = Rgba([120, 130, 140, 255]);

    /// Masks the left half of every patch.
    struct LeftHalf;

    impl Model for LeftHalf {
        fn predict(&self, input: &PatchTensor) -> Result<Vec<f32>, InferenceError> {
            let [_, h, w, _] = input.shape();
            Ok((0..h * w)
                .map(|i| if i % w < w / 2 { 0.9 } else { 0.1 })
                .collect())
        }
    }

    /// Fails on patches whose first pixel is pure red.
    struct FailOnRed;

    impl Model for FailOnRed {
        fn predict(&self, input: &PatchTensor) -> Result<Vec<f32>, InferenceError> {
            if input.data()[0] > 200.0 {
                return Err(InferenceError::Runtime("boom".into()));
            }
            Ok(vec![1.0; input.pixel_count()])
        }
    }

    fn config(size: u32) -> PatchConfig {
        PatchConfig {
            patch_size: size,
            stride: size,
        }
    }

    #[test]
    fn threshold_is_strict() {
        let mut patch = RgbaImage::from_pixel(2, 1, GREY);
        let painted = apply_mask(&mut patch, &[0.3, 0.30001], 0.3).unwrap();
        assert_eq!(painted, 1);
        assert_eq!(*patch.get_pixel(0, 0), GREY);
        assert_eq!(*patch.get_pixel(1, 0), MASK_COLOR);
    }

    #[test]
    fn mask_is_row_major() {
        let mut patch = RgbaImage::from_pixel(2, 2, GREY);
        apply_mask(&mut patch, &[0.0, 0.0, 1.0, 0.0], 0.3).unwrap();
        assert_eq!(*patch.get_pixel(0, 1), MASK_COLOR);
        assert_eq!(*patch.get_pixel(1, 0), GREY);
    }

    #[test]
    fn mask_length_checked() {
        let mut patch = RgbaImage::from_pixel(2, 2, GREY);
        assert_eq!(
            apply_mask(&mut patch, &[1.0; 3], 0.3),
            Err(InferenceError::OutputShape {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(*patch.get_pixel(0, 0), GREY);
    }

    #[test]
    fn stitch_places_patches_row_major() {
        let dims = Dimensions {
            width: 4,
            height: 4,
        };
        let grid = PatchGrid::new(dims, 2, 2).unwrap();
        let patches: Vec<RgbaImage> = (0..4)
            .map(|i| RgbaImage::from_pixel(2, 2, Rgba([i as u8 * 10, 0, 0, 255])))
            .collect();
        let canvas = stitch(dims, &grid, &patches);
        assert_eq!(canvas.get_pixel(0, 0).0[0], 0);
        assert_eq!(canvas.get_pixel(3, 0).0[0], 10);
        // Index 2 lands at dx=0, dy=2.
        assert_eq!(canvas.get_pixel(0, 2).0[0], 20);
        assert_eq!(canvas.get_pixel(3, 3).0[0], 30);
    }

    #[test]
    fn patch_two_of_two_by_two_grid_at_second_row() {
        let dims = Dimensions {
            width: 512,
            height: 512,
        };
        let grid = PatchGrid::new(dims, 256, 256).unwrap();
        assert_eq!(grid.columns(), 2);
        assert_eq!(grid.offset(2), (0, 256));
    }

    #[test]
    fn segment_paints_left_half_of_each_patch() {
        let img = RgbaImage::from_pixel(512, 256, GREY);
        let result = segment_image(&LeftHalf, &img, &config(256), 0.3).unwrap();
        assert_eq!(result.patch_count, 2);
        assert_eq!(result.failed_patches, 0);
        assert_eq!(result.masked_pixels, 2 * 128 * 256);
        assert_eq!(result.overlay.dimensions(), (512, 256));
        assert_eq!(*result.overlay.get_pixel(0, 0), MASK_COLOR);
        assert_eq!(*result.overlay.get_pixel(200, 10), GREY);
        assert_eq!(*result.overlay.get_pixel(256, 255), MASK_COLOR);
        assert_eq!(*result.overlay.get_pixel(511, 255), GREY);
    }

    #[test]
    fn trailing_strip_stays_transparent() {
        let img = RgbaImage::from_pixel(300, 260, GREY);
        let result = segment_image(&LeftHalf, &img, &config(256), 0.3).unwrap();
        assert_eq!(result.overlay.dimensions(), (300, 260));
        assert_eq!(*result.overlay.get_pixel(255, 0), GREY);
        assert_eq!(*result.overlay.get_pixel(256, 0), Rgba([0, 0, 0, 0]));
        assert_eq!(*result.overlay.get_pixel(10, 259), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn failed_patch_is_stitched_unmasked() {
        let red = Rgba([255, 0, 0, 255]);
        let img = RgbaImage::from_fn(512, 256, |x, _| if x < 256 { red } else { GREY });
        let result = segment_image(&FailOnRed, &img, &config(256), 0.3).unwrap();
        assert_eq!(result.failed_patches, 1);
        assert_eq!(*result.overlay.get_pixel(10, 10), red);
        assert_eq!(*result.overlay.get_pixel(300, 10), MASK_COLOR);
    }

    #[test]
    fn all_patches_failing_is_an_error() {
        let img = RgbaImage::from_pixel(256, 256, Rgba([255, 0, 0, 255]));
        let result = segment_image(&FailOnRed, &img, &config(256), 0.3);
        assert!(matches!(
            result,
            Err(PipelineError::NoValidPredictions { patch_count: 1 })
        ));
    }

    #[test]
    fn small_image_is_rejected() {
        let img = RgbaImage::new(100, 100);
        assert!(matches!(
            segment_image(&LeftHalf, &img, &config(256), 0.3),
            Err(PipelineError::ImageTooSmall { .. })
        ));
    }
}
