//! The seam between the pipeline and a model runtime.
//!
//! The pipeline never loads or runs a network itself. It hands each
//! patch to a [`Model`] as an NHWC tensor and gets a flat score vector
//! back: four class scores from the classifier, one score per pixel from
//! the segmentation network.

use image::RgbaImage;

use crate::types::InferenceError;

/// Channels fed to the models (RGB; alpha is dropped).
pub const INPUT_CHANNELS: usize = 3;

/// A pre-trained network that scores one patch at a time.
///
/// Implementations must be shareable across threads: the pipeline
/// predicts the patches of an image in parallel.
pub trait Model: Send + Sync {
    /// Run the network on a single patch.
    ///
    /// # Errors
    ///
    /// Returns an [`InferenceError`] if the runtime fails. Only the
    /// failing patch is dropped.
    fn predict(&self, input: &PatchTensor) -> Result<Vec<f32>, InferenceError>;
}

impl<M: Model + ?Sized> Model for &M {
    fn predict(&self, input: &PatchTensor) -> Result<Vec<f32>, InferenceError> {
        (**self).predict(input)
    }
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn predict(&self, input: &PatchTensor) -> Result<Vec<f32>, InferenceError> {
        (**self).predict(input)
    }
}

/// A batch-of-one image tensor with shape `[1, height, width, 3]`.
///
/// Channel values are the raw 8-bit intensities as `f32`
/// (`0.0..=255.0`); any normalization is the model's business.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchTensor {
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl PatchTensor {
    /// Build the tensor from a patch's RGB channels.
    #[must_use]
    pub fn from_image(image: &RgbaImage) -> Self {
        let data = image
            .pixels()
            .flat_map(|p| {
                let [r, g, b, _] = p.0;
                [f32::from(r), f32::from(g), f32::from(b)]
            })
            .collect();
        Self {
            height: image.height() as usize,
            width: image.width() as usize,
            data,
        }
    }

    /// Tensor shape in NHWC order.
    #[must_use]
    pub const fn shape(&self) -> [usize; 4] {
        [1, self.height, self.width, INPUT_CHANNELS]
    }

    /// Number of pixels (`height * width`).
    #[must_use]
    pub const fn pixel_count(&self) -> usize {
        self.height * self.width
    }

    /// Flat row-major tensor data.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consume the tensor, returning the flat data.
    #[must_use]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// Check a model output has the expected length and only finite values.
pub(crate) fn check_output(output: &[f32], expected: usize) -> Result<(), InferenceError> {
    if output.len() != expected {
        return Err(InferenceError::OutputShape {
            expected,
            actual: output.len(),
        });
    }
    if output.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::NonFinite);
    }
    Ok(())
}
