//! Shared types for the histoscope pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` so downstream crates can reference decoded
/// images and overlays without depending on `image` directly.
pub use image::RgbaImage;

/// Number of tissue classes the classification model predicts.
pub const CLASS_COUNT: usize = 4;

/// Per-patch (or averaged) classification scores, indexed by
/// [`TissueClass::index`].
pub type PredictionVector = [f32; CLASS_COUNT];

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of a decoded image.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Breast tissue class, in the order the classification model emits
/// its scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TissueClass {
    /// Normal tissue.
    Normal,
    /// Benign lesion.
    Benign,
    /// In-situ carcinoma.
    InSituCarcinoma,
    /// Invasive carcinoma.
    InvasiveCarcinoma,
}

impl TissueClass {
    /// All classes in model output order.
    pub const ALL: [Self; CLASS_COUNT] = [
        Self::Normal,
        Self::Benign,
        Self::InSituCarcinoma,
        Self::InvasiveCarcinoma,
    ];

    /// Class for a model output index, if in range.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Position of this class in the model output vector.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Normal => 0,
            Self::Benign => 1,
            Self::InSituCarcinoma => 2,
            Self::InvasiveCarcinoma => 3,
        }
    }

    /// Human-readable label, also used as the archive folder name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Benign => "Benign",
            Self::InSituCarcinoma => "In-situ Carcinoma",
            Self::InvasiveCarcinoma => "Invasive Carcinoma",
        }
    }
}

impl fmt::Display for TissueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Patch geometry for one pipeline: square patch edge length and the
/// step between neighbouring patch origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Patch edge length in pixels.
    pub patch_size: u32,
    /// Distance between neighbouring patch origins in pixels.
    /// Equal to `patch_size` for non-overlapping tiles.
    pub stride: u32,
}

/// Configuration for both inference pipelines.
///
/// Defaults match the input sizes the pre-trained models were built
/// for: 512px tiles for classification, 256px tiles for segmentation,
/// both non-overlapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Patch geometry for the classification model.
    pub classify: PatchConfig,

    /// Patch geometry for the segmentation model.
    pub segment: PatchConfig,

    /// Mask scores strictly above this value are painted opaque black.
    pub mask_threshold: f32,
}

impl PipelineConfig {
    /// Default classification patch size (and stride).
    pub const DEFAULT_CLASSIFY_PATCH_SIZE: u32 = 512;

    /// Default segmentation patch size (and stride).
    pub const DEFAULT_SEGMENT_PATCH_SIZE: u32 = 256;

    /// Default segmentation mask threshold.
    pub const DEFAULT_MASK_THRESHOLD: f32 = 0.3;

    /// Check the configuration for values no pipeline can run with.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if any patch size or
    /// stride is zero, or the mask threshold is not finite.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, patch) in [("classify", &self.classify), ("segment", &self.segment)] {
            if patch.patch_size == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name}.patch_size must be positive"
                )));
            }
            if patch.stride == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name}.stride must be positive"
                )));
            }
        }
        if !self.mask_threshold.is_finite() {
            return Err(PipelineError::InvalidConfig(format!(
                "mask_threshold must be finite, got {}",
                self.mask_threshold
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classify: PatchConfig {
                patch_size: Self::DEFAULT_CLASSIFY_PATCH_SIZE,
                stride: Self::DEFAULT_CLASSIFY_PATCH_SIZE,
            },
            segment: PatchConfig {
                patch_size: Self::DEFAULT_SEGMENT_PATCH_SIZE,
                stride: Self::DEFAULT_SEGMENT_PATCH_SIZE,
            },
            mask_threshold: Self::DEFAULT_MASK_THRESHOLD,
        }
    }
}

/// An image ready for export: its current pixels (the original, or the
/// stitched overlay after segmentation) and the assigned label, if
/// classification ran.
#[derive(Debug, Clone)]
pub struct ResultImage {
    /// Source file name.
    pub name: String,
    /// Classification label, `None` if classification never ran or failed.
    pub label: Option<TissueClass>,
    /// Pixels to export.
    pub image: RgbaImage,
}

/// A single patch's model failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    /// The runtime rejected the input or failed while running.
    #[error("model runtime error: {0}")]
    Runtime(String),

    /// The model returned the wrong number of values.
    #[error("model output has {actual} values, expected {expected}")]
    OutputShape {
        /// Values the pipeline needs.
        expected: usize,
        /// Values the model produced.
        actual: usize,
    },

    /// The model returned NaN or an infinite score.
    #[error("model output contains non-finite values")]
    NonFinite,
}

/// Errors that can occur while processing one image.
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`
/// does not implement serde traits. The `ImageDecode` variant is
/// serialized as its `Display` string.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The image cannot hold a single patch.
    #[error("image {dimensions} is smaller than one {patch_size}px patch")]
    ImageTooSmall {
        /// Source image dimensions.
        dimensions: Dimensions,
        /// Patch edge length that did not fit.
        patch_size: u32,
    },

    /// Every patch of the image failed inference.
    #[error("no valid predictions: all {patch_count} patches failed inference")]
    NoValidPredictions {
        /// Number of patches attempted.
        patch_count: usize,
    },
}

/// Serde-compatible proxy for `PipelineError`.
///
/// `image::ImageError` does not implement serde, so the `ImageDecode`
/// variant stores its `Display` string instead.
#[derive(Serialize, Deserialize)]
enum PipelineErrorProxy {
    ImageDecode(String),
    EmptyInput,
    InvalidConfig(String),
    ImageTooSmall {
        dimensions: Dimensions,
        patch_size: u32,
    },
    NoValidPredictions {
        patch_count: usize,
    },
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::ImageDecode(e) => PipelineErrorProxy::ImageDecode(e.to_string()),
            Self::EmptyInput => PipelineErrorProxy::EmptyInput,
            Self::InvalidConfig(s) => PipelineErrorProxy::InvalidConfig(s.clone()),
            Self::ImageTooSmall {
                dimensions,
                patch_size,
            } => PipelineErrorProxy::ImageTooSmall {
                dimensions: *dimensions,
                patch_size: *patch_size,
            },
            Self::NoValidPredictions { patch_count } => PipelineErrorProxy::NoValidPredictions {
                patch_count: *patch_count,
            },
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = PipelineErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            // The typed image error cannot be rebuilt; keep the message.
            PipelineErrorProxy::ImageDecode(msg) => {
                Self::InvalidConfig(format!("image decode error: {msg}"))
            }
            PipelineErrorProxy::EmptyInput => Self::EmptyInput,
            PipelineErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
            PipelineErrorProxy::ImageTooSmall {
                dimensions,
                patch_size,
            } => Self::ImageTooSmall {
                dimensions,
                patch_size,
            },
            PipelineErrorProxy::NoValidPredictions { patch_count } => {
                Self::NoValidPredictions { patch_count }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn class_indices_follow_model_order() {
        for (i, class) in TissueClass::ALL.iter().enumerate() {
            assert_eq!(class.index(), i);
            assert_eq!(TissueClass::from_index(i), Some(*class));
        }
        assert_eq!(TissueClass::from_index(CLASS_COUNT), None);
    }

    #[test]
    fn class_labels() {
        assert_eq!(TissueClass::InSituCarcinoma.label(), "In-situ Carcinoma");
        assert_eq!(
            TissueClass::InvasiveCarcinoma.to_string(),
            "Invasive Carcinoma"
        );
    }

    #[test]
    fn default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.classify.patch_size, 512);
        assert_eq!(config.classify.stride, 512);
        assert_eq!(config.segment.patch_size, 256);
        assert_eq!(config.segment.stride, 256);
        assert!((config.mask_threshold - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn zero_stride_is_invalid() {
        let config = PipelineConfig {
            segment: PatchConfig {
                patch_size: 256,
                stride: 0,
            },
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, PipelineError::InvalidConfig(ref msg) if msg.contains("segment.stride"))
        );
    }

    #[test]
    fn nan_threshold_is_invalid() {
        let config = PipelineConfig {
            mask_threshold: f32::NAN,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn partial_config_json_fills_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"mask_threshold": 0.5}"#).unwrap();
        assert!((config.mask_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.classify, PipelineConfig::default().classify);
    }

    #[test]
    fn error_round_trips_through_json() {
        let err = PipelineError::ImageTooSmall {
            dimensions: Dimensions {
                width: 100,
                height: 80,
            },
            patch_size: 256,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: PipelineError = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            PipelineError::ImageTooSmall {
                patch_size: 256,
                ..
            }
        ));
    }

    #[test]
    fn image_too_small_message_names_dimensions() {
        let err = PipelineError::ImageTooSmall {
            dimensions: Dimensions {
                width: 100,
                height: 80,
            },
            patch_size: 256,
        };
        assert_eq!(
            err.to_string(),
            "image 100x80 is smaller than one 256px patch"
        );
    }
}
