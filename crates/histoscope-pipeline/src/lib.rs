//! histoscope-pipeline: Patch tiling, inference orchestration, and mask
//! stitching for histology images (sans-IO).
//!
//! Two pre-trained models are driven over user images:
//!
//! - **Classification**: non-overlapping 512px patches -> per-patch
//!   class scores -> mean over patches -> arg-max tissue label.
//! - **Segmentation**: non-overlapping 256px patches -> per-pixel mask
//!   -> threshold painted black over the patch -> patches stitched back
//!   into a full-size overlay.
//!
//! The models themselves sit behind the [`Model`] trait; this crate
//! never loads one. It has **no I/O dependencies**: it decodes in-memory
//! byte slices and returns images and structured reports. Filesystem
//! access, runtime setup, and archive writing live in the `histoscope`
//! binary and `histoscope-export`.

pub mod batch;
pub mod classify;
pub mod decode;
pub mod diagnostics;
pub mod model;
pub mod patch;
pub mod progress;
pub mod segment;
pub mod types;

pub use batch::{BatchReport, FileError, ImageReport, Workspace};
pub use classify::{Classification, argmax, average_predictions, classify_image};
pub use decode::{ImageSource, decode_image};
pub use model::{Model, PatchTensor};
pub use patch::{Patch, PatchExtractor, PatchGrid};
pub use progress::{BatchSnapshot, BatchState, Progress, ProgressTracker};
pub use segment::{MASK_COLOR, Segmentation, apply_mask, segment_image, stitch};
pub use types::{
    CLASS_COUNT, Dimensions, InferenceError, PatchConfig, PipelineConfig, PipelineError,
    PredictionVector, ResultImage, RgbaImage, TissueClass,
};
