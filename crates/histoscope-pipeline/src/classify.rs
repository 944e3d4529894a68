//! Patch-wise tissue classification.
//!
//! Each image is cut into non-overlapping 512px patches, every patch is
//! scored by the classifier, and the image label is the arg-max of the
//! per-class mean over all patches that scored successfully. The mean is
//! unweighted: a patch of background counts as much as a patch of tissue.

use rayon::prelude::*;

use crate::diagnostics::{ImageDiagnostics, PipelineKind, StageDiagnostics, StageMetrics, timed};
use crate::model::{Model, PatchTensor, check_output};
use crate::patch::PatchExtractor;
use crate::types::{
    CLASS_COUNT, Dimensions, PatchConfig, PipelineError, PredictionVector, RgbaImage, TissueClass,
};

/// Outcome of classifying one image.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Winning class.
    pub label: TissueClass,
    /// Mean scores over the successfully predicted patches.
    pub mean: PredictionVector,
    /// Patches sent to the model.
    pub patch_count: usize,
    /// Patches dropped because inference failed.
    pub failed_patches: usize,
    /// Per-stage timing and counts.
    pub diagnostics: ImageDiagnostics,
}

/// Per-class arithmetic mean of the prediction vectors.
///
/// Returns `None` for an empty slice.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn average_predictions(predictions: &[PredictionVector]) -> Option<PredictionVector> {
    if predictions.is_empty() {
        return None;
    }
    let mut sums = [0.0_f64; CLASS_COUNT];
    for prediction in predictions {
        for (sum, score) in sums.iter_mut().zip(prediction) {
            *sum += f64::from(*score);
        }
    }
    let count = predictions.len() as f64;
    Some(sums.map(|sum| (sum / count) as f32))
}

/// Index of the highest score; ties resolve to the lowest index.
#[must_use]
pub fn argmax(scores: &PredictionVector) -> usize {
    let mut best = 0;
    for (i, score) in scores.iter().enumerate().skip(1) {
        if *score > scores[best] {
            best = i;
        }
    }
    best
}

/// Classify one image.
///
/// Patches are predicted in parallel. A patch whose inference fails is
/// logged and left out of the mean; it does not abort the image.
///
/// # Errors
///
/// Returns [`PipelineError::ImageTooSmall`] if the image cannot hold a
/// single patch, [`PipelineError::InvalidConfig`] for a zero patch size
/// or stride, and [`PipelineError::NoValidPredictions`] if every patch
/// failed.
pub fn classify_image<M: Model + ?Sized>(
    model: &M,
    image: &RgbaImage,
    patch: &PatchConfig,
) -> Result<Classification, PipelineError> {
    let start = web_time::Instant::now();

    let (extracted, extraction_time) = timed(|| {
        PatchExtractor::new(image, patch.patch_size, patch.stride)
            .map(|extractor| (extractor.grid(), extractor.extract_patches()))
    });
    let (grid, patches) = extracted?;

    let (outcomes, inference_time) = timed(|| {
        patches
            .par_iter()
            .map(|p| {
                let output = model.predict(&PatchTensor::from_image(&p.image))?;
                check_output(&output, CLASS_COUNT)?;
                let mut scores = [0.0; CLASS_COUNT];
                scores.copy_from_slice(&output);
                Ok::<_, crate::types::InferenceError>(scores)
            })
            .collect::<Vec<_>>()
    });

    let mut predictions = Vec::with_capacity(outcomes.len());
    for (outcome, p) in outcomes.into_iter().zip(&patches) {
        match outcome {
            Ok(scores) => predictions.push(scores),
            Err(e) => log::warn!(
                "classification dropped patch ({}, {}): {e}",
                p.column,
                p.row
            ),
        }
    }
    let failed_patches = patches.len() - predictions.len();

    let (mean, aggregation_time) = timed(|| average_predictions(&predictions));
    let mean = mean.ok_or(PipelineError::NoValidPredictions {
        patch_count: patches.len(),
    })?;
    let label_index = argmax(&mean);
    let label = TissueClass::from_index(label_index).unwrap_or(TissueClass::Normal);

    let diagnostics = ImageDiagnostics {
        kind: PipelineKind::Classification,
        extraction: StageDiagnostics {
            duration: extraction_time,
            metrics: StageMetrics::Extraction {
                image: Dimensions::of(image),
                patch_size: grid.size(),
                stride: grid.stride(),
                columns: grid.columns(),
                rows: grid.rows(),
            },
        },
        inference: StageDiagnostics {
            duration: inference_time,
            metrics: StageMetrics::Inference {
                patch_count: patches.len(),
                failed_count: failed_patches,
            },
        },
        aggregation: StageDiagnostics {
            duration: aggregation_time,
            metrics: StageMetrics::Average { mean, label_index },
        },
        total_duration: start.elapsed(),
    };

    Ok(Classification {
        label,
        mean,
        patch_count: patches.len(),
        failed_patches,
        diagnostics,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::types::InferenceError;

    /// Scores each patch by its top-left pixel's red channel: red < 128
    /// votes Benign, otherwise Invasive Carcinoma.
    struct RedVote;

    impl Model for RedVote {
        fn predict(&self, input: &PatchTensor) -> Result<Vec<f32>, InferenceError> {
            if input.data()[0] < 128.0 {
                Ok(vec![0.0, 1.0, 0.0, 0.0])
            } else {
                Ok(vec![0.0, 0.0, 0.0, 1.0])
            }
        }
    }

    /// Fails every patch whose top-left pixel is pure green.
    struct FailOnGreen;

    impl Model for FailOnGreen {
        fn predict(&self, input: &PatchTensor) -> Result<Vec<f32>, InferenceError> {
            if input.data()[1] > 200.0 {
                Err(InferenceError::Runtime("boom".into()))
            } else {
                Ok(vec![0.1, 0.2, 0.6, 0.1])
            }
        }
    }

    struct Counting(AtomicUsize);

    impl Model for Counting {
        fn predict(&self, _input: &PatchTensor) -> Result<Vec<f32>, InferenceError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.25; 4])
        }
    }

    fn config(size: u32) -> PatchConfig {
        PatchConfig {
            patch_size: size,
            stride: size,
        }
    }

    /// Left half red 0, right half red 255.
    fn split_image(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                image::Rgba([0, 0, 0, 255])
            } else {
                image::Rgba([255, 0, 0, 255])
            }
        })
    }

    #[test]
    fn mean_of_two_vectors() {
        let mean = average_predictions(&[[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]]).unwrap();
        assert_eq!(mean, [0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn mean_of_nothing_is_none() {
        assert!(average_predictions(&[]).is_none());
    }

    #[test]
    fn argmax_ties_pick_lowest_index() {
        assert_eq!(argmax(&[0.5, 0.5, 0.0, 0.0]), 0);
        assert_eq!(argmax(&[0.1, 0.3, 0.3, 0.3]), 1);
        assert_eq!(argmax(&[0.0, 0.0, 0.0, 0.9]), 3);
    }

    #[test]
    fn tie_between_classes_labels_first() {
        // Two patches vote Benign, two vote Invasive: mean ties, Benign wins.
        let img = split_image(1024, 1024);
        let result = classify_image(&RedVote, &img, &config(512)).unwrap();
        assert_eq!(result.patch_count, 4);
        assert_eq!(result.failed_patches, 0);
        assert_eq!(result.mean, [0.0, 0.5, 0.0, 0.5]);
        assert_eq!(result.label, TissueClass::Benign);
    }

    #[test]
    fn every_patch_is_predicted_once() {
        let model = Counting(AtomicUsize::new(0));
        let img = RgbaImage::new(1024, 1536);
        let result = classify_image(&model, &img, &config(512)).unwrap();
        assert_eq!(model.0.load(Ordering::SeqCst), 6);
        assert_eq!(result.patch_count, 6);
        // All-equal scores tie at index 0.
        assert_eq!(result.label, TissueClass::Normal);
    }

    #[test]
    fn failed_patches_are_dropped_from_mean() {
        // Top row green (fails), bottom row black (succeeds).
        let img = RgbaImage::from_fn(512, 512, |_, y| {
            if y < 256 {
                image::Rgba([0, 255, 0, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });
        let result = classify_image(&FailOnGreen, &img, &config(256)).unwrap();
        assert_eq!(result.patch_count, 4);
        assert_eq!(result.failed_patches, 2);
        assert_eq!(result.label, TissueClass::InSituCarcinoma);
        assert!((result.mean[2] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn all_patches_failing_is_an_error() {
        let img = RgbaImage::from_fn(512, 512, |_, _| image::Rgba([0, 255, 0, 255]));
        let result = classify_image(&FailOnGreen, &img, &config(256));
        assert!(matches!(
            result,
            Err(PipelineError::NoValidPredictions { patch_count: 4 })
        ));
    }

    #[test]
    fn wrong_output_length_drops_patch() {
        struct Short;
        impl Model for Short {
            fn predict(&self, _input: &PatchTensor) -> Result<Vec<f32>, InferenceError> {
                Ok(vec![1.0, 0.0])
            }
        }
        let img = RgbaImage::new(512, 512);
        let result = classify_image(&Short, &img, &config(512));
        assert!(matches!(
            result,
            Err(PipelineError::NoValidPredictions { patch_count: 1 })
        ));
    }

    #[test]
    fn small_image_is_rejected() {
        let img = RgbaImage::new(300, 600);
        let result = classify_image(&RedVote, &img, &config(512));
        assert!(matches!(result, Err(PipelineError::ImageTooSmall { .. })));
    }

    #[test]
    fn diagnostics_record_counts() {
        let img = split_image(1024, 512);
        let result = classify_image(&RedVote, &img, &config(512)).unwrap();
        let d = &result.diagnostics;
        assert_eq!(d.kind, PipelineKind::Classification);
        assert!(matches!(
            d.inference.metrics,
            StageMetrics::Inference {
                patch_count: 2,
                failed_count: 0
            }
        ));
    }
}
