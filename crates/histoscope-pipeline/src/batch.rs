//! Multi-image orchestration.
//!
//! A [`Workspace`] holds the decoded images of one session together with
//! their labels, overlays, and the [`BatchState`] a front end renders.
//! Running a pipeline over the workspace launches one job per image on
//! the rayon pool and joins them all before returning. Jobs finish in
//! no particular order; one image failing never affects the others.

use rayon::prelude::*;

use crate::classify::classify_image;
use crate::decode::decode_image;
use crate::diagnostics::ImageDiagnostics;
use crate::model::Model;
use crate::progress::BatchState;
use crate::segment::segment_image;
use crate::types::{PipelineConfig, PipelineError, ResultImage, RgbaImage, TissueClass};

/// An input file that could not be processed.
#[derive(Debug, thiserror::Error)]
#[error("{name}: {error}")]
pub struct FileError {
    /// Source file name.
    pub name: String,
    /// What went wrong.
    #[source]
    pub error: PipelineError,
}

/// Summary of one image's successful pipeline run.
#[derive(Debug, Clone)]
pub struct ImageReport {
    /// Source file name.
    pub name: String,
    /// Assigned label (classification runs only).
    pub label: Option<TissueClass>,
    /// Patches sent to the model.
    pub patch_count: usize,
    /// Patches whose inference failed.
    pub failed_patches: usize,
    /// Per-stage timing and counts.
    pub diagnostics: ImageDiagnostics,
}

/// Outcome of running one pipeline over every image.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Images that completed, in workspace order.
    pub completed: Vec<ImageReport>,
    /// Images that failed, in workspace order.
    pub failed: Vec<FileError>,
}

#[derive(Debug)]
struct ImageRecord {
    name: String,
    source: RgbaImage,
    overlay: Option<RgbaImage>,
    label: Option<TissueClass>,
}

/// Decoded images of one session and the state shown for them.
#[derive(Debug, Default)]
pub struct Workspace {
    images: Vec<ImageRecord>,
    state: BatchState,
}

impl Workspace {
    /// Decode every `(file name, bytes)` input.
    ///
    /// Files that fail to decode are returned alongside the workspace
    /// and left out of it.
    #[must_use]
    pub fn load<I>(files: I) -> (Self, Vec<FileError>)
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let files: Vec<_> = files.into_iter().collect();
        let decoded: Vec<_> = files
            .into_par_iter()
            .map(|(name, bytes)| match decode_image(&name, &bytes) {
                Ok(source) => Ok(ImageRecord {
                    name,
                    source,
                    overlay: None,
                    label: None,
                }),
                Err(error) => Err(FileError { name, error }),
            })
            .collect();

        let mut images = Vec::with_capacity(decoded.len());
        let mut errors = Vec::new();
        for outcome in decoded {
            match outcome {
                Ok(record) => {
                    log::debug!(
                        "loaded {} ({}x{})",
                        record.name,
                        record.source.width(),
                        record.source.height()
                    );
                    images.push(record);
                }
                Err(e) => {
                    log::warn!("skipping {e}");
                    errors.push(e);
                }
            }
        }

        (
            Self {
                images,
                state: BatchState::default(),
            },
            errors,
        )
    }

    /// Number of loaded images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether no image loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Progress bars and download availability.
    #[must_use]
    pub const fn state(&self) -> &BatchState {
        &self.state
    }

    /// Label of the named image, if it has been classified.
    #[must_use]
    pub fn label(&self, name: &str) -> Option<TissueClass> {
        self.images
            .iter()
            .find(|r| r.name == name)
            .and_then(|r| r.label)
    }

    /// Classify every image and attach the labels.
    ///
    /// Disables the download action while running and enables it once
    /// every job has finished with at least one image labeled.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` fails
    /// validation; nothing runs in that case.
    pub fn classify_all<M: Model + ?Sized>(
        &mut self,
        model: &M,
        config: &PipelineConfig,
    ) -> Result<BatchReport, PipelineError> {
        config.validate()?;
        self.state.set_download_enabled(false);
        self.state.classify.start(self.images.len());

        let state = &self.state;
        let outcomes: Vec<_> = self
            .images
            .par_iter()
            .map(|record| {
                let outcome = classify_image(model, &record.source, &config.classify);
                match &outcome {
                    Ok(c) => {
                        let progress = state.classify.succeed();
                        log::info!(
                            "[{}/{}] {}: {}",
                            progress.value,
                            progress.max,
                            record.name,
                            c.label
                        );
                    }
                    Err(e) => {
                        state.classify.fail();
                        log::warn!("classification failed for {}: {e}", record.name);
                    }
                }
                outcome
            })
            .collect();

        let mut report = BatchReport::default();
        for (record, outcome) in self.images.iter_mut().zip(outcomes) {
            match outcome {
                Ok(c) => {
                    record.label = Some(c.label);
                    report.completed.push(ImageReport {
                        name: record.name.clone(),
                        label: Some(c.label),
                        patch_count: c.patch_count,
                        failed_patches: c.failed_patches,
                        diagnostics: c.diagnostics,
                    });
                }
                Err(error) => {
                    record.label = None;
                    report.failed.push(FileError {
                        name: record.name.clone(),
                        error,
                    });
                }
            }
        }

        self.state
            .set_download_enabled(self.images.iter().any(|r| r.label.is_some()));
        Ok(report)
    }

    /// Segment every image and replace its exported pixels with the
    /// stitched overlay.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` fails
    /// validation; nothing runs in that case.
    pub fn segment_all<M: Model + ?Sized>(
        &mut self,
        model: &M,
        config: &PipelineConfig,
    ) -> Result<BatchReport, PipelineError> {
        config.validate()?;
        self.state.segment.start(self.images.len());

        let state = &self.state;
        let outcomes: Vec<_> = self
            .images
            .par_iter()
            .map(|record| {
                let outcome = segment_image(
                    model,
                    &record.source,
                    &config.segment,
                    config.mask_threshold,
                );
                match &outcome {
                    Ok(s) => {
                        let progress = state.segment.succeed();
                        log::info!(
                            "[{}/{}] {}: {} px masked",
                            progress.value,
                            progress.max,
                            record.name,
                            s.masked_pixels
                        );
                    }
                    Err(e) => {
                        state.segment.fail();
                        log::warn!("segmentation failed for {}: {e}", record.name);
                    }
                }
                outcome
            })
            .collect();

        let mut report = BatchReport::default();
        for (record, outcome) in self.images.iter_mut().zip(outcomes) {
            match outcome {
                Ok(s) => {
                    record.overlay = Some(s.overlay);
                    report.completed.push(ImageReport {
                        name: record.name.clone(),
                        label: record.label,
                        patch_count: s.patch_count,
                        failed_patches: s.failed_patches,
                        diagnostics: s.diagnostics,
                    });
                }
                Err(error) => report.failed.push(FileError {
                    name: record.name.clone(),
                    error,
                }),
            }
        }
        Ok(report)
    }

    /// Images ready for export, in load order: the overlay if the image
    /// was segmented, otherwise the decoded original.
    #[must_use]
    pub fn results(&self) -> Vec<ResultImage> {
        self.images
            .iter()
            .map(|r| ResultImage {
                name: r.name.clone(),
                label: r.label,
                image: r.overlay.as_ref().unwrap_or(&r.source).clone(),
            })
            .collect()
    }
}
