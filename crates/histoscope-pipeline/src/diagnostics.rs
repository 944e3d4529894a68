//! Per-image diagnostics: timing and counts for each pipeline stage.
//!
//! Every classification and segmentation run collects these alongside
//! its result so front ends can report where time went and how many
//! patches the model dropped.
//!
//! Timestamps come from the `web-time` crate, which uses
//! `performance.now()` on WASM and `std::time::Instant` on native.
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Dimensions;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Which pipeline produced a set of diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineKind {
    /// Patch-wise classification with averaged scores.
    Classification,
    /// Patch-wise segmentation with stitched mask overlay.
    Segmentation,
}

/// Diagnostics collected from one image's pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDiagnostics {
    /// Which pipeline ran.
    pub kind: PipelineKind,
    /// Patch grid computation and cropping.
    pub extraction: StageDiagnostics,
    /// Model inference over all patches.
    pub inference: StageDiagnostics,
    /// Score averaging (classification) or mask painting and stitching
    /// (segmentation).
    pub aggregation: StageDiagnostics,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Patch extraction metrics.
    Extraction {
        /// Source image dimensions.
        image: Dimensions,
        /// Patch edge length.
        patch_size: u32,
        /// Step between patch origins.
        stride: u32,
        /// Patches per row.
        columns: u32,
        /// Patch rows.
        rows: u32,
    },
    /// Inference metrics.
    Inference {
        /// Patches sent to the model.
        patch_count: usize,
        /// Patches whose inference failed.
        failed_count: usize,
    },
    /// Classification averaging metrics.
    Average {
        /// Mean class scores.
        mean: [f32; crate::types::CLASS_COUNT],
        /// Winning class index.
        label_index: usize,
    },
    /// Segmentation stitching metrics.
    Stitch {
        /// Pixels painted by the mask threshold.
        masked_pixels: u64,
        /// Output canvas dimensions.
        canvas: Dimensions,
    },
}

impl ImageDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        let title = match self.kind {
            PipelineKind::Classification => "Classification",
            PipelineKind::Segmentation => "Segmentation",
        };
        lines.push(format!("{title} Diagnostics\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(72));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in [
            ("Extraction", &self.extraction),
            ("Inference", &self.inference),
            ("Aggregation", &self.aggregation),
        ] {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Extraction {
            image,
            patch_size,
            stride,
            columns,
            rows,
        } => format!("{image} -> {columns}x{rows} patches (size={patch_size} stride={stride})"),
        StageMetrics::Inference {
            patch_count,
            failed_count,
        } => format!("{patch_count} patches, {failed_count} failed"),
        StageMetrics::Average { mean, label_index } => {
            let scores: Vec<String> = mean.iter().map(|s| format!("{s:.3}")).collect();
            format!("mean=[{}] -> class {label_index}", scores.join(", "))
        }
        StageMetrics::Stitch {
            masked_pixels,
            canvas,
        } => format!("{masked_pixels} masked px on {canvas} canvas"),
    }
}

/// Run `f`, returning its output and how long it took.
pub(crate) fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = web_time::Instant::now();
    let out = f();
    (out, start.elapsed())
}
