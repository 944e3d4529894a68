//! histoscope: classify and segment histology images, then package the
//! results into a labeled zip archive.
//!
//! Every image is cut into fixed-size patches. The classifier's
//! per-patch scores are averaged into one tissue label per image; the
//! segmentation network's per-pixel masks are painted over the patches
//! and stitched back into a full-size overlay. The archive holds one
//! folder per label with each image re-encoded as TIFF.
//!
//! # Usage
//!
//! ```text
//! histoscope --classify-model bach.onnx --segment-model ynet.onnx \
//!     --output caMicroscope.zip slides/*.tif
//! ```
//!
//! Models are loaded through ONNX Runtime and require the `onnx`
//! feature. Set `RUST_LOG` to adjust log verbosity (default `info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

#[cfg(feature = "onnx")]
mod onnx;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use histoscope_export::{DEFAULT_ARCHIVE_NAME, ExportPolicy};
use histoscope_pipeline::{BatchReport, Model, PatchConfig, PipelineConfig, Workspace};

/// Classify and segment histology images with pre-trained models.
///
/// Runs the classification model when `--classify-model` is given and
/// the segmentation model when `--segment-model` is given, then writes
/// every image into a zip archive grouped by label.
#[derive(Parser)]
#[command(name = "histoscope", version)]
struct Cli {
    /// Input images (PNG, JPEG, BMP, WebP, TIFF).
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Classification model (ONNX). Enables classification.
    #[arg(long)]
    classify_model: Option<PathBuf>,

    /// Segmentation model (ONNX). Enables segmentation.
    #[arg(long)]
    segment_model: Option<PathBuf>,

    /// Archive to write.
    #[arg(long, short, default_value = DEFAULT_ARCHIVE_NAME)]
    output: PathBuf,

    /// Classification patch size in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CLASSIFY_PATCH_SIZE)]
    classify_patch_size: u32,

    /// Classification stride in pixels (defaults to the patch size).
    #[arg(long)]
    classify_stride: Option<u32>,

    /// Segmentation patch size in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_SEGMENT_PATCH_SIZE)]
    segment_patch_size: u32,

    /// Segmentation stride in pixels (defaults to the patch size).
    #[arg(long)]
    segment_stride: Option<u32>,

    /// Mask scores strictly above this value are painted black.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MASK_THRESHOLD)]
    mask_threshold: f32,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// Missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// What to do when an image cannot be written to the archive.
    #[arg(long, value_enum, default_value_t = OnExportError::Skip)]
    on_export_error: OnExportError,

    /// Worker threads for image and patch processing (default: one per core).
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    jobs: Option<usize>,

    /// Print per-image diagnostics.
    #[arg(long)]
    diagnostics: bool,

    /// Print per-image results and diagnostics as JSON on stdout.
    #[arg(long)]
    json: bool,
}

/// Export failure handling.
#[derive(Clone, Copy, ValueEnum)]
enum OnExportError {
    /// Abort the whole archive.
    Abort,
    /// Leave the image out and warn.
    Skip,
}

impl From<OnExportError> for ExportPolicy {
    fn from(value: OnExportError) -> Self {
        match value {
            OnExportError::Abort => Self::Abort,
            OnExportError::Skip => Self::SkipAndWarn,
        }
    }
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        PipelineConfig {
            classify: PatchConfig {
                patch_size: cli.classify_patch_size,
                stride: cli.classify_stride.unwrap_or(cli.classify_patch_size),
            },
            segment: PatchConfig {
                patch_size: cli.segment_patch_size,
                stride: cli.segment_stride.unwrap_or(cli.segment_patch_size),
            },
            mask_threshold: cli.mask_threshold,
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

#[cfg(feature = "onnx")]
fn load_model(path: &Path) -> Result<Box<dyn Model>, String> {
    onnx::OnnxModel::from_file(path)
        .map(|m| Box::new(m) as Box<dyn Model>)
        .map_err(|e| format!("Error loading model {}: {e}", path.display()))
}

#[cfg(not(feature = "onnx"))]
fn load_model(path: &Path) -> Result<Box<dyn Model>, String> {
    Err(format!(
        "Cannot load model {}: histoscope was built without the `onnx` feature",
        path.display()
    ))
}

/// Read every input file, keeping the file name for decoder selection.
fn read_inputs(paths: &[PathBuf]) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        match std::fs::read(path) {
            Ok(bytes) => files.push((name, bytes)),
            Err(e) => log::error!("Error reading {}: {e}", path.display()),
        }
    }
    files
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(jobs) = cli.jobs
        && let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
    {
        eprintln!("Error configuring {jobs} worker threads: {e}");
        return ExitCode::FAILURE;
    }

    let classify_model = match cli.classify_model.as_deref().map(load_model).transpose() {
        Ok(m) => m,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    let segment_model = match cli.segment_model.as_deref().map(load_model).transpose() {
        Ok(m) => m,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let (mut workspace, load_errors) = Workspace::load(read_inputs(&cli.images));
    if workspace.is_empty() {
        eprintln!("No images could be loaded");
        return ExitCode::FAILURE;
    }
    log::info!(
        "Loaded {} image(s), {} failed to decode",
        workspace.len(),
        load_errors.len()
    );

    let mut reports = Vec::new();

    if let Some(model) = &classify_model {
        log::info!("Classifying {} image(s)", workspace.len());
        match workspace.classify_all(model.as_ref(), &config) {
            Ok(report) => reports.push(("classification", report)),
            Err(e) => {
                eprintln!("Classification error: {e}");
                return ExitCode::FAILURE;
            }
        }
        if !workspace.state().download_enabled() {
            eprintln!("No image could be classified; archive not written");
            return ExitCode::FAILURE;
        }
    }

    if let Some(model) = &segment_model {
        log::info!("Segmenting {} image(s)", workspace.len());
        match workspace.segment_all(model.as_ref(), &config) {
            Ok(report) => reports.push(("segmentation", report)),
            Err(e) => {
                eprintln!("Segmentation error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    for (kind, report) in &reports {
        print_report(kind, report, &cli);
    }

    let archive = match histoscope_export::write_archive(
        &workspace.results(),
        cli.on_export_error.into(),
    ) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Export error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::write(&cli.output, &archive.bytes) {
        eprintln!("Error writing {}: {e}", cli.output.display());
        return ExitCode::FAILURE;
    }
    eprintln!(
        "Archive written to {} ({} images, {} skipped, {} bytes)",
        cli.output.display(),
        archive.entries.len(),
        archive.skipped.len(),
        archive.bytes.len(),
    );

    ExitCode::SUCCESS
}

/// Print one batch report as text on stderr or JSON on stdout.
fn print_report(kind: &str, report: &BatchReport, cli: &Cli) {
    if cli.json {
        let completed: Vec<_> = report
            .completed
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name,
                    "label": r.label.map(|l| l.label()),
                    "patch_count": r.patch_count,
                    "failed_patches": r.failed_patches,
                    "diagnostics": r.diagnostics,
                })
            })
            .collect();
        let failed: Vec<_> = report
            .failed
            .iter()
            .map(|f| serde_json::json!({ "name": f.name, "error": f.error }))
            .collect();
        let doc = serde_json::json!({
            "pipeline": kind,
            "completed": completed,
            "failed": failed,
        });
        match serde_json::to_string_pretty(&doc) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error serializing {kind} report: {e}"),
        }
        return;
    }

    eprintln!(
        "{kind}: {} completed, {} failed",
        report.completed.len(),
        report.failed.len()
    );
    for r in &report.completed {
        let label = r.label.map_or("-", |l| l.label());
        eprintln!(
            "  {:<32} {label:<20} {} patches ({} failed)",
            r.name, r.patch_count, r.failed_patches
        );
        if cli.diagnostics {
            eprintln!("{}\n", r.diagnostics.report());
        }
    }
    for f in &report.failed {
        eprintln!("  {f}");
    }
}
