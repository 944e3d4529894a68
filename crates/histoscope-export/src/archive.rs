//! Labeled zip archive of result images.
//!
//! Images are grouped by classification label, one top-level folder per
//! label, in the order each label first appears. Unlabeled images go to
//! the [`UNCLASSIFIED_LABEL`] folder. Inside a folder, image `i` of the
//! group is stored as `{label}_image_{i}.tiff`.
//!
//! This is a pure function with no I/O. The archive is returned as
//! bytes for the caller to save or offer for download.

use std::io::{Cursor, Write};

use histoscope_pipeline::ResultImage;
use zip::write::SimpleFileOptions;

use crate::ExportError;
use crate::tiff::encode_tiff;

/// File name for the downloaded archive.
pub const DEFAULT_ARCHIVE_NAME: &str = "caMicroscope.zip";

/// Folder for images that were never classified.
pub const UNCLASSIFIED_LABEL: &str = "Unclassified";

/// What to do when one image cannot be exported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportPolicy {
    /// Fail the whole archive on the first image error.
    Abort,
    /// Leave the image out, log a warning, and keep going.
    #[default]
    SkipAndWarn,
}

/// An image left out of the archive under [`ExportPolicy::SkipAndWarn`].
#[derive(Debug)]
pub struct SkippedImage {
    /// Source file name.
    pub name: String,
    /// Path the image would have had in the archive.
    pub path: String,
    /// Why it was skipped.
    pub error: ExportError,
}

/// A finished archive.
#[derive(Debug)]
pub struct Archive {
    /// Zip file contents.
    pub bytes: Vec<u8>,
    /// Paths of the stored images, in archive order.
    pub entries: Vec<String>,
    /// Images that could not be exported.
    pub skipped: Vec<SkippedImage>,
}

/// Folder name an image is exported under.
#[must_use]
pub fn label_folder(image: &ResultImage) -> &'static str {
    image.label.map_or(UNCLASSIFIED_LABEL, |l| l.label())
}

/// Group images by folder, keeping first-appearance order of folders
/// and load order within each folder.
#[must_use]
pub fn group_by_label(images: &[ResultImage]) -> Vec<(&'static str, Vec<&ResultImage>)> {
    let mut groups: Vec<(&'static str, Vec<&ResultImage>)> = Vec::new();
    for image in images {
        let folder = label_folder(image);
        match groups.iter_mut().find(|(name, _)| *name == folder) {
            Some((_, members)) => members.push(image),
            None => groups.push((folder, vec![image])),
        }
    }
    groups
}

/// Archive path of the `index`-th image in a label folder.
#[must_use]
pub fn entry_path(label: &str, index: usize) -> String {
    format!("{label}/{label}_image_{index}.tiff")
}

/// Build the zip archive.
///
/// Indices within a folder follow group order; a skipped image leaves a
/// gap rather than renumbering its successors.
///
/// # Errors
///
/// Returns [`ExportError::Zip`] or [`ExportError::Io`] if the archive
/// itself cannot be written. Under [`ExportPolicy::Abort`], also returns
/// the first image's encoding error, wrapped in [`ExportError::Image`].
pub fn write_archive(images: &[ResultImage], policy: ExportPolicy) -> Result<Archive, ExportError> {
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let mut entries = Vec::new();
    let mut skipped = Vec::new();

    for (label, members) in group_by_label(images) {
        writer.add_directory(format!("{label}/"), options)?;
        for (index, image) in members.into_iter().enumerate() {
            let path = entry_path(label, index);
            match encode_tiff(&image.image) {
                Ok(bytes) => {
                    writer.start_file(path.as_str(), options)?;
                    writer.write_all(&bytes)?;
                    log::debug!("archived {} as {path} ({} bytes)", image.name, bytes.len());
                    entries.push(path);
                }
                Err(error) => match policy {
                    ExportPolicy::Abort => {
                        return Err(ExportError::Image {
                            name: image.name.clone(),
                            source: Box::new(error),
                        });
                    }
                    ExportPolicy::SkipAndWarn => {
                        log::warn!("skipping {} ({path}): {error}", image.name);
                        skipped.push(SkippedImage {
                            name: image.name.clone(),
                            path,
                            error,
                        });
                    }
                },
            }
        }
    }

    let bytes = writer.finish()?.into_inner();
    Ok(Archive {
        bytes,
        entries,
        skipped,
    })
}
