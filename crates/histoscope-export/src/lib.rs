//! histoscope-export: Pure result packaging (sans-IO)
//!
//! Re-encodes result images as TIFF and packs them into a zip archive
//! with one folder per classification label.

pub mod archive;
pub mod tiff;

pub use archive::{
    Archive, DEFAULT_ARCHIVE_NAME, ExportPolicy, SkippedImage, UNCLASSIFIED_LABEL, entry_path,
    group_by_label, label_folder, write_archive,
};
pub use tiff::encode_tiff;

/// Errors that can occur while packaging results.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The image has no pixels.
    #[error("image has no pixels ({width}x{height})")]
    EmptyImage {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },

    /// TIFF encoding failed.
    #[error("TIFF encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    /// One image could not be exported and the policy is to abort.
    #[error("failed to export {name}: {source}")]
    Image {
        /// Source file name.
        name: String,
        /// Underlying failure.
        source: Box<ExportError>,
    },

    /// The zip writer failed.
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Writing archive data failed.
    #[error("archive write failed: {0}")]
    Io(#[from] std::io::Error),
}
