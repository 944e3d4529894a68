//! TIFF serializer for result images.
//!
//! Exported images keep full resolution and an alpha channel (the
//! untiled strip of a segmentation overlay is transparent), so they are
//! written as uncompressed 8-bit RGBA TIFF.
//!
//! This is a pure function with no I/O; it returns bytes.

use std::io::Cursor;

use histoscope_pipeline::RgbaImage;
use image::ImageEncoder;

use crate::ExportError;

/// Encode an RGBA image as TIFF bytes.
///
/// # Errors
///
/// Returns [`ExportError::EmptyImage`] for an image with no pixels and
/// [`ExportError::Encode`] if the TIFF encoder fails.
pub fn encode_tiff(image: &RgbaImage) -> Result<Vec<u8>, ExportError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ExportError::EmptyImage {
            width: image.width(),
            height: image.height(),
        });
    }

    let mut buf = Cursor::new(Vec::new());
    image::codecs::tiff::TiffEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgba8,
    )?;
    Ok(buf.into_inner())
}
