//! Image decoding.
//!
//! Raw file bytes in, RGBA image out. TIFF files (common for whole
//! histology scans) go through the dedicated TIFF decoder selected by
//! file name; everything else is sniffed from its magic bytes.

use image::{ImageFormat, RgbaImage};

use crate::types::PipelineError;

/// Which decoder a file is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// `.tif` / `.tiff` files, decoded as TIFF.
    Tiff,
    /// Any other file, format guessed from content.
    Sniffed,
}

impl ImageSource {
    /// Pick the decode path from a file name.
    ///
    /// Matches a trailing `tif` or `tiff`, ignoring ASCII case.
    #[must_use]
    pub fn from_name(file_name: &str) -> Self {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with("tif") || lower.ends_with("tiff") {
            Self::Tiff
        } else {
            Self::Sniffed
        }
    }
}

/// Decode raw image bytes into an RGBA image.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the data is corrupt or the
/// format is unsupported.
#[must_use = "returns the decoded image"]
pub fn decode_image(file_name: &str, bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let img = match ImageSource::from_name(file_name) {
        ImageSource::Tiff => image::load_from_memory_with_format(bytes, ImageFormat::Tiff)?,
        ImageSource::Sniffed => image::load_from_memory(bytes)?,
    };
    Ok(img.to_rgba8())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn encode(img: &RgbaImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn source_selection_by_extension() {
        assert_eq!(ImageSource::from_name("slide.tif"), ImageSource::Tiff);
        assert_eq!(ImageSource::from_name("slide.TIFF"), ImageSource::Tiff);
        assert_eq!(ImageSource::from_name("slide.png"), ImageSource::Sniffed);
        assert_eq!(ImageSource::from_name("tiff.jpg"), ImageSource::Sniffed);
    }

    #[test]
    fn empty_input_returns_error() {
        assert!(matches!(
            decode_image("a.png", &[]),
            Err(PipelineError::EmptyInput)
        ));
    }

    #[test]
    fn corrupt_bytes_return_decode_error() {
        assert!(matches!(
            decode_image("a.png", &[0xFF, 0xFE, 0x00, 0x01]),
            Err(PipelineError::ImageDecode(_))
        ));
        assert!(matches!(
            decode_image("a.tif", &[0xFF, 0xFE, 0x00, 0x01]),
            Err(PipelineError::ImageDecode(_))
        ));
    }

    #[test]
    fn png_decodes_with_pixels_intact() {
        let img = RgbaImage::from_fn(7, 5, |x, y| image::Rgba([x as u8, y as u8, 9, 255]));
        let decoded = decode_image("patch.png", &encode(&img, ImageFormat::Png)).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn tiff_decodes_through_tiff_path() {
        let img = RgbaImage::from_fn(6, 4, |x, y| image::Rgba([10 * x as u8, 20 * y as u8, 3, 255]));
        let decoded = decode_image("scan.tiff", &encode(&img, ImageFormat::Tiff)).unwrap();
        assert_eq!(decoded.dimensions(), (6, 4));
        assert_eq!(decoded.get_pixel(5, 3), img.get_pixel(5, 3));
    }

    #[test]
    fn png_named_tiff_is_rejected() {
        let img = RgbaImage::new(2, 2);
        let result = decode_image("mislabeled.tif", &encode(&img, ImageFormat::Png));
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }
}
