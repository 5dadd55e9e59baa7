use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;

/// JPEG quality used for every re-encoded upload.
pub const JPEG_QUALITY: u8 = 80;

/// Content type of transcoder output.
pub const OUTPUT_CONTENT_TYPE: &str = "image/jpeg";

/// Suffix appended to a staged input's handle for its compressed copy.
pub const OUTPUT_SUFFIX: &str = ".compressed.jpg";

/// Map a declared content type to a decoder, if we support it.
pub fn decoder_for(declared_format: &str) -> Option<ImageFormat> {
    let essence = declared_format
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
        "image/png" => Some(ImageFormat::Png),
        "image/webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Decode `bytes` as `declared_format` and re-encode them as a JPEG at
/// [`JPEG_QUALITY`]. Alpha channels are flattened to RGB.
pub fn transcode(bytes: &[u8], declared_format: &str) -> Result<Vec<u8>, TranscodeError> {
    let format = decoder_for(declared_format)
        .ok_or_else(|| TranscodeError::Unsupported(declared_format.to_string()))?;

    let img = image::load_from_memory_with_format(bytes, format).map_err(TranscodeError::Decode)?;
    let rgb = img.to_rgb8();

    let mut out = Cursor::new(Vec::with_capacity(bytes.len() / 2));
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(TranscodeError::Encode)?;

    Ok(out.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Unsupported image format: {0}")]
    Unsupported(String),

    #[error("Failed to decode image: {0}")]
    Decode(image::ImageError),

    #[error("Failed to encode image: {0}")]
    Encode(image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    fn sample_png() -> Vec<u8> {
        let img = ImageBuffer::from_fn(64, 48, |x, y| Rgba([(x * 4) as u8, (y * 5) as u8, 90, 200]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn sample_jpeg() -> Vec<u8> {
        let img = ImageBuffer::from_fn(32, 32, |x, y| Rgb([x as u8 * 8, y as u8 * 8, 128]));
        let mut buf = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut buf, 100)
            .encode_image(&img)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_png_becomes_jpeg() {
        let out = transcode(&sample_png(), "image/png").unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_jpeg_aliases_accepted() {
        let jpeg = sample_jpeg();
        assert!(transcode(&jpeg, "image/jpeg").is_ok());
        assert!(transcode(&jpeg, "image/jpg").is_ok());
        assert!(transcode(&jpeg, "IMAGE/JPEG; charset=binary").is_ok());
    }

    #[test]
    fn test_bmp_is_unsupported() {
        let err = transcode(b"BM....", "image/bmp").unwrap_err();
        assert!(matches!(err, TranscodeError::Unsupported(ref f) if f == "image/bmp"));
    }

    #[test]
    fn test_corrupt_bytes_fail_to_decode() {
        let err = transcode(b"definitely not a png", "image/png").unwrap_err();
        assert!(matches!(err, TranscodeError::Decode(_)));
    }
}
