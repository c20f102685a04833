//! Decoding, downscaling and re-encoding of fetched images.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageEncoder, ImageFormat};

use super::ImageError;

pub const MAX_WIDTH: u32 = 384;
pub const MAX_HEIGHT: u32 = 384;
pub const JPEG_QUALITY: u8 = 92;

/// Re-encoded image ready to be written to the static dir.
#[derive(Debug)]
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Target size for an image of `width` x `height`, or `None` when it already
/// fits. The factor is the larger overflow ratio so both sides end up within
/// bounds.
pub fn scaled_size(width: u32, height: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let factor = f64::min(
        MAX_WIDTH as f64 / width as f64,
        MAX_HEIGHT as f64 / height as f64,
    );
    if factor >= 1.0 {
        return None;
    }
    let scale = |side: u32| ((side as f64 * factor).round() as u32).max(1);
    Some((scale(width), scale(height)))
}

pub fn scale_down(img: DynamicImage) -> DynamicImage {
    match scaled_size(img.width(), img.height()) {
        Some((width, height)) => img.resize_exact(width, height, FilterType::Lanczos3),
        None => img,
    }
}

/// Encodes `img` the way images of `format` are stored: JPEG at fixed
/// quality, PNG with maximum compression. Other formats are refused.
pub fn encode(img: &DynamicImage, format: ImageFormat) -> Result<ProcessedImage, ImageError> {
    let (width, height) = (img.width(), img.height());
    let mut bytes = Vec::new();
    let extension = match format {
        ImageFormat::Jpeg => {
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
                .encode(rgb.as_raw(), width, height, ColorType::Rgb8.into())
                .map_err(ImageError::Encode)?;
            "jpg"
        }
        ImageFormat::Png => {
            PngEncoder::new_with_quality(&mut bytes, CompressionType::Best, PngFilter::Adaptive)
                .write_image(img.as_bytes(), width, height, img.color().into())
                .map_err(ImageError::Encode)?;
            "png"
        }
        other => return Err(ImageError::UnsupportedFormat(format!("{:?}", other))),
    };
    Ok(ProcessedImage {
        bytes,
        extension,
        width,
        height,
    })
}

/// Full pipeline on downloaded bytes. MPO files are detected as JPEG.
pub fn process(data: &[u8]) -> Result<ProcessedImage, ImageError> {
    let format = image::guess_format(data)
        .map_err(|_| ImageError::UnsupportedFormat("unknown".to_string()))?;
    if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
        return Err(ImageError::UnsupportedFormat(format!("{:?}", format)));
    }
    let img = image::load_from_memory_with_format(data, format).map_err(ImageError::Decode)?;
    encode(&scale_down(img), format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encoded(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn scaled_size_keeps_small_images() {
        assert_eq!(scaled_size(384, 384), None);
        assert_eq!(scaled_size(100, 50), None);
    }

    #[test]
    fn scaled_size_uses_larger_overflow() {
        assert_eq!(scaled_size(768, 384), Some((384, 192)));
        assert_eq!(scaled_size(400, 1000), Some((154, 384)));
        assert_eq!(scaled_size(10000, 1), Some((384, 1)));
    }

    #[test]
    fn process_downscales_jpeg() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(800, 400, Rgb([200, 10, 10])));
        let result = process(&encoded(img, ImageFormat::Jpeg)).unwrap();

        assert_eq!(result.extension, "jpg");
        assert_eq!((result.width, result.height), (384, 192));
        let decoded = image::load_from_memory(&result.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (384, 192));
    }

    #[test]
    fn process_keeps_png_with_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 20, Rgba([0, 0, 255, 128])));
        let result = process(&encoded(img, ImageFormat::Png)).unwrap();

        assert_eq!(result.extension, "png");
        assert_eq!(
            image::guess_format(&result.bytes).unwrap(),
            ImageFormat::Png
        );
        let decoded = image::load_from_memory(&result.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 20));
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn process_refuses_other_formats() {
        let gif_header = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
        assert!(matches!(
            process(gif_header),
            Err(ImageError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            process(b"definitely not an image"),
            Err(ImageError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn process_reports_corrupt_jpeg() {
        let truncated = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        assert!(matches!(process(&truncated), Err(ImageError::Decode(_))));
    }
}
