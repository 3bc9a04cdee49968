use crate::config::Dimension;
use fast_image_resize::Resizer;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageError};

pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Concrete pixel size for `dimension`, filling a zero side from the source ratio
pub fn target_size(orig_width: u32, orig_height: u32, dimension: &Dimension) -> (u32, u32) {
    match (dimension.width, dimension.height) {
        (0, 0) => (orig_width, orig_height),
        (0, h) => {
            let ratio = orig_width as f64 / orig_height as f64;
            (((h as f64 * ratio).round() as u32).max(1), h)
        }
        (w, 0) => {
            let ratio = orig_height as f64 / orig_width as f64;
            (w, ((w as f64 * ratio).round() as u32).max(1))
        }
        (w, h) => (w, h),
    }
}

/// Resizes to `dimension`. Both sides are honored exactly when non-zero
pub fn resize(
    img: &DynamicImage,
    dimension: &Dimension,
) -> Result<DynamicImage, fast_image_resize::ResizeError> {
    let (w, h) = target_size(img.width(), img.height(), dimension);

    let mut resizer = Resizer::new();
    let mut dst_img = DynamicImage::new(w, h, img.color());
    resizer.resize(img, &mut dst_img, None)?;

    Ok(dst_img)
}

/// Encodes as baseline JPEG, dropping alpha if there is any
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    let rgb = match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => None,
        other => Some(DynamicImage::ImageRgb8(other.to_rgb8())),
    };
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    rgb.as_ref().unwrap_or(img).write_with_encoder(encoder)?;

    Ok(buf)
}
