use crate::image_ops::image_types::Extensions;
use image::{ImageError, ImageReader};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported image format, only JPEG is accepted")]
    UnsupportedFormat,
    #[error("can't read image: {0}")]
    Unreadable(#[from] ImageError),
    #[error("image is {width}x{height}, at least {min_width}x{min_height} is required")]
    TooSmall {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },
}

/// Checks an upload before it is stored. Only the header is decoded here, broken pixel
/// data surfaces later as a failed resize
pub fn validate_upload(
    data: &[u8],
    min_width: u32,
    min_height: u32,
) -> Result<Extensions, ValidationError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|err| ValidationError::Unreadable(ImageError::IoError(err)))?;
    let extension = reader
        .format()
        .and_then(Extensions::from_image_format)
        .ok_or(ValidationError::UnsupportedFormat)?;

    let (width, height) = reader.into_dimensions()?;
    if width < min_width || height < min_height {
        return Err(ValidationError::TooSmall {
            width,
            height,
            min_width,
            min_height,
        });
    }

    Ok(extension)
}
