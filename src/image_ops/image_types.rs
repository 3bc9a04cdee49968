use image::ImageFormat;

pub trait MimeType {
    fn mime_type(&self) -> &str;
}

/// Formats accepted for uploads and produced by resizing
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Extensions {
    Jpeg,
}

impl Extensions {
    /// File extension used on disk
    pub fn name(&self) -> &'static str {
        match self {
            Extensions::Jpeg => "jpg",
        }
    }

    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Extensions::Jpeg),
            _ => None,
        }
    }
}

impl MimeType for Extensions {
    fn mime_type(&self) -> &str {
        match &self {
            Extensions::Jpeg => "image/jpeg",
        }
    }
}
