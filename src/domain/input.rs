use std::borrow::Cow;

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// An image as submitted: raw bytes, or the same bytes as base64 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageInput {
    Bytes(Vec<u8>),
    Base64(String),
}

impl ImageInput {
    /// The literal content the cache key is derived from.
    pub fn content(&self) -> &[u8] {
        match self {
            ImageInput::Bytes(bytes) => bytes,
            ImageInput::Base64(text) => text.as_bytes(),
        }
    }

    /// Image bytes for the detector. Base64 text is decoded into a fresh
    /// buffer owned by the caller.
    pub fn decode(&self) -> Result<Cow<'_, [u8]>, base64::DecodeError> {
        match self {
            ImageInput::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
            ImageInput::Base64(text) => STANDARD.decode(text.trim()).map(Cow::Owned),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Webp,
    Tiff,
}

impl ImageFormat {
    /// Recognizes common raster formats from their magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageFormat::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
            [b'G', b'I', b'F', b'8', ..] => Some(ImageFormat::Gif),
            [b'B', b'M', ..] => Some(ImageFormat::Bmp),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => {
                Some(ImageFormat::Webp)
            }
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(ImageFormat::Tiff),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Webp => "webp",
            ImageFormat::Tiff => "tiff",
        }
    }
}
