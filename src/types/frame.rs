//! Camera frame types

use bytes::Bytes;
use image::RgbImage;

/// One compressed (JPEG) camera frame as carried on the wire.
///
/// The payload is reference counted, so fanning a frame out to several
/// subscribers never copies the image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// Wrap an already-encoded JPEG buffer.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// A frame decoded to 8-bit RGB pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    image: RgbImage,
}

impl DecodedFrame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Row-major RGB bytes, three per pixel
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}
