//! Test utilities for building sample telemetry
//!
//! Shared by unit tests and benches so both exercise the same payloads.

#![cfg(any(test, feature = "benchmark"))]

use image::{Rgb, RgbImage};

use crate::codec::encode_jpeg;
use crate::config::LinkConfig;
use crate::types::Frame;

/// Diagonal gradient, easy to compress and easy to eyeball.
pub fn sample_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r, g, 128])
    })
}

/// JPEG-compressed [`sample_image`].
pub fn sample_frame(width: u32, height: u32) -> Frame {
    encode_jpeg(&sample_image(width, height), 85).expect("sample image encodes")
}

/// Bytes that start like a JPEG but cannot be decoded.
pub fn corrupt_frame() -> Frame {
    let mut data = vec![0xff, 0xd8, 0xff, 0xe0];
    data.extend(std::iter::repeat_n(0x5a, 60));
    Frame::new(data)
}

/// Config bound to an ephemeral loopback port.
pub fn loopback_config() -> LinkConfig {
    LinkConfig::default().with_address("127.0.0.1:0")
}
