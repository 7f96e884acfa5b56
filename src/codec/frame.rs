//! JPEG frame decoding and encoding

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

use super::{IntoPayload, PayloadDecoder, wrong_payload};
use crate::types::{DecodedFrame, Frame, StreamKind};
use crate::wire::{ImageMessage, Payload};
use crate::{LinkError, Result};

/// Decode one compressed frame into RGB pixels.
///
/// Malformed or truncated data yields [`LinkError::Decode`]. Decoding has no
/// side effects, so the same bytes always produce the same image.
pub fn decode_frame(bytes: &[u8]) -> Result<DecodedFrame> {
    if bytes.is_empty() {
        return Err(LinkError::decode(StreamKind::Image, "empty frame"));
    }
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|e| LinkError::decode(StreamKind::Image, e.to_string()))?;
    Ok(DecodedFrame::new(image.to_rgb8()))
}

/// Compress RGB pixels into a frame, for sources that capture raw images.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Frame> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| LinkError::decode(StreamKind::Image, format!("JPEG encode failed: {}", e)))?;
    Ok(Frame::new(buf))
}

/// Decodes image payloads to RGB pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder;

impl PayloadDecoder for FrameDecoder {
    type Output = DecodedFrame;

    fn kind(&self) -> StreamKind {
        StreamKind::Image
    }

    fn decode(&self, payload: Payload) -> Result<DecodedFrame> {
        match payload {
            Payload::Image(message) => decode_frame(&message.data),
            other => Err(wrong_payload(StreamKind::Image, &other)),
        }
    }
}

/// Passes image payloads through still compressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFrameDecoder;

impl PayloadDecoder for RawFrameDecoder {
    type Output = Frame;

    fn kind(&self) -> StreamKind {
        StreamKind::Image
    }

    fn decode(&self, payload: Payload) -> Result<Frame> {
        match payload {
            Payload::Image(message) => Ok(Frame::new(message.data)),
            other => Err(wrong_payload(StreamKind::Image, &other)),
        }
    }
}

impl IntoPayload for Frame {
    const KIND: StreamKind = StreamKind::Image;

    fn into_payload(self) -> Payload {
        Payload::Image(ImageMessage { data: self.into_bytes() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn decode_is_repeatable() {
        let frame = test_utils::sample_frame(32, 24);
        let first = decode_frame(frame.as_bytes()).unwrap();
        let second = decode_frame(frame.as_bytes()).unwrap();
        assert_eq!(first, second);
        assert_eq!((first.width(), first.height()), (32, 24));
        assert_eq!(first.pixels().len(), 32 * 24 * 3);
    }

    #[test]
    fn truncated_frame_is_a_decode_error() {
        let frame = test_utils::sample_frame(32, 24);
        let truncated = &frame.as_bytes()[..20];
        let err = decode_frame(truncated).unwrap_err();
        assert!(matches!(err, LinkError::Decode { kind: StreamKind::Image, .. }));
    }

    #[test]
    fn garbage_and_empty_frames_are_decode_errors() {
        assert!(matches!(decode_frame(b"not a jpeg"), Err(LinkError::Decode { .. })));
        assert!(matches!(decode_frame(&[]), Err(LinkError::Decode { .. })));
    }

    #[test]
    fn frame_payload_round_trip_keeps_bytes() {
        let frame = test_utils::sample_frame(8, 8);
        let payload = frame.clone().into_payload();
        assert_eq!(RawFrameDecoder.decode(payload).unwrap(), frame);
    }

    #[test]
    fn wrong_payload_kind_is_rejected() {
        let payload = Payload::Imu(crate::wire::ImuMessage { values: vec![0.0; 3] });
        assert!(matches!(FrameDecoder.decode(payload), Err(LinkError::Protocol { .. })));
    }
}
