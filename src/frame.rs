//! Captured frames and the processing-resolution encoder.
//!
//! - `RawFrame`: one decoded camera image (RGB8, true camera resolution).
//! - `EncodedFrame`: JPEG bytes at the fixed processing resolution.
//! - `FrameEncoder`: owns the reusable resize surface and output buffer.
//!
//! Every detection box the service returns is expressed in processing
//! space, so `PROCESSING_WIDTH` x `PROCESSING_HEIGHT` must never change for
//! the lifetime of a session.

use anyhow::{anyhow, Context, Result};
use fast_image_resize as fr;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::time::Instant;

/// Width of every frame sent to the detection service.
pub const PROCESSING_WIDTH: u32 = 640;

/// Height of every frame sent to the detection service.
pub const PROCESSING_HEIGHT: u32 = 480;

/// JPEG quality used for transport (0.7 on a 0..1 scale).
pub const JPEG_QUALITY: u8 = 70;

const BYTES_PER_PIXEL: usize = 3;

// ----------------------------------------------------------------------------
// RawFrame: one captured camera image
// ----------------------------------------------------------------------------

/// A decoded camera frame. Not retained beyond encoding.
pub struct RawFrame {
    /// Packed RGB8 pixels, row-major, no padding.
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic capture instant.
    pub captured_at: Instant,
}

impl RawFrame {
    /// Wrap packed RGB8 pixels. Fails if the buffer does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{} RGB",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    /// Decode a JPEG (or any format the `image` crate was built with) into a frame.
    pub fn from_jpeg(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode jpeg")?;
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(rgb.into_raw(), width, height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// True when the source has produced real dimensions.
    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

// ----------------------------------------------------------------------------
// EncodedFrame: compressed bytes ready for the link
// ----------------------------------------------------------------------------

/// A frame compressed at the processing resolution.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

// ----------------------------------------------------------------------------
// FrameEncoder
// ----------------------------------------------------------------------------

/// Stretches frames to the processing resolution and JPEG-encodes them.
///
/// The resize surface and the output buffer are allocated once and reused
/// for every call; aspect ratio is not preserved (the camera image is
/// stretched to fill 640x480).
pub struct FrameEncoder {
    resizer: fr::Resizer,
    options: fr::ResizeOptions,
    surface: fr::images::Image<'static>,
    output: Vec<u8>,
    quality: u8,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::with_quality(JPEG_QUALITY)
    }

    pub fn with_quality(quality: u8) -> Self {
        Self {
            resizer: fr::Resizer::new(),
            options: fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            surface: fr::images::Image::new(
                PROCESSING_WIDTH,
                PROCESSING_HEIGHT,
                fr::PixelType::U8x3,
            ),
            output: Vec::with_capacity(64 * 1024),
            quality: quality.clamp(1, 100),
        }
    }

    /// Encode a frame.
    ///
    /// Returns `Ok(None)` when the frame has no valid dimensions yet; that is
    /// a not-ready condition for the caller to retry, not an error.
    pub fn encode(&mut self, frame: &RawFrame) -> Result<Option<EncodedFrame>> {
        if !frame.has_dimensions() {
            return Ok(None);
        }

        let pixels: &[u8] =
            if frame.width == PROCESSING_WIDTH && frame.height == PROCESSING_HEIGHT {
                frame.pixels()
            } else {
                let src = fr::images::ImageRef::new(
                    frame.width,
                    frame.height,
                    frame.pixels(),
                    fr::PixelType::U8x3,
                )
                .context("wrap frame for resize")?;
                self.resizer
                    .resize(&src, &mut self.surface, Some(&self.options))
                    .context("resize frame to processing resolution")?;
                self.surface.buffer()
            };

        self.output.clear();
        JpegEncoder::new_with_quality(&mut self.output, self.quality)
            .encode(
                pixels,
                PROCESSING_WIDTH,
                PROCESSING_HEIGHT,
                ExtendedColorType::Rgb8,
            )
            .context("encode jpeg")?;

        Ok(Some(EncodedFrame {
            bytes: self.output.clone(),
            width: PROCESSING_WIDTH,
            height: PROCESSING_HEIGHT,
            quality: self.quality,
        }))
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn gradient_frame(width: u32, height: u32) -> RawFrame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push((x % 256) as u8);
                data.push((y % 256) as u8);
                data.push(128);
            }
        }
        RawFrame::new(data, width, height).unwrap()
    }

    #[test]
    fn raw_frame_rejects_mismatched_buffer() {
        assert!(RawFrame::new(vec![0u8; 10], 4, 4).is_err());
    }

    #[test]
    fn encoder_outputs_processing_resolution_jpeg() -> Result<()> {
        let mut encoder = FrameEncoder::new();
        let frame = gradient_frame(1280, 720);

        let encoded = encoder.encode(&frame)?.expect("frame has dimensions");
        assert_eq!(encoded.width, PROCESSING_WIDTH);
        assert_eq!(encoded.height, PROCESSING_HEIGHT);
        assert_eq!(encoded.quality, JPEG_QUALITY);
        assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&encoded.bytes)?;
        assert_eq!(decoded.dimensions(), (PROCESSING_WIDTH, PROCESSING_HEIGHT));
        Ok(())
    }

    #[test]
    fn encoder_reuses_surface_across_calls() -> Result<()> {
        let mut encoder = FrameEncoder::new();
        let first = encoder.encode(&gradient_frame(320, 240))?.unwrap();
        let second = encoder.encode(&gradient_frame(1920, 1080))?.unwrap();
        assert_eq!(first.width, second.width);
        assert_eq!(first.height, second.height);
        Ok(())
    }

    #[test]
    fn encoder_skips_frames_without_dimensions() -> Result<()> {
        let mut encoder = FrameEncoder::new();
        let empty = RawFrame::new(Vec::new(), 0, 0)?;
        assert!(encoder.encode(&empty)?.is_none());
        Ok(())
    }

    #[test]
    fn from_jpeg_decodes_dimensions() -> Result<()> {
        let mut encoder = FrameEncoder::new();
        let encoded = encoder.encode(&gradient_frame(640, 480))?.unwrap();
        let frame = RawFrame::from_jpeg(&encoded.bytes)?;
        assert_eq!((frame.width, frame.height), (640, 480));
        Ok(())
    }
}
