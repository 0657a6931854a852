//! Downsampled JPEG previews of the camera feed.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, imageops, imageops::FilterType};
use mochi_common::config::PreviewSettings;
use mochi_common::error::{MochiError, MochiResult};

use crate::frame::Frame;

/// An encoded still plus its capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewFrame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: u64,
}

impl PreviewFrame {
    /// `data:` URL suitable for an `<img>` element.
    pub fn to_data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", STANDARD.encode(&self.jpeg))
    }
}

#[derive(Debug, Clone)]
pub struct PreviewEncoder {
    max_width: u32,
    quality: u8,
}

impl PreviewEncoder {
    pub fn new(settings: &PreviewSettings) -> Self {
        Self {
            max_width: settings.width.max(1),
            quality: settings.jpeg_quality.clamp(1, 100),
        }
    }

    /// Scale `frame` down to the preview width and encode it.
    pub fn encode(&self, frame: &Frame) -> MochiResult<PreviewFrame> {
        let view = frame.view()?;
        let (width, height) = if frame.width > self.max_width {
            let height = (frame.height as u64 * self.max_width as u64 / frame.width as u64).max(1);
            (self.max_width, height as u32)
        } else {
            (frame.width, frame.height)
        };
        let small = imageops::resize(&view, width, height, FilterType::Triangle);

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode_image(&small)
            .map_err(|e| MochiError::capture(format!("Failed to encode preview: {e}")))?;

        Ok(PreviewFrame {
            jpeg,
            width,
            height,
            timestamp_ms: frame.timestamp_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn preview_keeps_aspect_ratio() {
        let encoder = PreviewEncoder::new(&PreviewSettings::default());
        let frame = Frame::from_rgb(RgbImage::from_pixel(320, 240, Rgb([10, 200, 30])), 42, 0);

        let preview = encoder.encode(&frame).unwrap();
        assert_eq!((preview.width, preview.height), (160, 120));
        assert_eq!(preview.timestamp_ms, 42);
        // JPEG SOI marker.
        assert_eq!(&preview.jpeg[..2], &[0xFF, 0xD8]);
        assert!(preview.to_data_url().starts_with("data:image/jpeg;base64,/9j/"));
    }

    #[test]
    fn small_frames_are_not_upscaled() {
        let encoder = PreviewEncoder::new(&PreviewSettings::default());
        let frame = Frame::from_rgb(RgbImage::new(64, 48), 0, 0);
        let preview = encoder.encode(&frame).unwrap();
        assert_eq!((preview.width, preview.height), (64, 48));
    }
}
