//! Captured frames and the geometry types shared by the detector and pose
//! estimator.

use image::{ImageBuffer, Rgb, RgbImage};
use mochi_common::error::{MochiError, MochiResult};
use serde::{Deserialize, Serialize};

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit RGB, row-major, no row padding.
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 => 3,
        }
    }
}

/// An owned image buffer plus its capture time.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,

    /// Pipeline clock reading at capture.
    pub timestamp_ms: u64,

    /// Position in the capture stream, starting at 0.
    pub seq: u64,
}

impl Frame {
    /// Wrap an RGB image.
    pub fn from_rgb(image: RgbImage, timestamp_ms: u64, seq: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgb8,
            data: image.into_raw(),
            timestamp_ms,
            seq,
        }
    }

    /// Expected buffer length for the declared dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Borrow the buffer as an image, checking that it matches the dimensions.
    pub fn view(&self) -> MochiResult<ImageBuffer<Rgb<u8>, &[u8]>> {
        if self.width == 0 || self.height == 0 {
            return Err(MochiError::inference(format!(
                "frame {} has zero size {}x{}",
                self.seq, self.width, self.height
            )));
        }
        if self.data.len() != self.expected_len() {
            return Err(MochiError::inference(format!(
                "frame {} buffer holds {} bytes, expected {} for {}x{} {:?}",
                self.seq,
                self.data.len(),
                self.expected_len(),
                self.width,
                self.height,
                self.format
            )));
        }
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
            .ok_or_else(|| MochiError::inference("frame buffer does not match its dimensions"))
    }

    /// Milliseconds between capture and `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }
}

/// A 2D point in pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned box: top-left corner plus size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Box spanning two corners given in any order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self::new(x, y, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Intersection over union with another box; 0 when either is empty.
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}
