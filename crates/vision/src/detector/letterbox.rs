//! Letterbox preprocessing.
//!
//! Frames are scaled to fit a square model input while keeping their aspect
//! ratio; the remaining border is filled with black. [`LetterboxMeta`]
//! records the transform so model-space coordinates can be mapped back to
//! the source frame.

use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use mochi_common::error::MochiResult;

use crate::frame::{BBox, Frame, Point};

/// Border fill (black).
const PADDING_VALUE: u8 = 0;

/// Geometry of one letterbox transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxMeta {
    pub src_width: u32,
    pub src_height: u32,
    /// Side of the square model input.
    pub size: u32,
    /// Uniform scale from frame pixels to model pixels.
    pub scale: f32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub pad_left: u32,
    pub pad_top: u32,
}

impl LetterboxMeta {
    pub fn compute(src_width: u32, src_height: u32, size: u32) -> Self {
        let scale = (size as f32 / src_width.max(1) as f32)
            .min(size as f32 / src_height.max(1) as f32);
        let scaled_width = ((src_width as f32 * scale).round() as u32).clamp(1, size);
        let scaled_height = ((src_height as f32 * scale).round() as u32).clamp(1, size);

        Self {
            src_width,
            src_height,
            size,
            scale,
            scaled_width,
            scaled_height,
            pad_left: (size - scaled_width) / 2,
            pad_top: (size - scaled_height) / 2,
        }
    }

    /// Frame pixels to model pixels.
    pub fn to_model(&self, point: Point) -> Point {
        Point::new(
            point.x * self.scale + self.pad_left as f32,
            point.y * self.scale + self.pad_top as f32,
        )
    }

    /// Model pixels to frame pixels, clamped to the frame.
    pub fn to_frame(&self, point: Point) -> Point {
        let x = (point.x - self.pad_left as f32) / self.scale;
        let y = (point.y - self.pad_top as f32) / self.scale;
        Point::new(
            x.clamp(0.0, self.src_width as f32),
            y.clamp(0.0, self.src_height as f32),
        )
    }

    /// Model-space box to frame pixels, clipped to the frame.
    pub fn box_to_frame(&self, bbox: BBox) -> BBox {
        let top_left = self.to_frame(Point::new(bbox.x, bbox.y));
        let bottom_right = self.to_frame(Point::new(bbox.x + bbox.w, bbox.y + bbox.h));
        BBox::from_corners(top_left, bottom_right)
    }
}

/// Square NCHW float tensor with values in [-1, 1].
#[derive(Debug, Clone)]
pub struct InputTensor {
    pub size: u32,
    pub data: Vec<f32>,
}

impl InputTensor {
    /// Tensor shape as `[1, 3, size, size]`.
    pub fn shape(&self) -> [usize; 4] {
        let side = self.size as usize;
        [1, 3, side, side]
    }

    /// RGB value at a model pixel, mapped back to 0..=255.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let plane = (self.size * self.size) as usize;
        let offset = (y * self.size + x) as usize;
        std::array::from_fn(|c| denormalize(self.data[c * plane + offset]))
    }
}

/// Letterboxed model input plus the transform that produced it.
#[derive(Debug, Clone)]
pub struct Letterboxed {
    pub meta: LetterboxMeta,
    pub tensor: InputTensor,
}

/// Letterbox `frame` to a `size`x`size` tensor.
pub fn letterbox(frame: &Frame, size: u32) -> MochiResult<Letterboxed> {
    let view = frame.view()?;
    let meta = LetterboxMeta::compute(frame.width, frame.height, size);

    let resized = imageops::resize(
        &view,
        meta.scaled_width,
        meta.scaled_height,
        FilterType::Triangle,
    );
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PADDING_VALUE; 3]));
    imageops::replace(&mut canvas, &resized, meta.pad_left as i64, meta.pad_top as i64);

    tracing::trace!(
        raw = %format!("{}x{}", frame.width, frame.height),
        scaled = %format!("{}x{}", meta.scaled_width, meta.scaled_height),
        pad_left = meta.pad_left,
        pad_top = meta.pad_top,
        "Letterboxed frame"
    );

    Ok(Letterboxed {
        meta,
        tensor: InputTensor {
            size,
            data: to_nchw(&canvas),
        },
    })
}

/// Planar RGB, each value scaled from 0..=255 to [-1, 1].
fn to_nchw(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; plane * 3];
    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = normalize(pixel[c]);
        }
    }
    data
}

fn normalize(value: u8) -> f32 {
    value as f32 / 127.5 - 1.0
}

fn denormalize(value: f32) -> u8 {
    ((value + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_frame_is_padded_vertically() {
        let meta = LetterboxMeta::compute(320, 240, 128);
        assert!((meta.scale - 0.4).abs() < 1e-6);
        assert_eq!((meta.scaled_width, meta.scaled_height), (128, 96));
        assert_eq!((meta.pad_left, meta.pad_top), (0, 16));
    }

    #[test]
    fn portrait_frame_is_padded_horizontally() {
        let meta = LetterboxMeta::compute(240, 320, 128);
        assert_eq!((meta.scaled_width, meta.scaled_height), (96, 128));
        assert_eq!((meta.pad_left, meta.pad_top), (16, 0));
    }

    #[test]
    fn points_survive_the_round_trip() {
        let meta = LetterboxMeta::compute(640, 360, 128);
        for point in [
            Point::new(0.0, 0.0),
            Point::new(320.0, 180.0),
            Point::new(639.0, 359.0),
            Point::new(17.5, 301.25),
        ] {
            let back = meta.to_frame(meta.to_model(point));
            assert!(point.distance(&back) < 1e-3, "{point:?} -> {back:?}");
        }
    }

    #[test]
    fn padding_maps_to_the_frame_edge() {
        let meta = LetterboxMeta::compute(320, 240, 128);
        let top = meta.to_frame(Point::new(64.0, 0.0));
        assert_eq!(top.y, 0.0);
        let bbox = meta.box_to_frame(BBox::new(-10.0, 0.0, 200.0, 200.0));
        assert_eq!(bbox, BBox::new(0.0, 0.0, 320.0, 240.0));
    }

    #[test]
    fn tensor_layout_and_range() {
        let image = RgbImage::from_pixel(4, 2, Rgb([255, 0, 128]));
        let frame = Frame::from_rgb(image, 0, 0);

        let boxed = letterbox(&frame, 4).unwrap();
        assert_eq!(boxed.tensor.shape(), [1, 3, 4, 4]);
        assert_eq!(boxed.tensor.data.len(), 48);
        assert!(boxed.tensor.data.iter().all(|v| (-1.0..=1.0).contains(v)));

        // One padded row above and below the 4x2 image.
        assert_eq!(boxed.meta.pad_top, 1);
        assert_eq!(boxed.tensor.pixel(0, 0), [0, 0, 0]);
        assert_eq!(boxed.tensor.pixel(0, 1), [255, 0, 128]);
        assert_eq!(boxed.tensor.pixel(3, 2), [255, 0, 128]);
        assert_eq!(boxed.tensor.pixel(2, 3), [0, 0, 0]);
    }
}
