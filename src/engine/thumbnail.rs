//! Thumbnail extraction from raw video frames.
//!
//! The engine hands out its current frame as packed 32-bit pixels
//! (`screenshot-raw`). This module scales it to fit a bounding square with
//! nearest-neighbour sampling and converts it to RGBA.

use serde::Serialize;

use crate::error::MpvError;
use crate::property::Node;

/// Byte order of a packed 32-bit pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelFormat {
    Bgr0,
    Bgra,
    Rgb0,
    Rgba,
}

impl PixelFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bgr0" => Some(PixelFormat::Bgr0),
            "bgra" => Some(PixelFormat::Bgra),
            "rgb0" => Some(PixelFormat::Rgb0),
            "rgba" => Some(PixelFormat::Rgba),
            _ => None,
        }
    }

    /// (r, g, b, a) from one pixel. Padding bytes become opaque alpha.
    fn to_rgba(self, px: &[u8]) -> [u8; 4] {
        match self {
            PixelFormat::Bgr0 => [px[2], px[1], px[0], 0xff],
            PixelFormat::Bgra => [px[2], px[1], px[0], px[3]],
            PixelFormat::Rgb0 => [px[0], px[1], px[2], 0xff],
            PixelFormat::Rgba => [px[0], px[1], px[2], px[3]],
        }
    }
}

/// A raw frame as produced by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, at least `width * 4`
    pub stride: usize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl Frame {
    const BYTES_PER_PIXEL: usize = 4;

    /// Decode the map node returned for `screenshot-raw`
    /// (`w`, `h`, `stride`, `format`, `data`).
    pub fn from_node(node: &Node) -> Result<Self, MpvError> {
        let int = |key: &str| match node.get(key) {
            Some(Node::Int64(v)) => Ok(*v),
            _ => Err(MpvError::PropertyFormat),
        };
        let width = u32::try_from(int("w")?).map_err(|_| MpvError::PropertyFormat)?;
        let height = u32::try_from(int("h")?).map_err(|_| MpvError::PropertyFormat)?;
        let stride = usize::try_from(int("stride")?).map_err(|_| MpvError::PropertyFormat)?;
        let format = match node.get("format") {
            Some(Node::String(name)) => PixelFormat::from_name(name).ok_or(MpvError::UnknownFormat)?,
            _ => return Err(MpvError::PropertyFormat),
        };
        let data = match node.get("data") {
            Some(Node::ByteArray(bytes)) => bytes.clone(),
            _ => return Err(MpvError::PropertyFormat),
        };

        let frame = Frame {
            width,
            height,
            stride,
            format,
            data,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Encode as the map node layout of `screenshot-raw`.
    pub fn to_node(&self) -> Node {
        let format = match self.format {
            PixelFormat::Bgr0 => "bgr0",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgb0 => "rgb0",
            PixelFormat::Rgba => "rgba",
        };
        Node::Map(vec![
            ("w".to_string(), Node::Int64(i64::from(self.width))),
            ("h".to_string(), Node::Int64(i64::from(self.height))),
            ("stride".to_string(), Node::Int64(self.stride as i64)),
            ("format".to_string(), Node::String(format.to_string())),
            ("data".to_string(), Node::ByteArray(self.data.clone())),
        ])
    }

    pub fn validate(&self) -> Result<(), MpvError> {
        if self.width == 0 || self.height == 0 {
            return Err(MpvError::PropertyUnavailable);
        }
        let row = self.width as usize * Self::BYTES_PER_PIXEL;
        let needed = self.stride * (self.height as usize - 1) + row;
        if self.stride < row || self.data.len() < needed {
            return Err(MpvError::PropertyFormat);
        }
        Ok(())
    }

    fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.stride + x as usize * Self::BYTES_PER_PIXEL;
        self.format
            .to_rgba(&self.data[offset..offset + Self::BYTES_PER_PIXEL])
    }
}

/// Scaled RGBA image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA rows
    #[serde(skip)]
    pub pixels: Vec<u8>,
}

/// Largest size with the same aspect ratio that fits in a
/// `max_dimension` square. Frames already small enough keep their size.
pub fn fit_dimensions(width: u32, height: u32, max_dimension: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 || max_dimension == 0 {
        return None;
    }
    let longest = width.max(height);
    if longest <= max_dimension {
        return Some((width, height));
    }
    let scale = f64::from(max_dimension) / f64::from(longest);
    let w = ((f64::from(width) * scale).round() as u32).clamp(1, max_dimension);
    let h = ((f64::from(height) * scale).round() as u32).clamp(1, max_dimension);
    Some((w, h))
}

/// Scale `frame` to fit `max_dimension`. Returns `None` when the frame or
/// the requested size is unusable.
pub fn scale_to_fit(frame: &Frame, max_dimension: u32) -> Option<Thumbnail> {
    frame.validate().ok()?;
    let (width, height) = fit_dimensions(frame.width, frame.height, max_dimension)?;

    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        let src_y = (u64::from(y) * u64::from(frame.height) / u64::from(height)) as u32;
        for x in 0..width {
            let src_x = (u64::from(x) * u64::from(frame.width) / u64::from(width)) as u32;
            pixels.extend_from_slice(&frame.pixel(src_x, src_y));
        }
    }

    Some(Thumbnail {
        width,
        height,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, bgr0: [u8; 4]) -> Frame {
        Frame {
            width,
            height,
            stride: width as usize * 4,
            format: PixelFormat::Bgr0,
            data: bgr0.repeat((width * height) as usize),
        }
    }

    #[test]
    fn test_fit_dimensions_preserves_aspect() {
        assert_eq!(fit_dimensions(1920, 1080, 256), Some((256, 144)));
        assert_eq!(fit_dimensions(1080, 1920, 256), Some((144, 256)));
        assert_eq!(fit_dimensions(100, 50, 256), Some((100, 50)));
        assert_eq!(fit_dimensions(4000, 1, 100), Some((100, 1)));
        assert_eq!(fit_dimensions(100, 50, 0), None);
    }

    #[test]
    fn test_scale_converts_to_rgba() {
        let frame = solid(64, 32, [10, 20, 30, 0]);
        let thumb = scale_to_fit(&frame, 16).unwrap();
        assert_eq!((thumb.width, thumb.height), (16, 8));
        assert_eq!(thumb.pixels.len(), 16 * 8 * 4);
        assert_eq!(&thumb.pixels[..4], &[30, 20, 10, 0xff]);
    }

    #[test]
    fn test_padded_stride() {
        let mut frame = solid(2, 2, [1, 2, 3, 0]);
        frame.stride = 12;
        frame.data = vec![0u8; 24];
        frame.data[12..16].copy_from_slice(&[7, 8, 9, 0]);
        let thumb = scale_to_fit(&frame, 2).unwrap();
        assert_eq!(&thumb.pixels[8..12], &[9, 8, 7, 0xff]);
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let mut frame = solid(4, 4, [0; 4]);
        frame.data.truncate(10);
        assert_eq!(frame.validate(), Err(MpvError::PropertyFormat));
        assert!(scale_to_fit(&frame, 4).is_none());
    }

    #[test]
    fn test_node_layout() {
        let frame = solid(2, 1, [1, 2, 3, 0]);
        let decoded = Frame::from_node(&frame.to_node()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(
            Frame::from_node(&Node::Map(vec![])),
            Err(MpvError::PropertyFormat)
        );
    }
}
