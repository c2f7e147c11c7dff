use image::{ImageBuffer, Luma, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::{GrabberError, Result};

/// 16-bit single channel depth image, millimetres, zero = no data.
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Depth registered into the clipped color grid.
pub type AlignedDepthFrame = DepthImage;

/// Clipped color with invalid-depth pixels painted with the sentinel color.
pub type CombinedFrame = RgbImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Depth,
    Color,
}

impl StreamKind {
    pub fn counterpart(self) -> StreamKind {
        match self {
            StreamKind::Depth => StreamKind::Color,
            StreamKind::Color => StreamKind::Depth,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Depth => write!(f, "depth"),
            StreamKind::Color => write!(f, "color"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 16-bit depth, 1 mm per unit.
    Depth1Mm,
    /// 16-bit depth, 100 um per unit.
    Depth100Um,
    /// Packed 8-bit RGB.
    Rgb888,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Size {
        Size { width, height }
    }

    /// Half-scale grid used as the registration target.
    pub fn clipped(&self) -> Size {
        Size::new(self.width / 2, self.height / 2)
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMode {
    pub resolution_x: u32,
    pub resolution_y: u32,
    pub fps: u32,
    pub pixel_format: PixelFormat,
}

impl VideoMode {
    pub fn size(&self) -> Size {
        Size::new(self.resolution_x, self.resolution_y)
    }
}

impl std::fmt::Display for VideoMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}, {} fps, {:?}",
            self.resolution_x, self.resolution_y, self.fps, self.pixel_format
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    Depth(Vec<u16>),
    Rgb(Vec<u8>),
}

/// Immutable snapshot read from one stream.
///
/// `seq` only orders frames of the same stream; there is no shared clock
/// between the depth and color streams.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    kind: StreamKind,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    seq: u64,
    data: PixelBuffer,
}

impl Frame {
    pub fn new(
        kind: StreamKind,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        seq: u64,
        data: PixelBuffer,
    ) -> Result<Frame> {
        let pixels = width as usize * height as usize;
        let (expected, actual) = match (&data, pixel_format) {
            (PixelBuffer::Depth(d), PixelFormat::Depth1Mm | PixelFormat::Depth100Um) => {
                (pixels, d.len())
            }
            (PixelBuffer::Rgb(d), PixelFormat::Rgb888) => (pixels * 3, d.len()),
            _ => {
                return Err(GrabberError::UnexpectedFormat {
                    kind,
                    format: pixel_format,
                });
            }
        };
        if actual != expected {
            return Err(GrabberError::buffer_mismatch(expected, actual));
        }
        Ok(Frame {
            kind,
            width,
            height,
            pixel_format,
            seq,
            data,
        })
    }

    pub fn depth(width: u32, height: u32, seq: u64, data: Vec<u16>) -> Result<Frame> {
        Self::new(
            StreamKind::Depth,
            width,
            height,
            PixelFormat::Depth1Mm,
            seq,
            PixelBuffer::Depth(data),
        )
    }

    pub fn rgb(width: u32, height: u32, seq: u64, data: Vec<u8>) -> Result<Frame> {
        Self::new(
            StreamKind::Color,
            width,
            height,
            PixelFormat::Rgb888,
            seq,
            PixelBuffer::Rgb(data),
        )
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }
    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }
    pub fn seq(&self) -> u64 {
        self.seq
    }
    pub fn data(&self) -> &PixelBuffer {
        &self.data
    }

    /// Depth samples in millimetres.
    pub fn into_depth_image(self) -> Result<DepthImage> {
        let (w, h) = (self.width, self.height);
        match (self.data, self.pixel_format) {
            (PixelBuffer::Depth(d), PixelFormat::Depth1Mm) => DepthImage::from_raw(w, h, d)
                .ok_or(GrabberError::buffer_mismatch(w as usize * h as usize, 0)),
            (PixelBuffer::Depth(d), PixelFormat::Depth100Um) => {
                let mm = d.into_iter().map(|v| ((v as u32 + 5) / 10) as u16).collect();
                DepthImage::from_raw(w, h, mm)
                    .ok_or(GrabberError::buffer_mismatch(w as usize * h as usize, 0))
            }
            (_, format) => Err(GrabberError::UnexpectedFormat {
                kind: self.kind,
                format,
            }),
        }
    }

    pub fn into_rgb_image(self) -> Result<RgbImage> {
        let (w, h) = (self.width, self.height);
        match self.data {
            PixelBuffer::Rgb(d) => RgbImage::from_raw(w, h, d)
                .ok_or(GrabberError::buffer_mismatch(w as usize * h as usize * 3, 0)),
            PixelBuffer::Depth(_) => Err(GrabberError::UnexpectedFormat {
                kind: self.kind,
                format: self.pixel_format,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_short_buffer() {
        let err = Frame::depth(4, 4, 0, vec![0; 15]).unwrap_err();
        assert!(matches!(
            err,
            GrabberError::BufferSizeMismatch {
                expected: 16,
                actual: 15
            }
        ));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn area_past_u32() {
        let mode = VideoMode {
            resolution_x: 65536,
            resolution_y: 65536,
            fps: 30,
            pixel_format: PixelFormat::Rgb888,
        };
        assert_eq!(mode.size().area(), 1usize << 32);
        assert_eq!(mode.size().area() * 3, 3usize << 32);
    }

    #[test]
    fn depth_100um_converted_to_mm() {
        let frame = Frame::new(
            StreamKind::Depth,
            2,
            1,
            PixelFormat::Depth100Um,
            0,
            PixelBuffer::Depth(vec![10000, 12345]),
        )
        .unwrap();
        let img = frame.into_depth_image().unwrap();
        assert_eq!(img.as_raw(), &vec![1000, 1235]);
    }

    #[test]
    fn clipped_is_half() {
        assert_eq!(Size::new(1920, 1080).clipped(), Size::new(960, 540));
    }
}
