//! False-color depth preview. Visualization only.

use image::{GrayImage, Luma, Rgb, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{GrabberError, Result};
use crate::types::DepthImage;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayRange {
    /// Millimetres mapped to intensity 0.
    pub near: f32,
    /// Millimetres mapped to intensity 255.
    pub far: f32,
}

impl Default for DisplayRange {
    fn default() -> Self {
        Self {
            near: 500.0,
            far: 5000.0,
        }
    }
}

impl DisplayRange {
    /// Both ends finite and `far > near`, otherwise the intensity scale is undefined.
    pub fn validate(&self) -> Result<()> {
        if self.near.is_finite() && self.far.is_finite() && self.near < self.far {
            Ok(())
        } else {
            Err(GrabberError::Config(format!(
                "display range needs near < far, got [{}, {}]",
                self.near, self.far
            )))
        }
    }

    /// `clamp((depth - near) * 255 / (far - near), 0, 255)`
    pub fn intensity(&self, depth: u16) -> u8 {
        let alpha = 255.0 / (self.far - self.near);
        let v = (depth as f32 - self.near) * alpha;
        v.clamp(0.0, 255.0).round() as u8
    }
}

/// 256-entry lookup sampled from a perceptually uniform gradient.
pub struct Palette {
    lut: Vec<Rgb<u8>>,
}

impl Palette {
    pub fn new(gradient: colorous::Gradient) -> Palette {
        let lut = (0..256)
            .map(|i| {
                let c = gradient.eval_continuous(i as f64 / 255.0);
                Rgb([c.r, c.g, c.b])
            })
            .collect();
        Palette { lut }
    }

    pub fn color(&self, intensity: u8) -> Rgb<u8> {
        self.lut[intensity as usize]
    }
}

impl Default for Palette {
    fn default() -> Self {
        Palette::new(colorous::TURBO)
    }
}

pub fn depth_to_intensity(depth: &DepthImage, range: &DisplayRange) -> GrayImage {
    let data: Vec<u8> = depth.as_raw().par_iter().map(|&d| range.intensity(d)).collect();
    GrayImage::from_raw(depth.width(), depth.height(), data)
        .unwrap_or_else(|| GrayImage::new(depth.width(), depth.height()))
}

pub fn colorize(gray: &GrayImage, palette: &Palette) -> RgbImage {
    RgbImage::from_par_fn(gray.width(), gray.height(), |x, y| {
        let Luma([v]) = *gray.get_pixel(x, y);
        palette.color(v)
    })
}

pub fn depth_to_preview(depth: &DepthImage, range: &DisplayRange, palette: &Palette) -> RgbImage {
    colorize(&depth_to_intensity(depth, range), palette)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_ends_differ() {
        let p = Palette::default();
        assert_ne!(p.color(0), p.color(255));
    }
}
