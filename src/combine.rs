//! Masks the color frame with depth validity.

use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::{AlignedDepthFrame, CombinedFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombineParams {
    /// Largest depth, in millimetres, still treated as valid.
    pub max_valid_depth: u16,
    pub sentinel: [u8; 3],
}

impl Default for CombineParams {
    fn default() -> Self {
        Self {
            max_valid_depth: 3000,
            sentinel: [0, 255, 0],
        }
    }
}

impl CombineParams {
    pub fn is_valid(&self, depth: u16) -> bool {
        depth != 0 && depth <= self.max_valid_depth
    }
}

/// Overwrites every pixel whose depth is invalid with the sentinel color.
///
/// # Panics
/// If `depth` and `color` differ in size.
pub fn combine_in_place(depth: &AlignedDepthFrame, color: &mut RgbImage, params: &CombineParams) {
    assert_eq!(
        depth.dimensions(),
        color.dimensions(),
        "aligned depth and color must share the clipped size"
    );
    let pixels: &mut [u8] = color;
    pixels
        .par_chunks_exact_mut(3)
        .zip(depth.as_raw().par_iter())
        .for_each(|(px, &d)| {
            if !params.is_valid(d) {
                px.copy_from_slice(&params.sentinel);
            }
        });
}

pub fn combine(
    depth: &AlignedDepthFrame,
    color: &RgbImage,
    params: &CombineParams,
) -> CombinedFrame {
    let mut out = color.clone();
    combine_in_place(depth, &mut out, params);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        let p = CombineParams::default();
        assert!(!p.is_valid(0));
        assert!(p.is_valid(1));
        assert!(p.is_valid(3000));
        assert!(!p.is_valid(3001));
    }

    #[test]
    #[should_panic(expected = "clipped size")]
    fn size_mismatch_panics() {
        let depth = AlignedDepthFrame::new(4, 4);
        let mut color = RgbImage::new(4, 3);
        combine_in_place(&depth, &mut color, &CombineParams::default());
    }
}
