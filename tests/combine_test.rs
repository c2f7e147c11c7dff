use image::{Luma, Rgb, RgbImage};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rgbd_grabber::combine::{CombineParams, combine, combine_in_place};
use rgbd_grabber::types::AlignedDepthFrame;

#[test]
fn test_sentinel_iff_invalid() {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let (w, h) = (64, 48);
    let depth = AlignedDepthFrame::from_fn(w, h, |_, _| {
        // bias toward the interesting values
        match rng.random_range(0..4) {
            0 => Luma([0]),
            1 => Luma([rng.random_range(2995..3006)]),
            _ => Luma([rng.random_range(0..u16::MAX)]),
        }
    });
    let color = RgbImage::from_fn(w, h, |_, _| Rgb([rng.random(), rng.random(), rng.random()]));
    let params = CombineParams::default();
    let out = combine(&depth, &color, &params);

    for (x, y, px) in out.enumerate_pixels() {
        let d = depth.get_pixel(x, y)[0];
        if d == 0 || d > 3000 {
            assert_eq!(*px, Rgb([0, 255, 0]), "depth {d} at ({x}, {y})");
        } else {
            assert_eq!(px, color.get_pixel(x, y), "depth {d} at ({x}, {y})");
        }
    }
}

#[test]
fn test_custom_threshold_and_sentinel() {
    let depth = AlignedDepthFrame::from_raw(3, 1, vec![500, 501, 0]).unwrap();
    let mut color = RgbImage::from_pixel(3, 1, Rgb([1, 2, 3]));
    let params = CombineParams {
        max_valid_depth: 500,
        sentinel: [255, 0, 255],
    };
    combine_in_place(&depth, &mut color, &params);
    assert_eq!(color.get_pixel(0, 0), &Rgb([1, 2, 3]));
    assert_eq!(color.get_pixel(1, 0), &Rgb([255, 0, 255]));
    assert_eq!(color.get_pixel(2, 0), &Rgb([255, 0, 255]));
}

#[test]
fn test_combine_is_pure() {
    let depth = AlignedDepthFrame::from_raw(2, 1, vec![0, 1000]).unwrap();
    let color = RgbImage::from_pixel(2, 1, Rgb([9, 9, 9]));
    let a = combine(&depth, &color, &CombineParams::default());
    let b = combine(&depth, &color, &CombineParams::default());
    assert_eq!(a, b);
    assert_eq!(color.get_pixel(0, 0), &Rgb([9, 9, 9]));
}

#[test]
#[should_panic]
fn test_dimension_mismatch_panics() {
    let depth = AlignedDepthFrame::new(960, 540);
    let color = RgbImage::new(1920, 1080);
    combine(&depth, &color, &CombineParams::default());
}
