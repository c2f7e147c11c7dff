use rgbd_grabber::display::{DisplayRange, Palette, colorize, depth_to_intensity, depth_to_preview};
use rgbd_grabber::types::DepthImage;

#[test]
fn test_intensity_endpoints_and_clamp() {
    let range = DisplayRange::default();
    assert_eq!(range.intensity(500), 0);
    assert_eq!(range.intensity(5000), 255);
    assert_eq!(range.intensity(0), 0);
    assert_eq!(range.intensity(499), 0);
    assert_eq!(range.intensity(5001), 255);
    assert_eq!(range.intensity(u16::MAX), 255);
    // (2750 - 500) * 255 / 4500 = 127.5
    assert_eq!(range.intensity(2750), 128);
}

#[test]
fn test_intensity_is_monotonic() {
    let range = DisplayRange { near: 800.0, far: 4000.0 };
    let values: Vec<u8> = (0..6000u16).step_by(7).map(|d| range.intensity(d)).collect();
    assert!(values.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_preview_uses_palette() {
    let depth = DepthImage::from_raw(3, 1, vec![500, 2750, 5000]).unwrap();
    let range = DisplayRange::default();
    let palette = Palette::default();
    let gray = depth_to_intensity(&depth, &range);
    assert_eq!(gray.as_raw(), &vec![0, 128, 255]);

    let preview = depth_to_preview(&depth, &range, &palette);
    assert_eq!(preview.dimensions(), (3, 1));
    assert_eq!(preview, colorize(&gray, &palette));
    assert_eq!(*preview.get_pixel(0, 0), palette.color(0));
    assert_eq!(*preview.get_pixel(2, 0), palette.color(255));
}

#[test]
fn test_palette_matches_turbo() {
    let palette = Palette::new(colorous::TURBO);
    let c = colorous::TURBO.eval_continuous(1.0);
    assert_eq!(palette.color(255).0, [c.r, c.g, c.b]);
}
