use nalgebra as na;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rgbd_grabber::calibration::{
    COLOR_FILE, CalibrationSet, CalibrationStore, DEPTH_SHIFT_FILE, POSE_FILE,
    half_resolution_intrinsics,
};

fn sample_set() -> CalibrationSet {
    CalibrationSet {
        color_intrinsics: na::Matrix3::new(1081.37, 0.0, 959.5, 0.0, 1081.37, 539.5, 0.0, 0.0, 1.0),
        color_distortion: na::dvector![0.0627, -0.0791, 0.0006, -0.0012, 0.0218],
        depth_intrinsics: na::Matrix3::new(365.46, 0.0, 254.88, 0.0, 365.46, 205.40, 0.0, 0.0, 1.0),
        depth_distortion: na::dvector![0.0905, -0.2690, 0.0, 0.0, 0.0950],
        rotation: na::Rotation3::from_euler_angles(0.01, -0.02, 0.003).into_inner(),
        translation: na::Vector3::new(0.0523, -0.0011, 0.0024),
        depth_shift: -12.5,
    }
}

#[test]
fn test_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::new(dir.path());
    let set = sample_set();
    store.save(&set).unwrap();
    assert_eq!(store.load(), set);
}

#[test]
fn test_missing_files_give_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let set = CalibrationStore::new(dir.path().join("nothing-here")).load();
    assert_eq!(set.color_intrinsics, na::Matrix3::identity());
    assert_eq!(set.depth_intrinsics, na::Matrix3::identity());
    assert_eq!(set.color_distortion, na::DVector::zeros(5));
    assert_eq!(set.depth_distortion, na::DVector::zeros(5));
    assert_eq!(set.rotation, na::Matrix3::identity());
    assert_eq!(set.translation, na::Vector3::zeros());
    assert_eq!(set.depth_shift, 0.0);
    assert_eq!(set, CalibrationSet::default());
}

#[test]
fn test_bad_artifacts_fall_back_one_by_one() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::new(dir.path());
    let set = sample_set();
    store.save(&set).unwrap();

    // unparsable
    std::fs::write(dir.path().join(COLOR_FILE), "{ not json").unwrap();
    // wrong shape: 2x2 rotation
    std::fs::write(
        dir.path().join(POSE_FILE),
        r#"{"rotation": {"rows": 2, "cols": 2, "data": [1, 0, 0, 1]},
            "translation": {"rows": 3, "cols": 1, "data": [0, 0, 0]}}"#,
    )
    .unwrap();
    std::fs::remove_file(dir.path().join(DEPTH_SHIFT_FILE)).unwrap();

    let loaded = store.load();
    let default = CalibrationSet::default();
    assert_eq!(loaded.color_intrinsics, default.color_intrinsics);
    assert_eq!(loaded.color_distortion, default.color_distortion);
    assert_eq!(loaded.rotation, default.rotation);
    assert_eq!(loaded.translation, default.translation);
    assert_eq!(loaded.depth_shift, 0.0);
    // the intact artifact still loads
    assert_eq!(loaded.depth_intrinsics, set.depth_intrinsics);
    assert_eq!(loaded.depth_distortion, set.depth_distortion);
}

#[test]
fn test_opencv_style_document() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(COLOR_FILE),
        r#"{
            "cameraMatrix": {"rows": 3, "cols": 3, "data": [1000, 0, 960, 0, 1001, 540, 0, 0, 1]},
            "distortionCoefficients": {"rows": 1, "cols": 4, "data": [0.1, -0.2, 0.001, 0.002]}
        }"#,
    )
    .unwrap();
    let set = CalibrationStore::new(dir.path()).load();
    assert_eq!(set.color_intrinsics[(1, 1)], 1001.0);
    assert_eq!(set.color_intrinsics[(0, 2)], 960.0);
    assert_eq!(set.color_distortion.len(), 4);
    assert_eq!(set.color_distortion[1], -0.2);
}

#[test]
fn test_half_resolution_intrinsics_randomized() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..100 {
        let full = na::Matrix3::from_fn(|_, _| rng.random_range(-2000.0..2000.0));
        let half = half_resolution_intrinsics(&full);
        for r in 0..3 {
            for c in 0..3 {
                let halved = matches!((r, c), (0, 0) | (1, 1) | (0, 2) | (1, 2));
                let expected = if halved { full[(r, c)] / 2.0 } else { full[(r, c)] };
                assert_eq!(half[(r, c)], expected, "entry ({r}, {c})");
            }
        }
    }
}
