use image::ImageReader;
use nalgebra as na;
use rgbd_grabber::camera_model::{OpenCVModel5, init_undistort_map, remap};
use rgbd_grabber::types::Size;

fn main() {
    let path = std::env::args().nth(1).unwrap_or("data/color.png".to_string());
    let img = ImageReader::open(&path).unwrap().decode().unwrap().to_rgb8();
    let size = Size::new(img.width(), img.height());
    let k = na::Matrix3::new(
        1060.0,
        0.0,
        size.width as f64 / 2.0,
        0.0,
        1060.0,
        size.height as f64 / 2.0,
        0.0,
        0.0,
        1.0,
    );
    let dist = na::dvector![0.05, -0.08, 0.0005, -0.0003, 0.02];
    let model = OpenCVModel5::new(&k, &dist, size.width, size.height);
    let table = init_undistort_map(&model, &k, size);
    let undistorted = remap(&img, &table);
    undistorted.save("undistorted.png").unwrap()
}
