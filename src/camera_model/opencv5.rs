use super::generic::CameraModel;
use nalgebra as na;

const UNDISTORT_ITERATIONS: usize = 20;

/// Pinhole camera with Brown-Conrady distortion (k1, k2, p1, p2, k3).
#[derive(Debug, Clone, PartialEq)]
pub struct OpenCVModel5 {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    pub width: u32,
    pub height: u32,
}

impl OpenCVModel5 {
    /// Missing trailing coefficients are treated as zero, extra ones are ignored.
    pub fn new(
        camera_matrix: &na::Matrix3<f64>,
        distortion: &na::DVector<f64>,
        width: u32,
        height: u32,
    ) -> OpenCVModel5 {
        let d = |i: usize| distortion.get(i).copied().unwrap_or(0.0);
        if distortion.len() > 5 {
            log::warn!(
                "{} distortion coefficients given, only the first 5 are used",
                distortion.len()
            );
        }
        OpenCVModel5 {
            fx: camera_matrix[(0, 0)],
            fy: camera_matrix[(1, 1)],
            cx: camera_matrix[(0, 2)],
            cy: camera_matrix[(1, 2)],
            k1: d(0),
            k2: d(1),
            p1: d(2),
            p2: d(3),
            k3: d(4),
            width,
            height,
        }
    }

    pub fn has_distortion(&self) -> bool {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
            .iter()
            .any(|k| *k != 0.0)
    }

    /// Applies the distortion polynomial to a point on the normalized plane.
    pub fn distort(&self, xn: f64, yn: f64) -> (f64, f64) {
        let r2 = xn * xn + yn * yn;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let xd = xn * radial + 2.0 * self.p1 * xn * yn + self.p2 * (r2 + 2.0 * xn * xn);
        let yd = yn * radial + self.p1 * (r2 + 2.0 * yn * yn) + 2.0 * self.p2 * xn * yn;
        (xd, yd)
    }

    /// Fixed-point inversion of `distort`.
    pub fn undistort(&self, xd: f64, yd: f64) -> (f64, f64) {
        if !self.has_distortion() {
            return (xd, yd);
        }
        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let icdist = 1.0 / (1.0 + ((self.k3 * r2 + self.k2) * r2 + self.k1) * r2);
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            x = (xd - dx) * icdist;
            y = (yd - dy) * icdist;
        }
        (x, y)
    }
}

impl CameraModel for OpenCVModel5 {
    fn width(&self) -> f64 {
        self.width as f64
    }

    fn height(&self) -> f64 {
        self.height as f64
    }

    fn project_one(&self, pt: &na::Vector3<f64>) -> na::Vector2<f64> {
        let (xd, yd) = self.distort(pt[0] / pt[2], pt[1] / pt[2]);
        na::Vector2::new(self.fx * xd + self.cx, self.fy * yd + self.cy)
    }

    fn unproject_one(&self, pt: &na::Vector2<f64>) -> na::Vector3<f64> {
        let xd = (pt[0] - self.cx) / self.fx;
        let yd = (pt[1] - self.cy) / self.fy;
        let (x, y) = self.undistort(xd, yd);
        na::Vector3::new(x, y, 1.0)
    }
}
