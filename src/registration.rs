//! Depth-to-color registration.
//!
//! [`Registrar`] is the narrow contract the capture pipeline consumes. The
//! engine behind it is replaceable; [`CpuRegistrar`] is the reference
//! implementation shipped with the crate.
//!
//! Tie-break: several depth pixels can land on the same color pixel. The CPU
//! registrar keeps the sample closest to the color sensor (z-buffer), so
//! foreground surfaces occlude background ones and results do not depend on
//! iteration order.

use nalgebra as na;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::camera_model::{CameraModel, OpenCVModel5};
use crate::error::{GrabberError, Result};
use crate::types::{AlignedDepthFrame, DepthImage, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterMode {
    /// Depth pixels are back-projected from their own grid position.
    Raw,
    /// Depth pixel positions are corrected with the depth distortion first.
    #[default]
    Undistort,
}

/// Everything a registrar needs, fixed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrarParams {
    /// Color intrinsics scaled to `clipped_color_size`.
    pub color_intrinsics_half: na::Matrix3<f64>,
    pub clipped_color_size: Size,
    pub depth_intrinsics: na::Matrix3<f64>,
    pub depth_size: Size,
    pub depth_distortion: na::DVector<f64>,
    pub rotation: na::Matrix3<f64>,
    /// Metres.
    pub translation: na::Vector3<f64>,
    /// Validity range in metres, applied in the color sensor frame.
    pub near_clip: f64,
    pub far_clip: f64,
    pub filter_mode: FilterMode,
}

impl RegistrarParams {
    pub fn validate(&self) -> Result<()> {
        let focal_ok = |k: &na::Matrix3<f64>| {
            [k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)]]
                .iter()
                .all(|v| v.is_finite())
                && k[(0, 0)] > 0.0
                && k[(1, 1)] > 0.0
        };
        if !focal_ok(&self.color_intrinsics_half) {
            return Err(GrabberError::Registration(
                "color intrinsics need positive finite focal lengths".to_string(),
            ));
        }
        if !focal_ok(&self.depth_intrinsics) {
            return Err(GrabberError::Registration(
                "depth intrinsics need positive finite focal lengths".to_string(),
            ));
        }
        if self.clipped_color_size.is_empty() || self.depth_size.is_empty() {
            return Err(GrabberError::Registration(format!(
                "empty image size (color {}, depth {})",
                self.clipped_color_size, self.depth_size
            )));
        }
        if !(self.near_clip.is_finite()
            && self.far_clip.is_finite()
            && 0.0 < self.near_clip
            && self.near_clip < self.far_clip)
        {
            return Err(GrabberError::Registration(format!(
                "invalid depth range [{}, {}]",
                self.near_clip, self.far_clip
            )));
        }
        if !self.rotation.iter().chain(self.translation.iter()).all(|v| v.is_finite()) {
            return Err(GrabberError::Registration("non-finite pose".to_string()));
        }
        Ok(())
    }
}

pub trait Registrar: Send {
    /// Prepares the engine; failure is fatal for the caller.
    fn init(&mut self, params: &RegistrarParams) -> Result<()>;

    /// Maps a bias-corrected raw depth frame (millimetres) into the clipped color grid.
    fn register_depth(&self, raw_depth: &DepthImage) -> Result<AlignedDepthFrame>;
}

struct Prepared {
    params: RegistrarParams,
    /// Back-projected ray (z = 1) for every depth pixel, row-major.
    rays: Vec<na::Vector2<f64>>,
}

#[derive(Default)]
pub struct CpuRegistrar {
    prepared: Option<Prepared>,
}

impl CpuRegistrar {
    pub fn new() -> CpuRegistrar {
        CpuRegistrar::default()
    }
}

impl Registrar for CpuRegistrar {
    fn init(&mut self, params: &RegistrarParams) -> Result<()> {
        params.validate()?;
        let depth_model = OpenCVModel5::new(
            &params.depth_intrinsics,
            &params.depth_distortion,
            params.depth_size.width,
            params.depth_size.height,
        );
        let w = params.depth_size.width;
        let pixels: Vec<na::Vector2<f64>> = (0..params.depth_size.area())
            .map(|idx| na::Vector2::new((idx as u32 % w) as f64, (idx as u32 / w) as f64))
            .collect();
        let rays = match params.filter_mode {
            FilterMode::Raw => {
                let fx = params.depth_intrinsics[(0, 0)];
                let fy = params.depth_intrinsics[(1, 1)];
                let cx = params.depth_intrinsics[(0, 2)];
                let cy = params.depth_intrinsics[(1, 2)];
                pixels
                    .par_iter()
                    .map(|p| na::Vector2::new((p.x - cx) / fx, (p.y - cy) / fy))
                    .collect()
            }
            FilterMode::Undistort => depth_model
                .unproject(&pixels)
                .into_iter()
                .map(|r| na::Vector2::new(r.x, r.y))
                .collect(),
        };
        log::info!(
            "registration initialized: depth {} -> color {}, range [{}, {}] m, {:?}",
            params.depth_size,
            params.clipped_color_size,
            params.near_clip,
            params.far_clip,
            params.filter_mode
        );
        self.prepared = Some(Prepared {
            params: params.clone(),
            rays,
        });
        Ok(())
    }

    fn register_depth(&self, raw_depth: &DepthImage) -> Result<AlignedDepthFrame> {
        let prepared = self
            .prepared
            .as_ref()
            .ok_or_else(|| GrabberError::Registration("register_depth before init".to_string()))?;
        let params = &prepared.params;
        let actual = Size::new(raw_depth.width(), raw_depth.height());
        if actual != params.depth_size {
            return Err(GrabberError::SizeMismatch {
                expected: params.depth_size,
                actual,
            });
        }

        let out_size = params.clipped_color_size;
        let k = &params.color_intrinsics_half;
        let (fx, fy, cx, cy) = (k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)]);
        let mut zbuffer = vec![f64::INFINITY; out_size.area()];

        for (ray, &d) in prepared.rays.iter().zip(raw_depth.as_raw().iter()) {
            if d == 0 {
                continue;
            }
            let z = d as f64 / 1000.0;
            let p_depth = na::Vector3::new(ray.x * z, ray.y * z, z);
            let p_color = params.rotation * p_depth + params.translation;
            // behind the color camera never projects
            if p_color.z <= 0.0 || !(params.near_clip..=params.far_clip).contains(&p_color.z) {
                continue;
            }
            let u = (fx * p_color.x / p_color.z + cx).round();
            let v = (fy * p_color.y / p_color.z + cy).round();
            if !(u.is_finite() && v.is_finite()) {
                continue;
            }
            if u < 0.0 || v < 0.0 || u >= out_size.width as f64 || v >= out_size.height as f64 {
                continue;
            }
            let idx = v as usize * out_size.width as usize + u as usize;
            if p_color.z < zbuffer[idx] {
                zbuffer[idx] = p_color.z;
            }
        }

        let data: Vec<u16> = zbuffer
            .par_iter()
            .map(|z| {
                if z.is_finite() {
                    (z * 1000.0).round().clamp(1.0, u16::MAX as f64) as u16
                } else {
                    0
                }
            })
            .collect();
        AlignedDepthFrame::from_raw(out_size.width, out_size.height, data)
            .ok_or(GrabberError::buffer_mismatch(out_size.area(), 0))
    }
}
