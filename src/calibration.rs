//! Loading and saving of the four calibration artifacts.
//!
//! Each artifact lives in its own JSON document inside the calibration
//! directory. Matrices use the OpenCV storage layout (`rows`, `cols`,
//! row-major `data`) so files exported from an OpenCV calibration can be
//! converted key for key.
//!
//! A missing or malformed artifact never aborts loading: the documented
//! default is substituted and a warning is logged.

use std::path::PathBuf;

use nalgebra as na;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::Result;
use crate::io::{object_from_json, object_to_json};

pub const COLOR_FILE: &str = "calib_color.json";
pub const DEPTH_INTRINSICS_FILE: &str = "calib_ir.json";
pub const POSE_FILE: &str = "calib_pose.json";
pub const DEPTH_SHIFT_FILE: &str = "calib_depth.json";

/// Number of coefficients in a default distortion vector (k1, k2, p1, p2, k3).
pub const DEFAULT_DISTORTION_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixDoc {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl MatrixDoc {
    pub fn from_matrix3(m: &na::Matrix3<f64>) -> MatrixDoc {
        MatrixDoc {
            rows: 3,
            cols: 3,
            data: m.transpose().iter().copied().collect(),
        }
    }

    pub fn from_column(v: &[f64]) -> MatrixDoc {
        MatrixDoc {
            rows: v.len(),
            cols: 1,
            data: v.to_vec(),
        }
    }

    pub fn from_row(v: &[f64]) -> MatrixDoc {
        MatrixDoc {
            rows: 1,
            cols: v.len(),
            data: v.to_vec(),
        }
    }

    fn is_consistent(&self) -> bool {
        self.rows * self.cols == self.data.len() && self.data.iter().all(|v| v.is_finite())
    }

    pub fn to_matrix3(&self) -> Option<na::Matrix3<f64>> {
        if self.rows != 3 || self.cols != 3 || !self.is_consistent() {
            return None;
        }
        Some(na::Matrix3::from_row_slice(&self.data))
    }

    pub fn to_vector3(&self) -> Option<na::Vector3<f64>> {
        if self.data.len() != 3 || self.rows.min(self.cols) != 1 || !self.is_consistent() {
            return None;
        }
        Some(na::Vector3::from_column_slice(&self.data))
    }

    /// Accepts both 1xN and Nx1 layouts.
    pub fn to_dvector(&self) -> Option<na::DVector<f64>> {
        if self.rows.min(self.cols) != 1 || !self.is_consistent() {
            return None;
        }
        Some(na::DVector::from_column_slice(&self.data))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrinsicsDoc {
    camera_matrix: MatrixDoc,
    distortion_coefficients: MatrixDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PoseDoc {
    rotation: MatrixDoc,
    translation: MatrixDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepthShiftDoc {
    depth_shift: f64,
}

/// Calibration of the depth/color sensor pair.
///
/// Loaded once at startup and shared by reference afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSet {
    /// Full resolution color intrinsics.
    pub color_intrinsics: na::Matrix3<f64>,
    pub color_distortion: na::DVector<f64>,
    pub depth_intrinsics: na::Matrix3<f64>,
    pub depth_distortion: na::DVector<f64>,
    /// Rotation taking points from the depth sensor frame to the color sensor frame.
    pub rotation: na::Matrix3<f64>,
    /// Translation in metres, depth frame to color frame.
    pub translation: na::Vector3<f64>,
    /// Added to every valid raw depth sample, millimetres.
    pub depth_shift: f64,
}

impl Default for CalibrationSet {
    fn default() -> Self {
        Self {
            color_intrinsics: na::Matrix3::identity(),
            color_distortion: na::DVector::zeros(DEFAULT_DISTORTION_LEN),
            depth_intrinsics: na::Matrix3::identity(),
            depth_distortion: na::DVector::zeros(DEFAULT_DISTORTION_LEN),
            rotation: na::Matrix3::identity(),
            translation: na::Vector3::zeros(),
            depth_shift: 0.0,
        }
    }
}

impl CalibrationSet {
    /// Color intrinsics for the half-scale registration grid.
    pub fn color_intrinsics_half(&self) -> na::Matrix3<f64> {
        half_resolution_intrinsics(&self.color_intrinsics)
    }
}

/// Halves fx, fy, cx and cy; every other entry is copied unchanged.
pub fn half_resolution_intrinsics(full: &na::Matrix3<f64>) -> na::Matrix3<f64> {
    let mut half = *full;
    half[(0, 0)] /= 2.0;
    half[(1, 1)] /= 2.0;
    half[(0, 2)] /= 2.0;
    half[(1, 2)] /= 2.0;
    half
}

/// Directory holding the four calibration documents.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    dir: PathBuf,
}

impl CalibrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> CalibrationStore {
        CalibrationStore { dir: dir.into() }
    }

    /// Loads every artifact, falling back to defaults per artifact.
    pub fn load(&self) -> CalibrationSet {
        let mut set = CalibrationSet::default();

        match self.read_doc::<IntrinsicsDoc>(COLOR_FILE).and_then(|doc| {
            Some((
                doc.camera_matrix.to_matrix3()?,
                doc.distortion_coefficients.to_dvector()?,
            ))
        }) {
            Some((k, d)) => {
                set.color_intrinsics = k;
                set.color_distortion = d;
                log::info!("color matrix load success");
            }
            None => warn_default(COLOR_FILE),
        }

        match self
            .read_doc::<IntrinsicsDoc>(DEPTH_INTRINSICS_FILE)
            .and_then(|doc| {
                Some((
                    doc.camera_matrix.to_matrix3()?,
                    doc.distortion_coefficients.to_dvector()?,
                ))
            }) {
            Some((k, d)) => {
                set.depth_intrinsics = k;
                set.depth_distortion = d;
                log::info!("ir matrix load success");
            }
            None => warn_default(DEPTH_INTRINSICS_FILE),
        }

        match self
            .read_doc::<PoseDoc>(POSE_FILE)
            .and_then(|doc| Some((doc.rotation.to_matrix3()?, doc.translation.to_vector3()?)))
        {
            Some((r, t)) => {
                set.rotation = r;
                set.translation = t;
                log::info!("camera pose load success");
            }
            None => warn_default(POSE_FILE),
        }

        match self
            .read_doc::<DepthShiftDoc>(DEPTH_SHIFT_FILE)
            .map(|doc| doc.depth_shift)
            .filter(|v| v.is_finite())
        {
            Some(shift) => {
                set.depth_shift = shift;
                log::info!("depth shift load success");
            }
            None => warn_default(DEPTH_SHIFT_FILE),
        }

        set
    }

    /// Writes `set` as four documents that `load` reads back unchanged.
    pub fn save(&self, set: &CalibrationSet) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        object_to_json(
            self.dir.join(COLOR_FILE),
            &IntrinsicsDoc {
                camera_matrix: MatrixDoc::from_matrix3(&set.color_intrinsics),
                distortion_coefficients: MatrixDoc::from_row(set.color_distortion.as_slice()),
            },
        )?;
        object_to_json(
            self.dir.join(DEPTH_INTRINSICS_FILE),
            &IntrinsicsDoc {
                camera_matrix: MatrixDoc::from_matrix3(&set.depth_intrinsics),
                distortion_coefficients: MatrixDoc::from_row(set.depth_distortion.as_slice()),
            },
        )?;
        object_to_json(
            self.dir.join(POSE_FILE),
            &PoseDoc {
                rotation: MatrixDoc::from_matrix3(&set.rotation),
                translation: MatrixDoc::from_column(set.translation.as_slice()),
            },
        )?;
        object_to_json(
            self.dir.join(DEPTH_SHIFT_FILE),
            &DepthShiftDoc {
                depth_shift: set.depth_shift,
            },
        )
    }

    fn read_doc<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.dir.join(name);
        match object_from_json(&path) {
            Ok(doc) => Some(doc),
            Err(e) => {
                log::debug!("reading {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn warn_default(name: &str) {
    log::warn!("No calibration file: {name}, using default calibration setting");
}
