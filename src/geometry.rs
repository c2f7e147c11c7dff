//! Startup-time geometry: the color undistortion table and registrar setup.

use crate::calibration::CalibrationSet;
use crate::camera_model::{OpenCVModel5, RemapTable, init_undistort_map};
use crate::config::GrabberConfig;
use crate::error::Result;
use crate::registration::{Registrar, RegistrarParams};
use crate::types::Size;

/// Geometry derived once from a [`CalibrationSet`] and never recomputed.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub color_size: Size,
    pub clipped_color_size: Size,
    pub depth_size: Size,
    /// Undistorts the full resolution color frame onto its own intrinsics.
    pub color_undistort: RemapTable,
    pub registrar_params: RegistrarParams,
}

pub struct GeometryMapper;

impl GeometryMapper {
    pub fn build(calibration: &CalibrationSet, config: &GrabberConfig) -> Geometry {
        let color_size = config.color_size;
        let clipped_color_size = color_size.clipped();
        let color_model = OpenCVModel5::new(
            &calibration.color_intrinsics,
            &calibration.color_distortion,
            color_size.width,
            color_size.height,
        );
        let color_undistort =
            init_undistort_map(&color_model, &calibration.color_intrinsics, color_size);
        log::debug!(
            "color undistortion table {} (identity: {})",
            color_size,
            !color_model.has_distortion()
        );

        let registrar_params = RegistrarParams {
            color_intrinsics_half: calibration.color_intrinsics_half(),
            clipped_color_size,
            depth_intrinsics: calibration.depth_intrinsics,
            depth_size: config.depth_size,
            depth_distortion: calibration.depth_distortion.clone(),
            rotation: calibration.rotation,
            translation: calibration.translation,
            near_clip: config.near_clip,
            far_clip: config.far_clip,
            filter_mode: config.filter_mode,
        };

        Geometry {
            color_size,
            clipped_color_size,
            depth_size: config.depth_size,
            color_undistort,
            registrar_params,
        }
    }

    /// Initializes `registrar`; an error here must abort startup.
    pub fn init_registrar(geometry: &Geometry, registrar: &mut dyn Registrar) -> Result<()> {
        registrar.init(&geometry.registrar_params).map_err(|e| {
            log::error!("Calibration initiation failed! {e}");
            e
        })
    }
}
