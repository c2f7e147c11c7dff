pub mod generic;
pub mod opencv5;

pub use generic::{CameraModel, RemapTable, init_undistort_map, remap};
pub use opencv5::OpenCVModel5;
