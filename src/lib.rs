pub mod calibration;
pub mod camera_model;
pub mod combine;
pub mod config;
pub mod device;
pub mod display;
pub mod error;
pub mod geometry;
pub mod grabber;
pub mod io;
pub mod registration;
pub mod sink;
pub mod sync;
pub mod types;
pub mod visualization;

pub use error::{GrabberError, Result};
