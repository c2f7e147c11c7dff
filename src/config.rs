use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::combine::CombineParams;
use crate::display::DisplayRange;
use crate::error::{GrabberError, Result};
use crate::io::object_from_json;
use crate::registration::FilterMode;
use crate::types::Size;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabberConfig {
    /// Open the first device whose URI contains this string; any device if unset.
    pub device_uri: Option<String>,
    pub calibration_dir: PathBuf,
    pub color_size: Size,
    pub depth_size: Size,
    pub wait_timeout_ms: u64,
    /// Depth validity range in metres.
    pub near_clip: f64,
    pub far_clip: f64,
    pub filter_mode: FilterMode,
    pub combine: CombineParams,
    pub display: DisplayRange,
    /// Mirror both streams horizontally before registration.
    pub mirror: bool,
    pub undistort_color: bool,
    /// Post-process color on a second thread while depth is registered.
    pub color_worker: bool,
    /// Paint invalid depth onto the published color frame.
    pub combine_enabled: bool,
    pub max_rate_hz: Option<f64>,
    pub screenshot_dir: PathBuf,
}

impl Default for GrabberConfig {
    fn default() -> Self {
        Self {
            device_uri: None,
            calibration_dir: PathBuf::from("calibration"),
            color_size: Size::new(1920, 1080),
            depth_size: Size::new(512, 424),
            wait_timeout_ms: 2000,
            near_clip: 0.5,
            far_clip: 12.0,
            filter_mode: FilterMode::default(),
            combine: CombineParams::default(),
            display: DisplayRange::default(),
            mirror: true,
            undistort_color: true,
            color_worker: false,
            combine_enabled: true,
            max_rate_hz: Some(100.0),
            screenshot_dir: PathBuf::from("frames"),
        }
    }
}

impl GrabberConfig {
    /// Reads a config file; fields it leaves out keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<GrabberConfig> {
        let config: GrabberConfig = object_from_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks what the capture loop can't recover from later. The depth
    /// range is left to the registrar.
    pub fn validate(&self) -> Result<()> {
        if self.wait_timeout_ms == 0 {
            return Err(GrabberError::Config("wait_timeout_ms must be positive".to_string()));
        }
        if self.max_rate_hz.is_some_and(|hz| !hz.is_finite()) {
            return Err(GrabberError::Config("max_rate_hz must be finite".to_string()));
        }
        self.display.validate()
    }

    pub fn wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: GrabberConfig =
            serde_json::from_str(r#"{"wait_timeout_ms": 500, "mirror": false}"#).unwrap();
        assert_eq!(config.wait_timeout_ms, 500);
        assert!(!config.mirror);
        assert_eq!(config.depth_size, Size::new(512, 424));
        assert_eq!(config.combine.max_valid_depth, 3000);
    }

    #[test]
    fn collapsed_display_range_rejected() {
        let mut config = GrabberConfig::default();
        assert!(config.validate().is_ok());
        config.display.far = config.display.near;
        assert!(matches!(config.validate(), Err(GrabberError::Config(_))));
        config.display = DisplayRange {
            near: 500.0,
            far: f32::NAN,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grabber.json");
        std::fs::write(&path, r#"{"display": {"near": 1000.0, "far": 1000.0}}"#).unwrap();
        assert!(matches!(GrabberConfig::load(&path), Err(GrabberError::Config(_))));
        std::fs::write(&path, r#"{"display": {"far": 3000.0}}"#).unwrap();
        let config = GrabberConfig::load(&path).unwrap();
        assert_eq!(config.display.near, 500.0);
        assert_eq!(config.display.far, 3000.0);
    }
}
