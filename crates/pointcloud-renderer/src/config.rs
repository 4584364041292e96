//! Renderer tuning loaded from JSON.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RendererConfig {
    /// Point size used when a marker's settings leave it unset.
    pub default_point_size: f32,
    /// Point size multiplier applied to picking copies.
    pub hitmap_point_scale: f32,
    /// Markers with more points are skipped instead of uploaded.
    pub max_points_per_marker: usize,
    /// Offscreen target size of the headless backend.
    pub target_width: u32,
    pub target_height: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            default_point_size: pointcloud::settings::DEFAULT_POINT_SIZE,
            hitmap_point_scale: 5.0,
            max_points_per_marker: 50_000_000,
            target_width: 1280,
            target_height: 720,
        }
    }
}

impl RendererConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.default_point_size.is_finite() && self.default_point_size > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "defaultPointSize must be positive, got {}",
                self.default_point_size
            )));
        }
        if !(self.hitmap_point_scale.is_finite() && self.hitmap_point_scale >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "hitmapPointScale must be at least 1, got {}",
                self.hitmap_point_scale
            )));
        }
        if self.max_points_per_marker == 0 {
            return Err(ConfigError::Invalid("maxPointsPerMarker must be non-zero".into()));
        }
        if self.target_width == 0 || self.target_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "target size must be non-zero, got {}x{}",
                self.target_width, self.target_height
            )));
        }
        Ok(())
    }
}
