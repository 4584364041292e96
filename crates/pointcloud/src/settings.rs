//! Per-marker display settings and GPU state overrides.

use serde::{Deserialize, Serialize};

/// Point size in pixels when the settings leave it unset.
pub const DEFAULT_POINT_SIZE: f32 = 2.0;
/// Field used by gradient, rainbow and turbo modes when none is configured.
pub const DEFAULT_COLOR_FIELD: &str = "intensity";

pub const DEFAULT_FLAT_COLOR: Rgba = Rgba::new(1.0, 1.0, 1.0, 1.0);
pub const DEFAULT_MIN_COLOR: Rgba = Rgba::new(0.0, 0.0, 1.0, 1.0);
pub const DEFAULT_MAX_COLOR: Rgba = Rgba::new(1.0, 0.0, 0.0, 1.0);

/// Normalized color, every channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Channels scaled to the 0–255 range the point shaders work in.
    #[inline]
    pub fn to_255(self) -> [f32; 4] {
        [self.r * 255.0, self.g * 255.0, self.b * 255.0, self.a * 255.0]
    }

    #[inline]
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointShape {
    #[default]
    Circle,
    Square,
}

/// How point colors are computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ColorMode {
    Flat {
        #[serde(default)]
        flat_color: Option<Rgba>,
    },
    Rgb,
    Rgba,
    Gradient {
        #[serde(default)]
        color_field: Option<String>,
        #[serde(default)]
        min_color: Option<Rgba>,
        #[serde(default)]
        max_color: Option<Rgba>,
        #[serde(default)]
        min_value: Option<f32>,
        #[serde(default)]
        max_value: Option<f32>,
    },
    Rainbow {
        #[serde(default)]
        color_field: Option<String>,
        #[serde(default)]
        min_value: Option<f32>,
        #[serde(default)]
        max_value: Option<f32>,
    },
    Turbo {
        #[serde(default)]
        color_field: Option<String>,
        #[serde(default)]
        min_value: Option<f32>,
        #[serde(default)]
        max_value: Option<f32>,
    },
}

impl Default for ColorMode {
    fn default() -> Self {
        Self::Flat { flat_color: None }
    }
}

impl ColorMode {
    /// Name of the scalar field feeding gradient, rainbow and turbo modes.
    pub fn color_field(&self) -> Option<&str> {
        match self {
            Self::Gradient { color_field, .. }
            | Self::Rainbow { color_field, .. }
            | Self::Turbo { color_field, .. } => {
                Some(color_field.as_deref().unwrap_or(DEFAULT_COLOR_FIELD))
            }
            Self::Flat { .. } | Self::Rgb | Self::Rgba => None,
        }
    }

    /// Explicit `(min, max)` overrides for field normalization.
    pub fn value_range_override(&self) -> (Option<f32>, Option<f32>) {
        match self {
            Self::Gradient {
                min_value,
                max_value,
                ..
            }
            | Self::Rainbow {
                min_value,
                max_value,
                ..
            }
            | Self::Turbo {
                min_value,
                max_value,
                ..
            } => (*min_value, *max_value),
            Self::Flat { .. } | Self::Rgb | Self::Rgba => (None, None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PointCloudSettings {
    pub point_size: Option<f32>,
    pub point_shape: Option<PointShape>,
    pub alpha: Option<f32>,
    pub color_mode: ColorMode,
}

impl PointCloudSettings {
    pub fn with_color_mode(color_mode: ColorMode) -> Self {
        Self {
            color_mode,
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_circle(&self) -> bool {
        self.point_shape.unwrap_or_default() == PointShape::Circle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
    Constant,
    OneMinusConstant,
}

/// Blend state requested by the caller for a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlendOverride {
    pub enable: bool,
    pub src: BlendFactor,
    pub dst: BlendFactor,
    /// Constant blend color. When set, points are drawn flat in this color.
    #[serde(default)]
    pub color: Option<Rgba>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DepthCompare {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Depth state requested by the caller for a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthOverride {
    pub enable: bool,
    /// Whether depth writes are enabled.
    pub mask: bool,
    pub func: DepthCompare,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_parse_from_panel_json() {
        let json = r#"{
            "pointSize": 4,
            "pointShape": "square",
            "colorMode": { "mode": "gradient", "colorField": "z", "minValue": -1.5 }
        }"#;
        let settings: PointCloudSettings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.point_size, Some(4.0));
        assert!(!settings.is_circle());
        assert_eq!(settings.color_mode.color_field(), Some("z"));
        assert_eq!(settings.color_mode.value_range_override(), (Some(-1.5), None));
    }

    #[test]
    fn empty_settings_default_to_flat_circles() {
        let settings: PointCloudSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.color_mode, ColorMode::Flat { flat_color: None });
        assert!(settings.is_circle());
        assert_eq!(settings.color_mode.color_field(), None);
    }

    #[test]
    fn scalar_modes_fall_back_to_intensity() {
        let mode = ColorMode::Turbo {
            color_field: None,
            min_value: None,
            max_value: None,
        };
        assert_eq!(mode.color_field(), Some(DEFAULT_COLOR_FIELD));
    }
}
