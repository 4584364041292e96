//! Color mode resolution and the colormap reference.
//!
//! The functions here mirror the arithmetic in `shaders/point_single.wgsl`
//! operation for operation, so CPU results match what the GPU writes.

use crate::gpu::PointUniforms;
use pointcloud::settings::{DEFAULT_FLAT_COLOR, DEFAULT_MAX_COLOR, DEFAULT_MIN_COLOR, DEFAULT_POINT_SIZE};
use pointcloud::{ColorMode, DecodedMarker, Rgba};

/// Field ranges narrower than this normalize to zero.
pub const COLOR_RANGE_EPSILON: f32 = 0.00001;

/// Mode values written to `PointUniforms::color_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ShaderColorMode {
    Flat = 0,
    Rgb = 1,
    Rgba = 2,
    Gradient = 3,
    Rainbow = 4,
    Turbo = 5,
}

/// The two vertex programs. They differ in the width of the color attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVariant {
    /// Scalar `f32` color attribute, shaded in the vertex stage.
    SingleColor,
    /// Four-channel color attribute passed through.
    RgbaColor,
}

/// Resolved coloring of one marker.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorModeSpec {
    Flat(Rgba),
    Rgb,
    Rgba,
    Gradient {
        min_color: Rgba,
        max_color: Rgba,
        field: String,
    },
    Rainbow { field: String },
    Turbo { field: String },
}

impl ColorModeSpec {
    pub fn shader_mode(&self) -> ShaderColorMode {
        match self {
            Self::Flat(_) => ShaderColorMode::Flat,
            Self::Rgb => ShaderColorMode::Rgb,
            Self::Rgba => ShaderColorMode::Rgba,
            Self::Gradient { .. } => ShaderColorMode::Gradient,
            Self::Rainbow { .. } => ShaderColorMode::Rainbow,
            Self::Turbo { .. } => ShaderColorMode::Turbo,
        }
    }

    pub fn variant(&self) -> ShaderVariant {
        match self {
            Self::Rgb | Self::Rgba => ShaderVariant::RgbaColor,
            Self::Flat(_) | Self::Gradient { .. } | Self::Rainbow { .. } | Self::Turbo { .. } => {
                ShaderVariant::SingleColor
            }
        }
    }
}

/// Picks the coloring for `marker`.
///
/// Hitmap colors win over a blend color, which wins over the settings.
pub fn resolve(marker: &DecodedMarker) -> ColorModeSpec {
    if marker.hitmap_colors.is_some() {
        return ColorModeSpec::Rgb;
    }

    if let Some(color) = marker.blend.as_ref().and_then(|b| b.color) {
        return ColorModeSpec::Flat(color);
    }

    let mode = &marker.settings.color_mode;
    let field = || mode.color_field().unwrap_or_default().to_owned();
    match mode {
        ColorMode::Flat { flat_color } => ColorModeSpec::Flat(flat_color.unwrap_or(DEFAULT_FLAT_COLOR)),
        ColorMode::Rgb => ColorModeSpec::Rgb,
        ColorMode::Rgba => ColorModeSpec::Rgba,
        ColorMode::Gradient {
            min_color,
            max_color,
            ..
        } => ColorModeSpec::Gradient {
            min_color: min_color.unwrap_or(DEFAULT_MIN_COLOR),
            max_color: max_color.unwrap_or(DEFAULT_MAX_COLOR),
            field: field(),
        },
        ColorMode::Rainbow { .. } => ColorModeSpec::Rainbow { field: field() },
        ColorMode::Turbo { .. } => ColorModeSpec::Turbo { field: field() },
    }
}

/// Builds the uniforms for drawing `marker` with `resolved`.
pub fn build_uniforms(marker: &DecodedMarker, resolved: &ColorModeSpec, default_point_size: f32) -> PointUniforms {
    let settings = &marker.settings;

    let (min_color, max_color) = match resolved {
        ColorModeSpec::Gradient {
            min_color,
            max_color,
            ..
        } => (*min_color, *max_color),
        _ => (DEFAULT_MIN_COLOR, DEFAULT_MAX_COLOR),
    };
    let flat_color = match resolved {
        ColorModeSpec::Flat(color) => *color,
        _ => DEFAULT_FLAT_COLOR,
    };

    PointUniforms {
        model: marker.pose.to_mat4().to_cols_array_2d(),
        flat_color: flat_color.to_255(),
        min_gradient_color: min_color.to_255(),
        max_gradient_color: max_color.to_255(),
        point_size: settings.point_size.unwrap_or(default_point_size),
        alpha: settings.alpha.unwrap_or(1.0),
        min_color_field_value: marker.min_color_value,
        max_color_field_value: marker.max_color_value,
        color_mode: resolved.shader_mode() as u32,
        is_circle: settings.is_circle() as u32,
        _pad: [0; 2],
    }
}

impl Default for PointUniforms {
    fn default() -> Self {
        Self {
            model: glam::Mat4::IDENTITY.to_cols_array_2d(),
            flat_color: DEFAULT_FLAT_COLOR.to_255(),
            min_gradient_color: DEFAULT_MIN_COLOR.to_255(),
            max_gradient_color: DEFAULT_MAX_COLOR.to_255(),
            point_size: DEFAULT_POINT_SIZE,
            alpha: 1.0,
            min_color_field_value: 0.0,
            max_color_field_value: 0.0,
            color_mode: ShaderColorMode::Flat as u32,
            is_circle: 1,
            _pad: [0; 2],
        }
    }
}

/// Maps `value` into `[0, 1]`; degenerate ranges map everything to 0.
#[inline]
pub fn normalize(value: f32, min: f32, max: f32) -> f32 {
    let range = max - min;
    if range.abs() < COLOR_RANGE_EPSILON {
        return 0.0;
    }
    ((value - min) / range).min(1.0).max(0.0)
}

#[inline]
fn mix(x: f32, y: f32, a: f32) -> f32 {
    x * (1.0 - a) + y * a
}

/// Linear blend between two 0–255 colors, rgb only.
pub fn gradient_color(pct: f32, min_color: [f32; 4], max_color: [f32; 4]) -> [f32; 3] {
    [
        mix(min_color[0], max_color[0], pct),
        mix(min_color[1], max_color[1], pct),
        mix(min_color[2], max_color[2], pct),
    ]
}

/// HSV-style sweep from red (0) to magenta (1), 0–255 per channel.
pub fn rainbow_color(pct: f32) -> [f32; 3] {
    let h = (1.0 - pct) * 5.0 + 1.0;
    let i = h.floor();
    let mut f = h - i;
    // even sextant
    if i - 2.0 * (i / 2.0).floor() < 1.0 {
        f = 1.0 - f;
    }
    let n = 1.0 - f;
    let ret = if i <= 1.0 {
        [n, 0.0, 1.0]
    } else if i == 2.0 {
        [0.0, n, 1.0]
    } else if i == 3.0 {
        [0.0, 1.0, n]
    } else if i == 4.0 {
        [n, 1.0, 0.0]
    } else {
        [1.0, n, 0.0]
    };
    ret.map(|c| 255.0 * c)
}

const TURBO_RED_4: [f32; 4] = [0.13572138, 4.61539260, -42.66032258, 132.13108234];
const TURBO_GREEN_4: [f32; 4] = [0.09140261, 2.19418839, 4.84296658, -14.18503333];
const TURBO_BLUE_4: [f32; 4] = [0.10667330, 12.64194608, -60.58204836, 110.36276771];
const TURBO_RED_2: [f32; 2] = [-152.94239396, 59.28637943];
const TURBO_GREEN_2: [f32; 2] = [4.27729857, 2.82956604];
const TURBO_BLUE_2: [f32; 2] = [-89.90310912, 27.34824973];

#[inline]
fn dot4(a: [f32; 4], b: [f32; 4]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3]
}

#[inline]
fn dot2(a: [f32; 2], b: [f32; 2]) -> f32 {
    a[0] * b[0] + a[1] * b[1]
}

/// Polynomial approximation of the Turbo colormap, 0–255 per channel.
pub fn turbo_color(pct: f32) -> [f32; 3] {
    let x = pct.clamp(0.0, 1.0) * 0.99 + 0.01;
    let v4 = [1.0, x, x * x, x * x * x];
    let v2 = [v4[2] * v4[2], v4[3] * v4[2]];
    [
        255.0 * (dot4(v4, TURBO_RED_4) + dot2(v2, TURBO_RED_2)),
        255.0 * (dot4(v4, TURBO_GREEN_4) + dot2(v2, TURBO_GREEN_2)),
        255.0 * (dot4(v4, TURBO_BLUE_4) + dot2(v2, TURBO_BLUE_2)),
    ]
}

/// Final fragment color in `[0, 1]` for one point, as the shaders compute it.
///
/// `field` is the scalar attribute of the single-color program and `rgba` the
/// 0–255 attribute of the rgba program; each program ignores the other input.
pub fn reference_fragment_color(uniforms: &PointUniforms, field: f32, rgba: [f32; 4]) -> [f32; 4] {
    let u = uniforms;
    let unorm = || normalize(field, u.min_color_field_value, u.max_color_field_value);
    let rgb = match u.color_mode {
        m if m == ShaderColorMode::Rgba as u32 => return rgba.map(|c| c / 255.0),
        m if m == ShaderColorMode::Rgb as u32 => [rgba[0], rgba[1], rgba[2]],
        m if m == ShaderColorMode::Gradient as u32 => {
            gradient_color(unorm(), u.min_gradient_color, u.max_gradient_color)
        }
        m if m == ShaderColorMode::Rainbow as u32 => rainbow_color(unorm()),
        m if m == ShaderColorMode::Turbo as u32 => turbo_color(unorm()),
        _ => [u.flat_color[0], u.flat_color[1], u.flat_color[2]],
    };
    [rgb[0] / 255.0, rgb[1] / 255.0, rgb[2] / 255.0, u.alpha]
}
