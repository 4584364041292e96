//! Marker decoding: raw interleaved records into typed position/color views.
//!
//! Decoding is pure. Position and float color fields alias the record bytes
//! whenever their layout is already GPU-compatible (little-endian `f32`,
//! 4-byte aligned, rows without padding); every other layout is converted into
//! a packed buffer.

use crate::fields::{read_packed_bgra, read_scalar, FieldType, PointField};
use crate::marker::{MarkerId, Pose, RawMarker};
use crate::settings::{BlendOverride, ColorMode, DepthOverride, PointCloudSettings, DEFAULT_COLOR_FIELD};
use crate::view::{VertexBufferView, ELEMENT_SIZE};
use log::debug;
use rayon::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("point_step is zero")]
    ZeroPointStep,

    #[error("data length {len} is not a multiple of point_step {point_step}")]
    MisalignedData { len: usize, point_step: usize },

    #[error("row_step {row_step} is shorter than width * point_step = {required}")]
    RowStepTooShort { row_step: usize, required: usize },

    #[error("data holds {available} bytes but the {width}x{height} cloud needs {required}")]
    Truncated {
        available: usize,
        required: usize,
        width: u32,
        height: u32,
    },

    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("field `{name}` ({len} bytes at offset {offset}) overruns point_step {point_step}")]
    FieldOverrun {
        name: String,
        offset: usize,
        len: usize,
        point_step: usize,
    },

    #[error("field `{name}` of type {datatype:?} cannot hold packed colors")]
    UnsupportedColorField { name: String, datatype: FieldType },

    #[error("hitmap colors hold {available} bytes but {points} points need {required}")]
    HitmapColorsTruncated {
        available: usize,
        required: usize,
        points: usize,
    },
}

/// Renderable form of one [`RawMarker`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMarker {
    /// Identity of the record this was decoded from.
    pub source: MarkerId,
    pub name: String,
    /// `vec3<f32>` per point.
    pub position_buffer: VertexBufferView,
    /// RGBA8 per point for rgb/rgba modes, `f32` per point for scalar modes,
    /// absent in flat mode.
    pub color_buffer: Option<VertexBufferView>,
    pub point_count: usize,
    pub width: u32,
    pub height: u32,
    pub min_color_value: f32,
    pub max_color_value: f32,
    pub pose: Pose,
    pub settings: PointCloudSettings,
    pub hitmap_colors: Option<Arc<[u8]>>,
    pub blend: Option<BlendOverride>,
    pub depth: Option<DepthOverride>,
}

impl DecodedMarker {
    /// Whether the cloud covers at least one point.
    #[inline]
    pub fn has_extent(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Decodes `raw` without touching it.
pub fn decode_marker(raw: &RawMarker) -> Result<DecodedMarker, DecodeError> {
    validate_layout(raw)?;

    let position_buffer = decode_positions(raw)?;
    let (color_buffer, min_color_value, max_color_value) = decode_colors(raw)?;

    let point_count = raw.point_count();
    if let Some(colors) = raw.hitmap_colors.as_ref() {
        let required = point_count * 4;
        if colors.len() < required {
            return Err(DecodeError::HitmapColorsTruncated {
                available: colors.len(),
                required,
                points: point_count,
            });
        }
    }

    Ok(DecodedMarker {
        source: raw.id(),
        name: raw.name.clone(),
        position_buffer,
        color_buffer,
        point_count,
        width: raw.width,
        height: raw.height,
        min_color_value,
        max_color_value,
        pose: raw.pose,
        settings: raw.settings.clone(),
        hitmap_colors: raw.hitmap_colors.clone(),
        blend: raw.blend,
        depth: raw.depth,
    })
}

fn validate_layout(raw: &RawMarker) -> Result<(), DecodeError> {
    if raw.point_step == 0 {
        return Err(DecodeError::ZeroPointStep);
    }

    let step = raw.point_step as usize;
    let row_bytes = raw.width as usize * step;
    if raw.height > 1 && (raw.row_step as usize) < row_bytes {
        return Err(DecodeError::RowStepTooShort {
            row_step: raw.row_step as usize,
            required: row_bytes,
        });
    }

    if raw.is_dense() && raw.data.len() % step != 0 {
        return Err(DecodeError::MisalignedData {
            len: raw.data.len(),
            point_step: step,
        });
    }

    if raw.point_count() == 0 {
        return Ok(());
    }

    let required = (raw.height as usize - 1) * raw.row_step as usize + row_bytes;
    if raw.data.len() < required {
        return Err(DecodeError::Truncated {
            available: raw.data.len(),
            required,
            width: raw.width,
            height: raw.height,
        });
    }

    Ok(())
}

fn field<'a>(raw: &'a RawMarker, name: &str) -> Result<&'a PointField, DecodeError> {
    let field = raw
        .field(name)
        .ok_or_else(|| DecodeError::MissingField(name.to_owned()))?;
    check_field(raw, field)?;
    Ok(field)
}

fn check_field(raw: &RawMarker, field: &PointField) -> Result<(), DecodeError> {
    let offset = field.offset as usize;
    if offset + field.byte_len() > raw.point_step as usize {
        return Err(DecodeError::FieldOverrun {
            name: field.name.clone(),
            offset,
            len: field.byte_len(),
            point_step: raw.point_step as usize,
        });
    }
    Ok(())
}

/// The record bytes can back a float view directly.
#[inline]
fn can_alias(raw: &RawMarker) -> bool {
    !raw.is_bigendian
        && raw.is_dense()
        && raw.point_step as usize % ELEMENT_SIZE == 0
        && raw.data.len() % ELEMENT_SIZE == 0
}

#[inline]
fn read_field(raw: &RawMarker, field: &PointField, index: usize) -> f32 {
    read_scalar(
        &raw.data,
        raw.point_offset(index) + field.offset as usize,
        field.datatype,
        raw.is_bigendian,
    )
}

fn decode_positions(raw: &RawMarker) -> Result<VertexBufferView, DecodeError> {
    let x = field(raw, "x")?;
    let y = field(raw, "y")?;
    let z = field(raw, "z")?;

    let contiguous_xyz = x.is_aligned_f32()
        && y.is_aligned_f32()
        && z.is_aligned_f32()
        && y.offset == x.offset + 4
        && z.offset == x.offset + 8;

    if can_alias(raw) && contiguous_xyz {
        return Ok(VertexBufferView::new(
            raw.data.clone(),
            x.offset as usize / ELEMENT_SIZE,
            raw.point_step as usize / ELEMENT_SIZE,
        ));
    }

    debug!(
        "point cloud `{}`: positions not GPU-compatible, converting {} points",
        raw.name,
        raw.point_count()
    );
    let positions: Vec<[f32; 3]> = (0..raw.point_count())
        .into_par_iter()
        .map(|i| [read_field(raw, x, i), read_field(raw, y, i), read_field(raw, z, i)])
        .collect();

    Ok(VertexBufferView::new(
        Arc::from(bytemuck::cast_slice::<[f32; 3], u8>(&positions)),
        0,
        3,
    ))
}

fn decode_colors(raw: &RawMarker) -> Result<(Option<VertexBufferView>, f32, f32), DecodeError> {
    let mode = &raw.settings.color_mode;
    match mode {
        ColorMode::Flat { .. } => Ok((None, 0.0, 0.0)),
        ColorMode::Rgb => Ok((Some(decode_packed_colors(raw, &["rgb", "rgba"], false)?), 0.0, 0.0)),
        ColorMode::Rgba => Ok((Some(decode_packed_colors(raw, &["rgba", "rgb"], true)?), 0.0, 0.0)),
        ColorMode::Gradient { .. } | ColorMode::Rainbow { .. } | ColorMode::Turbo { .. } => {
            let name = mode.color_field().unwrap_or(DEFAULT_COLOR_FIELD);
            let (view, observed_min, observed_max) = decode_scalar_colors(raw, name)?;
            let (min_override, max_override) = mode.value_range_override();
            Ok((
                Some(view),
                min_override.unwrap_or(observed_min),
                max_override.unwrap_or(observed_max),
            ))
        }
    }
}

fn decode_packed_colors(
    raw: &RawMarker,
    names: &[&str],
    keep_alpha: bool,
) -> Result<VertexBufferView, DecodeError> {
    let field = names
        .iter()
        .find_map(|name| raw.field(name))
        .ok_or_else(|| DecodeError::MissingField(names[0].to_owned()))?;
    check_field(raw, field)?;

    if field.datatype.size() != 4 {
        return Err(DecodeError::UnsupportedColorField {
            name: field.name.clone(),
            datatype: field.datatype,
        });
    }

    let colors: Vec<[u8; 4]> = (0..raw.point_count())
        .into_par_iter()
        .map(|i| {
            let at = raw.point_offset(i) + field.offset as usize;
            let mut rgba = read_packed_bgra(&raw.data, at, raw.is_bigendian);
            if !keep_alpha {
                rgba[3] = u8::MAX;
            }
            rgba
        })
        .collect();

    Ok(VertexBufferView::new(
        Arc::from(bytemuck::cast_slice::<[u8; 4], u8>(&colors)),
        0,
        1,
    ))
}

fn decode_scalar_colors(
    raw: &RawMarker,
    name: &str,
) -> Result<(VertexBufferView, f32, f32), DecodeError> {
    let field = field(raw, name)?;
    let count = raw.point_count();

    if can_alias(raw) && field.is_aligned_f32() {
        let (lo, hi) = finite_range((0..count).into_par_iter().map(|i| read_field(raw, field, i)));
        let view = VertexBufferView::new(
            raw.data.clone(),
            field.offset as usize / ELEMENT_SIZE,
            raw.point_step as usize / ELEMENT_SIZE,
        );
        return Ok((view, lo, hi));
    }

    let values: Vec<f32> = (0..count)
        .into_par_iter()
        .map(|i| read_field(raw, field, i))
        .collect();
    let (lo, hi) = finite_range(values.par_iter().copied());

    Ok((VertexBufferView::from_f32(&values, 1), lo, hi))
}

/// Min and max of the finite values, `(0, 0)` when there are none.
fn finite_range<I>(values: I) -> (f32, f32)
where
    I: ParallelIterator<Item = f32>,
{
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold(
            || (f32::INFINITY, f32::NEG_INFINITY),
            |(lo, hi), v| (lo.min(v), hi.max(v)),
        )
        .reduce(
            || (f32::INFINITY, f32::NEG_INFINITY),
            |(a_lo, a_hi), (b_lo, b_hi)| (a_lo.min(b_lo), a_hi.max(b_hi)),
        );

    if lo > hi {
        (0.0, 0.0)
    } else {
        (lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Rgba;

    /// x, y, z, intensity as little-endian f32 (16-byte records).
    fn xyzi_cloud(points: &[[f32; 4]]) -> RawMarker {
        let data: Vec<u8> = points
            .iter()
            .flat_map(|p| p.iter().flat_map(|v| v.to_le_bytes()))
            .collect();
        RawMarker::new(
            "xyzi",
            vec![
                PointField::new("x", 0, FieldType::Float32),
                PointField::new("y", 4, FieldType::Float32),
                PointField::new("z", 8, FieldType::Float32),
                PointField::new("intensity", 12, FieldType::Float32),
            ],
            data,
            points.len() as u32,
            16,
        )
    }

    fn turbo() -> PointCloudSettings {
        PointCloudSettings::with_color_mode(ColorMode::Turbo {
            color_field: None,
            min_value: None,
            max_value: None,
        })
    }

    #[test]
    fn aligned_float_positions_alias_the_record_bytes() {
        let raw = xyzi_cloud(&[[1.0, 2.0, 3.0, 0.5], [4.0, 5.0, 6.0, 0.7]]);
        let decoded = decode_marker(&raw).unwrap();

        assert!(Arc::ptr_eq(&decoded.position_buffer.buffer, &raw.data));
        assert_eq!(decoded.position_buffer.offset, 0);
        assert_eq!(decoded.position_buffer.stride, 4);
        assert_eq!(decoded.point_count, 2);
        assert!(decoded.color_buffer.is_none());
        assert_eq!(decoded.source, raw.id());
    }

    #[test]
    fn scalar_modes_alias_the_field_and_track_its_range() {
        let raw = xyzi_cloud(&[[0.0, 0.0, 0.0, f32::NAN]; 2]).with_settings(turbo());
        let decoded = decode_marker(&raw).unwrap();
        assert_eq!((decoded.min_color_value, decoded.max_color_value), (0.0, 0.0));

        let raw = xyzi_cloud(&[
            [0.0, 0.0, 0.0, 3.0],
            [0.0, 0.0, 0.0, f32::NAN],
            [0.0, 0.0, 0.0, -2.0],
        ])
        .with_settings(turbo());
        let decoded = decode_marker(&raw).unwrap();
        let colors = decoded.color_buffer.as_ref().unwrap();

        assert!(Arc::ptr_eq(&colors.buffer, &raw.data));
        assert_eq!(colors.offset, 3);
        assert_eq!(colors.stride, 4);
        assert_eq!(decoded.min_color_value, -2.0);
        assert_eq!(decoded.max_color_value, 3.0);
    }

    #[test]
    fn configured_value_range_overrides_observed_range() {
        let raw = xyzi_cloud(&[[0.0, 0.0, 0.0, 3.0], [0.0, 0.0, 0.0, 9.0]]).with_settings(
            PointCloudSettings::with_color_mode(ColorMode::Gradient {
                color_field: Some("intensity".into()),
                min_color: None,
                max_color: Some(Rgba::new(0.0, 1.0, 0.0, 1.0)),
                min_value: Some(0.0),
                max_value: None,
            }),
        );
        let decoded = decode_marker(&raw).unwrap();
        assert_eq!(decoded.min_color_value, 0.0);
        assert_eq!(decoded.max_color_value, 9.0);
    }

    #[test]
    fn mixed_width_fields_are_converted() {
        // x, y, z as f64 followed by a u16 intensity: 26-byte records.
        let mut data = Vec::new();
        for p in [[1.0f64, 2.0, 3.0], [4.0, 5.0, 6.0]] {
            for v in p {
                data.extend_from_slice(&v.to_le_bytes());
            }
            data.extend_from_slice(&7u16.to_le_bytes());
        }
        let raw = RawMarker::new(
            "f64",
            vec![
                PointField::new("x", 0, FieldType::Float64),
                PointField::new("y", 8, FieldType::Float64),
                PointField::new("z", 16, FieldType::Float64),
                PointField::new("intensity", 24, FieldType::Uint16),
            ],
            data,
            2,
            26,
        )
        .with_settings(turbo());

        let decoded = decode_marker(&raw).unwrap();
        let positions: &[f32] = bytemuck::cast_slice(&decoded.position_buffer.buffer);
        assert_eq!(positions, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(decoded.position_buffer.stride, 3);

        let colors = decoded.color_buffer.unwrap();
        assert_eq!(colors.stride, 1);
        assert_eq!((decoded.min_color_value, decoded.max_color_value), (7.0, 7.0));
    }

    #[test]
    fn big_endian_records_are_converted() {
        let mut data = Vec::new();
        for v in [1.0f32, 2.0, 3.0] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        let raw = RawMarker::new(
            "be",
            vec![
                PointField::new("x", 0, FieldType::Float32),
                PointField::new("y", 4, FieldType::Float32),
                PointField::new("z", 8, FieldType::Float32),
            ],
            data,
            1,
            12,
        )
        .big_endian(true);

        let decoded = decode_marker(&raw).unwrap();
        assert!(!Arc::ptr_eq(&decoded.position_buffer.buffer, &raw.data));
        let positions: &[f32] = bytemuck::cast_slice(&decoded.position_buffer.buffer);
        assert_eq!(positions, &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn packed_rgb_is_unpacked_to_opaque_rgba8() {
        let mut data = Vec::new();
        for (xyz, bgra) in [([0.0f32; 3], [1u8, 2, 3, 4]), ([1.0f32; 3], [5, 6, 7, 8])] {
            for v in xyz {
                data.extend_from_slice(&v.to_le_bytes());
            }
            data.extend_from_slice(&bgra);
        }
        let fields = vec![
            PointField::new("x", 0, FieldType::Float32),
            PointField::new("y", 4, FieldType::Float32),
            PointField::new("z", 8, FieldType::Float32),
            PointField::new("rgb", 12, FieldType::Float32),
        ];

        let rgb = RawMarker::new("rgb", fields.clone(), data.clone(), 2, 16)
            .with_settings(PointCloudSettings::with_color_mode(ColorMode::Rgb));
        let decoded = decode_marker(&rgb).unwrap();
        assert_eq!(&decoded.color_buffer.unwrap().buffer[..], &[3, 2, 1, 255, 7, 6, 5, 255]);

        let rgba = RawMarker::new("rgba", fields, data, 2, 16)
            .with_settings(PointCloudSettings::with_color_mode(ColorMode::Rgba));
        let decoded = decode_marker(&rgba).unwrap();
        assert_eq!(&decoded.color_buffer.unwrap().buffer[..], &[3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn malformed_records_fail_with_descriptive_errors() {
        let fields = vec![
            PointField::new("x", 0, FieldType::Float32),
            PointField::new("y", 4, FieldType::Float32),
            PointField::new("z", 8, FieldType::Float32),
        ];

        let misaligned = RawMarker::new("bad", fields.clone(), vec![0u8; 13], 1, 12);
        assert_eq!(
            decode_marker(&misaligned),
            Err(DecodeError::MisalignedData {
                len: 13,
                point_step: 12
            })
        );

        let truncated = RawMarker::new("bad", fields.clone(), vec![0u8; 12], 2, 12);
        assert!(matches!(
            decode_marker(&truncated),
            Err(DecodeError::Truncated { required: 24, .. })
        ));

        let missing = RawMarker::new("bad", fields[..2].to_vec(), vec![0u8; 12], 1, 12);
        assert_eq!(
            decode_marker(&missing),
            Err(DecodeError::MissingField("z".into()))
        );

        let overrun = RawMarker::new("bad", fields.clone(), vec![0u8; 8], 1, 8);
        assert!(matches!(
            decode_marker(&overrun),
            Err(DecodeError::FieldOverrun { .. })
        ));

        let short_hitmap = RawMarker::new("bad", fields, vec![0u8; 24], 2, 12)
            .with_hitmap_colors(vec![0u8; 4]);
        assert!(matches!(
            decode_marker(&short_hitmap),
            Err(DecodeError::HitmapColorsTruncated { required: 8, .. })
        ));
    }

    #[test]
    fn padded_rows_are_read_per_row() {
        // Two rows of one 12-byte point each, padded to 16 bytes per row.
        let mut data = Vec::new();
        for p in [[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]] {
            for v in p {
                data.extend_from_slice(&v.to_le_bytes());
            }
            data.extend_from_slice(&[0u8; 4]);
        }
        let raw = RawMarker::new(
            "grid",
            vec![
                PointField::new("x", 0, FieldType::Float32),
                PointField::new("y", 4, FieldType::Float32),
                PointField::new("z", 8, FieldType::Float32),
            ],
            data,
            1,
            12,
        )
        .with_grid(1, 2, 16);

        let decoded = decode_marker(&raw).unwrap();
        let positions: &[f32] = bytemuck::cast_slice(&decoded.position_buffer.buffer);
        assert_eq!(positions, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn decoding_twice_is_structurally_identical() {
        let raw = xyzi_cloud(&[[1.0, 2.0, 3.0, 0.5]]).with_settings(turbo());
        assert_eq!(decode_marker(&raw).unwrap(), decode_marker(&raw).unwrap());
    }
}
